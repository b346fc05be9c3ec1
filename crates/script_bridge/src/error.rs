//! Error types raised at the native/script boundary.
//!
//! Each concern owns its own enum so callers can match on exactly the failure
//! modes they care about. All of them convert into [`NativeError`], which is
//! what a native entry point hands back to the script engine.

use crate::value::TypeTag;

/// Failures while converting a raw argument list against a descriptor.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarshalError {
    /// Descriptor length and received value count disagree
    #[error("expected {expected} arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    /// A value could not be coerced to the tag at `position`
    #[error("argument {position}: expected {expected}, found {found}")]
    TypeMismatch {
        position: usize,
        expected: TypeTag,
        found: TypeTag,
    },

    /// A descriptor contained a character outside the tag alphabet
    #[error("unknown type tag '{tag}' at position {position}")]
    UnknownTag { position: usize, tag: char },
}

/// Failures of the exported-function table.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("function '{0}' is already registered")]
    DuplicateName(String),

    #[error("function '{0}' is not registered")]
    NotFound(String),

    /// The function exists but its return value does not match its signature
    #[error("function '{name}' returned {found}, declared {expected}")]
    ReturnMismatch {
        name: String,
        expected: TypeTag,
        found: TypeTag,
    },

    #[error("call to '{name}' failed: {source}")]
    CallFailed {
        name: String,
        source: Box<NativeError>,
    },

    #[error(transparent)]
    Marshal(#[from] MarshalError),
}

/// Failures of the programmatic timer API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    #[error("timer {0} does not exist")]
    NotFound(i64),

    #[error("timer {0} has been freed")]
    Freed(i64),

    #[error("timer period must be positive, got {0}ms")]
    InvalidPeriod(i64),
}

/// Failures raised by a script engine while loading or invoking code.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("failed to load '{path}': {reason}")]
    Load { path: String, reason: String },

    #[error("no engine handles '{0}'")]
    UnsupportedModule(String),

    #[error("function '{function}' not found in module {module}")]
    MissingFunction { module: String, function: String },

    #[error("runtime error in '{function}': {reason}")]
    Runtime { function: String, reason: String },

    #[error("script engine {0} is no longer available")]
    EngineGone(usize),
}

/// Error returned by a native entry point back to the calling script.
///
/// `PlayerNotConnected` is a soft failure: the call was well-formed but
/// referenced a session that is not (or no longer) connected. Every other
/// variant is a hard failure of the call itself.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NativeError {
    #[error("player {0} is not connected")]
    PlayerNotConnected(u16),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Timer(#[from] TimerError),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

impl NativeError {
    /// True for failures that only mean "the referenced session is gone",
    /// including ones raised by a nested call.
    pub fn is_soft(&self) -> bool {
        match self {
            NativeError::PlayerNotConnected(_) => true,
            NativeError::Registry(RegistryError::CallFailed { source, .. }) => source.is_soft(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = MarshalError::TypeMismatch {
            position: 2,
            expected: TypeTag::Int,
            found: TypeTag::Str,
        };
        assert_eq!(err.to_string(), "argument 2: expected integer, found string");

        let err = RegistryError::from(MarshalError::ArityMismatch { expected: 1, got: 0 });
        assert_eq!(err.to_string(), "expected 1 arguments, got 0");
    }

    #[test]
    fn test_soft_failures() {
        assert!(NativeError::PlayerNotConnected(3).is_soft());
        assert!(!NativeError::from(TimerError::Freed(1)).is_soft());
        assert!(!NativeError::InvalidArgument("x".into()).is_soft());

        let nested = NativeError::Registry(RegistryError::CallFailed {
            name: "Kick".into(),
            source: Box::new(NativeError::PlayerNotConnected(3)),
        });
        assert!(nested.is_soft());
        let hard = NativeError::Registry(RegistryError::CallFailed {
            name: "Kick".into(),
            source: Box::new(NativeError::InvalidArgument("x".into())),
        });
        assert!(!hard.is_soft());
    }
}
