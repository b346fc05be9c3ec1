//! Built-in natives exposed to every script.
//!
//! Each feature module registers its own functions; [`register_all`] wires
//! them into a registry in a fixed order so name clashes surface at startup.

pub mod publics;
pub mod server;
pub mod timers;

use crate::error::{MarshalError, NativeError, RegistryError};
use crate::functions::FunctionRegistry;
use crate::marshal::Arguments;
use crate::value::{ScriptValue, TypeTag};

/// Registers every built-in native.
pub fn register_all(functions: &FunctionRegistry) -> Result<(), RegistryError> {
    timers::register(functions)?;
    publics::register(functions)?;
    server::register(functions)?;
    Ok(())
}

fn mismatch(args: &Arguments, position: usize, expected: TypeTag) -> NativeError {
    NativeError::Marshal(MarshalError::TypeMismatch {
        position,
        expected,
        found: args.get(position).map(ScriptValue::tag).unwrap_or(TypeTag::Void),
    })
}

pub(crate) fn int_arg(args: &Arguments, position: usize) -> Result<i64, NativeError> {
    args.int(position).ok_or_else(|| mismatch(args, position, TypeTag::Int))
}

pub(crate) fn str_arg(args: &Arguments, position: usize) -> Result<&str, NativeError> {
    args.string(position).ok_or_else(|| mismatch(args, position, TypeTag::Str))
}

pub(crate) fn array_arg(args: &Arguments, position: usize) -> Result<&[ScriptValue], NativeError> {
    args.array(position).ok_or_else(|| mismatch(args, position, TypeTag::Array))
}

pub(crate) fn bool_arg(args: &Arguments, position: usize) -> Result<bool, NativeError> {
    args.boolean(position).ok_or_else(|| mismatch(args, position, TypeTag::Bool))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ScriptError;

    /// Converts a native failure into the error a script engine would raise.
    pub(crate) fn raised(e: RegistryError) -> ScriptError {
        ScriptError::Runtime {
            function: "native".into(),
            reason: e.to_string(),
        }
    }

    #[test]
    fn test_all_natives_registered() {
        let functions = FunctionRegistry::new();
        register_all(&functions).unwrap();

        for name in [
            "CreateTimer",
            "CreateTimerEx",
            "StartTimer",
            "StopTimer",
            "RestartTimer",
            "FreeTimer",
            "IsTimerElapsed",
            "MakePublic",
            "CallPublic",
            "StopServer",
            "SendMessage",
            "CleanChat",
            "Kick",
            "GetPlayerCount",
            "GetMaxPlayers",
            "IsPlayerConnected",
            "GetServerVersion",
            "LogMessage",
        ] {
            let function = functions.lookup(name).unwrap();
            assert!(function.is_native(), "{name} should be native");
        }

        // registering twice clashes on the first name
        assert!(matches!(
            register_all(&functions),
            Err(RegistryError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_argument_helpers() {
        let args = Arguments::from_values(vec![ScriptValue::Int(1), ScriptValue::Str("x".into())]);
        assert_eq!(int_arg(&args, 0), Ok(1));
        assert_eq!(str_arg(&args, 1), Ok("x"));
        assert!(matches!(
            bool_arg(&args, 0),
            Err(NativeError::Marshal(MarshalError::TypeMismatch { position: 0, .. }))
        ));
        assert!(array_arg(&args, 5).is_err());
    }
}
