//! # Argument Marshalling
//!
//! Converts the raw, dynamically-typed argument lists produced by a script
//! engine into validated [`Arguments`] and back again.
//!
//! Unpacking is atomic: the descriptor length is checked before any value is
//! inspected, and the coerced values only become visible to the caller once
//! every position has been converted successfully.

use crate::error::MarshalError;
use crate::value::{ScriptValue, TypeDescriptor, TypeTag};

/// A validated argument list whose values match a [`TypeDescriptor`].
///
/// Accessors index by position and return `None` when the position is out of
/// range or holds a different type, so natives never panic on bad input.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arguments {
    values: Vec<ScriptValue>,
}

impl Arguments {
    /// Wraps values that are already known to be well-typed.
    pub fn from_values(values: Vec<ScriptValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ScriptValue> {
        self.values.get(index)
    }

    pub fn int(&self, index: usize) -> Option<i64> {
        match self.values.get(index) {
            Some(ScriptValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn float(&self, index: usize) -> Option<f64> {
        match self.values.get(index) {
            Some(ScriptValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn string(&self, index: usize) -> Option<&str> {
        match self.values.get(index) {
            Some(ScriptValue::Str(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn array(&self, index: usize) -> Option<&[ScriptValue]> {
        match self.values.get(index) {
            Some(ScriptValue::Array(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn boolean(&self, index: usize) -> Option<bool> {
        match self.values.get(index) {
            Some(ScriptValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn values(&self) -> &[ScriptValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<ScriptValue> {
        self.values
    }
}

/// Validates `raw` against `descriptor`, applying the permitted coercions.
///
/// # Errors
///
/// * [`MarshalError::ArityMismatch`] if the lengths differ
/// * [`MarshalError::TypeMismatch`] for the first position that cannot be
///   coerced
pub fn unpack(raw: &[ScriptValue], descriptor: &TypeDescriptor) -> Result<Arguments, MarshalError> {
    if raw.len() != descriptor.len() {
        return Err(MarshalError::ArityMismatch {
            expected: descriptor.len(),
            got: raw.len(),
        });
    }

    let values = raw
        .iter()
        .zip(descriptor.tags())
        .enumerate()
        .map(|(position, (value, tag))| {
            value.coerce(*tag).ok_or(MarshalError::TypeMismatch {
                position,
                expected: *tag,
                found: value.tag(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Arguments { values })
}

/// Inverse of [`unpack`]: produces the raw list handed to a script engine.
pub fn pack(arguments: &Arguments) -> Vec<ScriptValue> {
    arguments.values.clone()
}

/// Coerces a single return value to `tag`. A `Void` tag discards the value.
pub fn coerce_return(value: ScriptValue, tag: TypeTag) -> Result<ScriptValue, MarshalError> {
    if tag == TypeTag::Void {
        return Ok(ScriptValue::Nil);
    }
    value.coerce(tag).ok_or(MarshalError::TypeMismatch {
        position: 0,
        expected: tag,
        found: value.tag(),
    })
}
