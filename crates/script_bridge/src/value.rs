//! # Boundary Value Types
//!
//! Values crossing the native/script boundary are modelled as a tagged union,
//! [`ScriptValue`], and every native entry point or callback carries a
//! [`Signature`] built from one-character type tags.
//!
//! ## Type Tags
//!
//! | Tag | Meaning                         |
//! |-----|---------------------------------|
//! | `i` | 64-bit signed integer           |
//! | `f` | 64-bit float                    |
//! | `s` | UTF-8 string                    |
//! | `a` | array of values                 |
//! | `b` | boolean                         |
//! | `v` | void (return position only)     |
//!
//! Natives whose result type depends on their input (such as forwarding a
//! call to a published script function) declare [`TypeTag::Any`], which has
//! no descriptor character and can only be built in code.

use crate::error::MarshalError;
use std::fmt;

/// Short integer identifier of a connected player session.
pub type PlayerId = u16;

/// A dynamically-typed value passed between the server and a script engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    /// Absence of a value (void returns, script `()`/`nil`)
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<ScriptValue>),
}

impl ScriptValue {
    /// Returns the tag describing this value's runtime type.
    pub fn tag(&self) -> TypeTag {
        match self {
            ScriptValue::Nil => TypeTag::Void,
            ScriptValue::Bool(_) => TypeTag::Bool,
            ScriptValue::Int(_) => TypeTag::Int,
            ScriptValue::Float(_) => TypeTag::Float,
            ScriptValue::Str(_) => TypeTag::Str,
            ScriptValue::Array(_) => TypeTag::Array,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, ScriptValue::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScriptValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScriptValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::Str(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// The value a native reports when a soft failure suppresses its result.
    pub fn default_for(tag: TypeTag) -> Self {
        match tag {
            TypeTag::Int => ScriptValue::Int(0),
            TypeTag::Float => ScriptValue::Float(0.0),
            TypeTag::Str => ScriptValue::Str(String::new()),
            TypeTag::Array => ScriptValue::Array(Vec::new()),
            TypeTag::Bool => ScriptValue::Bool(false),
            TypeTag::Void | TypeTag::Any => ScriptValue::Nil,
        }
    }

    /// Coerces this value to `tag`, or returns `None` if no coercion exists.
    ///
    /// Permitted widenings: integer to float, integer to boolean (non-zero)
    /// and boolean to integer (0/1). Every other pair must match exactly.
    pub fn coerce(&self, tag: TypeTag) -> Option<ScriptValue> {
        match (tag, self) {
            (TypeTag::Any, value) => Some(value.clone()),
            (TypeTag::Void, ScriptValue::Nil) => Some(ScriptValue::Nil),
            (TypeTag::Int, ScriptValue::Int(v)) => Some(ScriptValue::Int(*v)),
            (TypeTag::Int, ScriptValue::Bool(v)) => Some(ScriptValue::Int(i64::from(*v))),
            (TypeTag::Float, ScriptValue::Float(v)) => Some(ScriptValue::Float(*v)),
            (TypeTag::Float, ScriptValue::Int(v)) => Some(ScriptValue::Float(*v as f64)),
            (TypeTag::Bool, ScriptValue::Bool(v)) => Some(ScriptValue::Bool(*v)),
            (TypeTag::Bool, ScriptValue::Int(v)) => Some(ScriptValue::Bool(*v != 0)),
            (TypeTag::Str, ScriptValue::Str(v)) => Some(ScriptValue::Str(v.clone())),
            (TypeTag::Array, ScriptValue::Array(v)) => Some(ScriptValue::Array(v.clone())),
            _ => None,
        }
    }

    /// Converts a JSON document into a script value.
    ///
    /// Objects have no script representation and are rendered as their JSON
    /// text so scripts can still inspect them.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ScriptValue::Nil,
            serde_json::Value::Bool(b) => ScriptValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => ScriptValue::Int(i),
                None => ScriptValue::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => ScriptValue::Str(s.clone()),
            serde_json::Value::Array(items) => {
                ScriptValue::Array(items.iter().map(ScriptValue::from_json).collect())
            }
            serde_json::Value::Object(_) => ScriptValue::Str(value.to_string()),
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Nil => write!(f, "nil"),
            ScriptValue::Bool(v) => write!(f, "{v}"),
            ScriptValue::Int(v) => write!(f, "{v}"),
            ScriptValue::Float(v) => write!(f, "{v}"),
            ScriptValue::Str(v) => write!(f, "{v}"),
            ScriptValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for ScriptValue {
    fn from(value: i64) -> Self {
        ScriptValue::Int(value)
    }
}

impl From<PlayerId> for ScriptValue {
    fn from(value: PlayerId) -> Self {
        ScriptValue::Int(i64::from(value))
    }
}

impl From<i32> for ScriptValue {
    fn from(value: i32) -> Self {
        ScriptValue::Int(i64::from(value))
    }
}

impl From<f64> for ScriptValue {
    fn from(value: f64) -> Self {
        ScriptValue::Float(value)
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        ScriptValue::Bool(value)
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        ScriptValue::Str(value.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        ScriptValue::Str(value)
    }
}

impl From<Vec<ScriptValue>> for ScriptValue {
    fn from(value: Vec<ScriptValue>) -> Self {
        ScriptValue::Array(value)
    }
}

/// One-character type tag used in descriptors and signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Int,
    Float,
    Str,
    Array,
    Bool,
    Void,
    /// Passes any value through unchanged
    Any,
}

impl TypeTag {
    /// Parses a single descriptor character. `Any` is never produced.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'i' => Some(TypeTag::Int),
            'f' => Some(TypeTag::Float),
            's' => Some(TypeTag::Str),
            'a' => Some(TypeTag::Array),
            'b' => Some(TypeTag::Bool),
            'v' => Some(TypeTag::Void),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            TypeTag::Int => 'i',
            TypeTag::Float => 'f',
            TypeTag::Str => 's',
            TypeTag::Array => 'a',
            TypeTag::Bool => 'b',
            TypeTag::Void => 'v',
            TypeTag::Any => '*',
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeTag::Int => "integer",
            TypeTag::Float => "float",
            TypeTag::Str => "string",
            TypeTag::Array => "array",
            TypeTag::Bool => "boolean",
            TypeTag::Void => "void",
            TypeTag::Any => "any",
        };
        f.write_str(name)
    }
}

/// Ordered parameter tags, parsed from a descriptor string such as `"isf"`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeDescriptor {
    tags: Vec<TypeTag>,
}

impl TypeDescriptor {
    /// Parses a parameter descriptor. `v` is rejected since a parameter
    /// cannot be void.
    pub fn parse(descriptor: &str) -> Result<Self, MarshalError> {
        let tags = descriptor
            .chars()
            .enumerate()
            .map(|(position, c)| match TypeTag::from_char(c) {
                Some(TypeTag::Void) | None => Err(MarshalError::UnknownTag { position, tag: c }),
                Some(tag) => Ok(tag),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { tags })
    }

    pub fn from_tags(tags: Vec<TypeTag>) -> Self {
        Self { tags }
    }

    pub fn tags(&self) -> &[TypeTag] {
        &self.tags
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for tag in &self.tags {
            write!(f, "{}", tag.as_char())?;
        }
        Ok(())
    }
}

/// Return tag plus parameter descriptor of an exported function or callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub returns: TypeTag,
    pub params: TypeDescriptor,
}

impl Signature {
    /// Builds a signature from a return character and a parameter string,
    /// e.g. `Signature::parse('b', "i")`.
    pub fn parse(returns: char, params: &str) -> Result<Self, MarshalError> {
        let returns = TypeTag::from_char(returns)
            .ok_or(MarshalError::UnknownTag { position: 0, tag: returns })?;
        Ok(Self {
            returns,
            params: TypeDescriptor::parse(params)?,
        })
    }

    pub fn new(returns: TypeTag, params: &[TypeTag]) -> Self {
        Self {
            returns,
            params: TypeDescriptor::from_tags(params.to_vec()),
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) -> {}", self.params, self.returns.as_char())
    }
}
