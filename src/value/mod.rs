//! Result values produced by query execution.

mod object;

use std::fmt;

use serde::Serialize;

pub use self::object::Object;

/// A serializable scalar appearing at the leaves of a result tree.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScalarValue {
    /// A signed 32-bit integer.
    Int(i32),
    /// A 64-bit floating point value.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// A boolean.
    Boolean(bool),
}

impl ScalarValue {
    /// The name of this scalar's shape, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "Int",
            Self::Float(_) => "Float",
            Self::String(_) => "String",
            Self::Boolean(_) => "Boolean",
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
        }
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        Self::String(v.into())
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

/// A completed result value: the nested map/list/scalar structure handed to
/// the transport collaborator for serialization.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// The absence of a value.
    Null,
    /// A scalar leaf.
    Scalar(ScalarValue),
    /// An ordered list of values.
    List(Vec<Value>),
    /// An object of response keys to values.
    Object(Object),
}

impl Value {
    /// Constructs a null value.
    pub fn null() -> Self {
        Self::Null
    }

    /// Constructs a scalar value.
    pub fn scalar<S: Into<ScalarValue>>(s: S) -> Self {
        Self::Scalar(s.into())
    }

    /// Constructs a list value.
    pub fn list(l: Vec<Value>) -> Self {
        Self::List(l)
    }

    /// Constructs an object value.
    pub fn object(o: Object) -> Self {
        Self::Object(o)
    }

    /// Whether this value is a null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The contained object, if this value is one.
    pub fn as_object_value(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    /// The contained list, if this value is one.
    pub fn as_list_value(&self) -> Option<&[Value]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }
}

impl<S: Into<ScalarValue>> From<S> for Value {
    fn from(s: S) -> Self {
        Self::Scalar(s.into())
    }
}
