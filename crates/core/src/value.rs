use serde::{Deserialize, Serialize};

/// Payload stored in the global table.
///
/// Reads name the kind they expect; a mismatch is reported instead of coerced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Vector(Vec<f64>),
    /// Arbitrary structured payload.
    Json(serde_json::Value),
}

impl Value {
    /// Kind name used in type-mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Vector(_) => "vector",
            Value::Json(_) => "json",
        }
    }

    /// Extract as string, returning None for anything but Text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Typed extraction out of a [`Value`].
pub trait FromValue: Sized {
    /// Kind name this type expects.
    const KIND: &'static str;

    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! value_kind {
    ($ty:ty, $variant:ident, $kind:literal) => {
        impl FromValue for $ty {
            const KIND: &'static str = $kind;

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        }
    };
}

value_kind!(bool, Boolean, "boolean");
value_kind!(i64, Integer, "integer");
value_kind!(f64, Float, "float");
value_kind!(String, Text, "text");
value_kind!(Vec<f64>, Vector, "vector");
value_kind!(serde_json::Value, Json, "json");

impl FromValue for Value {
    const KIND: &'static str = "any";

    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}
