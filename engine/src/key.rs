//! Item keys for untyped (JSON) items.
//!
//! Typed clients extract keys with a closure. The server only ever sees JSON,
//! so it needs a serializable description of where the key lives: a
//! [`KeyField`] path such as `"id"` or `"meta.id"`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Resolve a dotted field path inside a JSON value.
pub(crate) fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.get(segment))
}

/// Dotted path to the key field of a JSON item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyField(String);

impl KeyField {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &str {
        &self.0
    }

    /// Extract the key of `item`.
    pub fn extract(&self, item: &Value) -> Result<JsonKey> {
        let raw = resolve(item, &self.0).ok_or_else(|| Error::MissingKey {
            field: self.0.clone(),
        })?;
        JsonKey::try_from(raw)
    }
}

impl From<&str> for KeyField {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for KeyField {
    fn from(path: String) -> Self {
        Self(path)
    }
}

impl fmt::Display for KeyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A scalar JSON key.
///
/// Floats, nulls, arrays and objects cannot be keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonKey {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Str(String),
}

impl JsonKey {
    /// Key as a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            JsonKey::Bool(b) => Value::Bool(*b),
            JsonKey::Int(n) => Value::from(*n),
            JsonKey::UInt(n) => Value::from(*n),
            JsonKey::Str(s) => Value::String(s.clone()),
        }
    }
}

impl TryFrom<&Value> for JsonKey {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(JsonKey::Bool(*b)),
            Value::String(s) => Ok(JsonKey::Str(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(JsonKey::Int(i))
                } else if let Some(u) = n.as_u64() {
                    Ok(JsonKey::UInt(u))
                } else {
                    Err(Error::InvalidKey(format!("non-integer number {n}")))
                }
            }
            other => Err(Error::InvalidKey(format!("unsupported key {other}"))),
        }
    }
}

impl TryFrom<Value> for JsonKey {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        JsonKey::try_from(&value)
    }
}

impl From<&str> for JsonKey {
    fn from(s: &str) -> Self {
        JsonKey::Str(s.to_string())
    }
}

impl From<String> for JsonKey {
    fn from(s: String) -> Self {
        JsonKey::Str(s)
    }
}

impl From<i64> for JsonKey {
    fn from(n: i64) -> Self {
        JsonKey::Int(n)
    }
}

/// Renders the key as it appears as a JSON object member name.
impl fmt::Display for JsonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonKey::Bool(b) => write!(f, "{b}"),
            JsonKey::Int(n) => write!(f, "{n}"),
            JsonKey::UInt(n) => write!(f, "{n}"),
            JsonKey::Str(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_top_level() {
        let field = KeyField::new("id");
        let key = field.extract(&json!({"id": "a", "age": 4})).unwrap();
        assert_eq!(key, JsonKey::from("a"));
    }

    #[test]
    fn extract_nested() {
        let field = KeyField::new("meta.id");
        let key = field.extract(&json!({"meta": {"id": 7}})).unwrap();
        assert_eq!(key, JsonKey::Int(7));
        assert_eq!(key.to_string(), "7");
    }

    #[test]
    fn missing_key() {
        let err = KeyField::new("id").extract(&json!({"name": "x"})).unwrap_err();
        assert_eq!(err, Error::MissingKey { field: "id".into() });
    }

    #[test]
    fn rejects_non_scalar_keys() {
        assert!(matches!(
            JsonKey::try_from(json!(1.5)),
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(
            JsonKey::try_from(json!({"a": 1})),
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(JsonKey::try_from(json!(null)), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn serializes_as_scalar() {
        assert_eq!(serde_json::to_value(JsonKey::from("k")).unwrap(), json!("k"));
        assert_eq!(serde_json::to_value(JsonKey::Int(3)).unwrap(), json!(3));

        let parsed: JsonKey = serde_json::from_value(json!(12)).unwrap();
        assert_eq!(parsed, JsonKey::Int(12));
        assert_eq!(parsed.to_value(), json!(12));
    }
}
