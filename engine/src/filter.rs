//! Serializable item predicates.
//!
//! A [`Filter`] is a small closed expression language over JSON items: field
//! comparisons combined with `and`, `or` and `not`. Filters cross the wire as
//! opaque text produced by a [`PredicateCodec`], so both peers evaluate the
//! same predicate.
//!
//! ```rust
//! use keysync_engine::Filter;
//! use serde_json::json;
//!
//! let adults = Filter::greater_or_equal("age", 18).and(Filter::equals("active", true));
//!
//! assert!(adults.matches(&json!({"age": 30, "active": true})));
//! assert!(!adults.matches(&json!({"age": 12, "active": true})));
//! ```

use crate::error::{Error, Result};
use crate::key::resolve;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// A predicate over JSON items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    /// Matches everything
    All,
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    Lt { field: String, value: Value },
    Le { field: String, value: Value },
    Gt { field: String, value: Value },
    Ge { field: String, value: Value },
    /// String field contains a substring
    Contains { field: String, value: String },
    /// Field value is one of `values`
    In { field: String, values: Vec<Value> },
    And { filters: Vec<Filter> },
    Or { filters: Vec<Filter> },
    Not { filter: Box<Filter> },
}

impl Filter {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn not_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn less_than(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn less_or_equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Le {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn greater_than(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn greater_or_equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ge {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn one_of(field: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Filter::In {
            field: field.into(),
            values: values.into_iter().collect(),
        }
    }

    /// Both `self` and `other` must match.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And { mut filters } => {
                filters.push(other);
                Filter::And { filters }
            }
            first => Filter::And {
                filters: vec![first, other],
            },
        }
    }

    /// Either `self` or `other` must match.
    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or { mut filters } => {
                filters.push(other);
                Filter::Or { filters }
            }
            first => Filter::Or {
                filters: vec![first, other],
            },
        }
    }

    /// Evaluate against a JSON item. Missing fields never satisfy a comparison.
    pub fn matches(&self, item: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq { field, value } => {
                resolve(item, field).is_some_and(|actual| values_equal(actual, value))
            }
            Filter::Ne { field, value } => {
                !resolve(item, field).is_some_and(|actual| values_equal(actual, value))
            }
            Filter::Lt { field, value } => compare_field(item, field, value, Ordering::is_lt),
            Filter::Le { field, value } => compare_field(item, field, value, Ordering::is_le),
            Filter::Gt { field, value } => compare_field(item, field, value, Ordering::is_gt),
            Filter::Ge { field, value } => compare_field(item, field, value, Ordering::is_ge),
            Filter::Contains { field, value } => resolve(item, field)
                .and_then(Value::as_str)
                .is_some_and(|s| s.contains(value.as_str())),
            Filter::In { field, values } => resolve(item, field)
                .is_some_and(|actual| values.iter().any(|v| values_equal(actual, v))),
            Filter::And { filters } => filters.iter().all(|f| f.matches(item)),
            Filter::Or { filters } => filters.iter().any(|f| f.matches(item)),
            Filter::Not { filter } => !filter.matches(item),
        }
    }

    /// Evaluate against any serializable item.
    pub fn matches_item<T: Serialize>(&self, item: &T) -> bool {
        if matches!(self, Filter::All) {
            return true;
        }
        serde_json::to_value(item)
            .map(|value| self.matches(&value))
            .unwrap_or(false)
    }

    /// Check that every field path is non-empty.
    pub fn validate(&self) -> Result<()> {
        match self {
            Filter::All => Ok(()),
            Filter::Eq { field, .. }
            | Filter::Ne { field, .. }
            | Filter::Lt { field, .. }
            | Filter::Le { field, .. }
            | Filter::Gt { field, .. }
            | Filter::Ge { field, .. }
            | Filter::Contains { field, .. }
            | Filter::In { field, .. } => {
                if field.is_empty() || field.split('.').any(str::is_empty) {
                    Err(Error::InvalidFilter(format!("bad field path '{field}'")))
                } else {
                    Ok(())
                }
            }
            Filter::And { filters } | Filter::Or { filters } => {
                filters.iter().try_for_each(Filter::validate)
            }
            Filter::Not { filter } => filter.validate(),
        }
    }
}

impl std::ops::Not for Filter {
    type Output = Filter;

    fn not(self) -> Filter {
        Filter::Not {
            filter: Box::new(self),
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare_field(item: &Value, field: &str, value: &Value, test: fn(Ordering) -> bool) -> bool {
    resolve(item, field)
        .and_then(|actual| compare_values(actual, value))
        .is_some_and(test)
}

/// Turns filters into wire text and back.
pub trait PredicateCodec: Send + Sync {
    fn encode(&self, filter: &Filter) -> Result<String>;

    fn decode(&self, text: &str) -> Result<Filter>;
}

/// Encodes filters as their JSON form.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPredicateCodec;

impl PredicateCodec for JsonPredicateCodec {
    fn encode(&self, filter: &Filter) -> Result<String> {
        filter.validate()?;
        serde_json::to_string(filter).map_err(Error::serialization)
    }

    fn decode(&self, text: &str) -> Result<Filter> {
        let filter: Filter =
            serde_json::from_str(text).map_err(|e| Error::InvalidFilter(e.to_string()))?;
        filter.validate()?;
        Ok(filter)
    }
}
