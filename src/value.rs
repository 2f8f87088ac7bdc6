//! Tagged property values for pattern contexts, actions, and node properties.
//!
//! Free-form string-keyed maps in the store carry [`Value`]s rather than an
//! untyped blob, so `{min, max}` range conditions stay first-class and
//! comparable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Property maps are ordered so records serialize deterministically.
pub type ValueMap = BTreeMap<String, Value>;

/// A single property value: scalar, list, or numeric range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    /// An inclusive numeric range, used for applicability conditions like
    /// `complexity: {min: 10, max: 50}`.
    Range { min: f64, max: f64 },
}

impl Value {
    /// Whether this value, read as a condition, accepts a concrete value.
    ///
    /// A `Range` accepts any `Number` within its bounds, a `List` accepts any
    /// of its members, and everything else requires exact equality.
    pub fn accepts(&self, concrete: &Value) -> bool {
        match (self, concrete) {
            (Value::Range { min, max }, Value::Number(n)) => *n >= *min && *n <= *max,
            (Value::List(options), other) => options.iter().any(|v| v == other),
            (a, b) => a == b,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_accepts_number_within_bounds() {
        let range = Value::Range {
            min: 10.0,
            max: 50.0,
        };
        assert!(range.accepts(&Value::Number(10.0)));
        assert!(range.accepts(&Value::Number(35.5)));
        assert!(range.accepts(&Value::Number(50.0)));
        assert!(!range.accepts(&Value::Number(50.1)));
        assert!(!range.accepts(&Value::Number(9.9)));
    }

    #[test]
    fn range_rejects_non_numbers() {
        let range = Value::Range { min: 0.0, max: 1.0 };
        assert!(!range.accepts(&Value::String("0.5".into())));
        assert!(!range.accepts(&Value::Bool(true)));
    }

    #[test]
    fn list_accepts_members() {
        let list = Value::List(vec!["rust".into(), "python".into()]);
        assert!(list.accepts(&Value::String("rust".into())));
        assert!(!list.accepts(&Value::String("go".into())));
    }

    #[test]
    fn scalars_require_exact_equality() {
        assert!(Value::Bool(true).accepts(&Value::Bool(true)));
        assert!(!Value::Bool(true).accepts(&Value::Bool(false)));
        assert!(Value::Number(3.0).accepts(&Value::Number(3.0)));
    }

    #[test]
    fn serde_round_trip() {
        let v = Value::Range {
            min: 1.0,
            max: 2.0,
        };
        let bytes = bincode::serialize(&v).unwrap();
        let back: Value = bincode::deserialize(&bytes).unwrap();
        assert_eq!(v, back);
    }
}
