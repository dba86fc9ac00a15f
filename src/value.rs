//! Dynamic attribute values.
//!
//! Features and actions exchange [`Value`]s rather than concrete Rust types so that
//! one pipeline can drive numeric, enumerated, boolean and register attributes. The
//! enum serializes untagged, which keeps cache snapshots and configuration readable:
//!
//! ```
//! use daq_features::Value;
//!
//! let v: Value = serde_json::from_str("1.5").unwrap();
//! assert_eq!(v, Value::Float(1.5));
//! assert_eq!(Value::from("CW").to_string(), "CW");
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A user-facing or wire-facing attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// No value (actions without a result).
    #[default]
    Null,
    /// Boolean state.
    Bool(bool),
    /// Integer quantity.
    Int(i64),
    /// Floating point quantity.
    Float(f64),
    /// Text, including raw device responses.
    Str(String),
    /// Decoded register bits, keyed by bit name.
    Flags(BTreeMap<String, bool>),
    /// Structured value, e.g. an options report.
    Record(BTreeMap<String, Value>),
}

impl Value {
    /// Short type label used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Flags(_) => "flags",
            Value::Record(_) => "record",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    /// Numeric view; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_flags(&self) -> Option<&BTreeMap<String, bool>> {
        match self {
            Value::Flags(flags) => Some(flags),
            _ => None,
        }
    }

    /// Look up a field of a `Record` or a bit of `Flags`.
    pub fn field(&self, key: &str) -> Option<Value> {
        match self {
            Value::Record(fields) => fields.get(key).cloned(),
            Value::Flags(flags) => flags.get(key).map(|b| Value::Bool(*b)),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Equality with integers and floats compared by numeric value.
    pub fn equivalent(&self, other: &Value) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            Value::Flags(flags) => {
                let set: Vec<&str> = flags
                    .iter()
                    .filter(|(_, on)| **on)
                    .map(|(name, _)| name.as_str())
                    .collect();
                f.write_str(&set.join("|"))
            }
            Value::Record(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<BTreeMap<String, bool>> for Value {
    fn from(v: BTreeMap<String, bool>) -> Self {
        Value::Flags(v)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_wire_friendly() {
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Int(-3).to_string(), "-3");
        assert_eq!(Value::Null.to_string(), "");

        let mut flags = BTreeMap::new();
        flags.insert("OVP".to_string(), true);
        flags.insert("OCP".to_string(), false);
        flags.insert("CC".to_string(), true);
        assert_eq!(Value::Flags(flags).to_string(), "CC|OVP");
    }

    #[test]
    fn test_untagged_deserialization() {
        let v: Value = serde_json::from_str(r#"{"OVP": true, "OCP": false}"#).unwrap();
        assert!(matches!(v, Value::Flags(_)));
        let v: Value = serde_json::from_str(r#"{"model": "E3631A", "slots": 3}"#).unwrap();
        assert_eq!(v.field("slots"), Some(Value::Int(3)));
        let v: Value = serde_json::from_str("7").unwrap();
        assert_eq!(v, Value::Int(7));
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Int(4).as_f64(), Some(4.0));
        assert_eq!(Value::Float(4.0).as_i64(), Some(4));
        assert_eq!(Value::Float(4.5).as_i64(), None);
        assert_eq!(Value::from("4").as_f64(), None);
    }

    #[test]
    fn test_equivalence_across_numeric_kinds() {
        assert!(Value::Int(1).equivalent(&Value::Float(1.0)));
        assert!(!Value::Int(1).equivalent(&Value::Float(1.5)));
        assert!(!Value::from("1").equivalent(&Value::Int(1)));
        assert!(Value::from("CW").equivalent(&Value::from("CW")));
    }
}
