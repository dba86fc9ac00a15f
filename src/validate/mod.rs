//! Value validation and conversion.
//!
//! Everything in this module is pure: no I/O, no node state. The pipeline composes
//! these checks into named steps (`extract`, `reverse_map`, `register`, `cast` after
//! reading; `validate`, `map`, `register` before writing).
//!
//! Named limits are the one exception that needs the live node: a [`LimitsSpec`]
//! only carries the limit's name, and the pipeline resolves it through the node.

mod extract;
mod limits;
mod mapping;
mod register;
mod unit;

pub use extract::Extractor;
pub use limits::{FloatLimits, IntLimits, Limits};
pub use mapping::Mapping;
pub use register::RegisterLayout;
pub use unit::{Quantity, Unit};

use crate::error::{DriverError, DriverResult};
use crate::value::Value;

/// Declared type of a feature value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueKind {
    /// No conversion, values pass through unchanged.
    #[default]
    Any,
    Str,
    Int,
    Float,
    Bool,
    /// Bit flags decoded through a [`RegisterLayout`].
    Register,
}

/// Where a feature's numeric limits come from.
#[derive(Debug, Clone, PartialEq)]
pub enum LimitsSpec {
    /// Fixed limits known at declaration time.
    Static(Limits),
    /// Limits computed by the owning node under this name, cached per node.
    Named(String),
}

impl From<Limits> for LimitsSpec {
    fn from(limits: Limits) -> Self {
        LimitsSpec::Static(limits)
    }
}

impl From<IntLimits> for LimitsSpec {
    fn from(limits: IntLimits) -> Self {
        LimitsSpec::Static(Limits::Int(limits))
    }
}

impl From<FloatLimits> for LimitsSpec {
    fn from(limits: FloatLimits) -> Self {
        LimitsSpec::Static(Limits::Float(limits))
    }
}

impl From<&str> for LimitsSpec {
    fn from(name: &str) -> Self {
        LimitsSpec::Named(name.to_string())
    }
}

/// Validator configuration of one feature.
#[derive(Debug, Clone, Default)]
pub struct ValueSpec {
    pub kind: ValueKind,
    /// Allowed user values; empty means unrestricted.
    pub values: Vec<Value>,
    pub mapping: Option<Mapping>,
    pub limits: Option<LimitsSpec>,
    pub register: Option<RegisterLayout>,
    /// Alternate spellings accepted for boolean true/false.
    pub aliases: Vec<(String, bool)>,
    pub extract: Option<Extractor>,
    /// Unit of a float feature; quantities given as text are scaled to it.
    pub unit: Option<Unit>,
}

impl ValueSpec {
    /// Bring a user value into the canonical form used for caching and comparison.
    pub fn canonicalize(&self, attribute: &str, value: Value) -> DriverResult<Value> {
        let wrong_type = |value: &Value, expected: &str| {
            DriverError::invalid_argument(
                attribute,
                format!("expected {expected}, got {} '{value}'", value.kind_name()),
            )
        };
        match self.kind {
            ValueKind::Any => Ok(value),
            ValueKind::Str => match value {
                Value::Str(_) => Ok(value),
                other => Err(wrong_type(&other, "a string")),
            },
            ValueKind::Int => value
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| wrong_type(&value, "an integer")),
            ValueKind::Float => match (&value, &self.unit) {
                (Value::Str(text), Some(unit)) => unit.parse(attribute, text).map(Value::Float),
                _ => value
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| wrong_type(&value, "a number")),
            },
            ValueKind::Bool => match &value {
                Value::Bool(_) => Ok(value),
                Value::Int(0) => Ok(Value::Bool(false)),
                Value::Int(1) => Ok(Value::Bool(true)),
                Value::Str(s) => self
                    .alias(s)
                    .map(Value::Bool)
                    .ok_or_else(|| wrong_type(&value, "a boolean or one of its aliases")),
                _ => Err(wrong_type(&value, "a boolean")),
            },
            ValueKind::Register => match &self.register {
                Some(layout) => layout.canonicalize(attribute, &value),
                None => Ok(value),
            },
        }
    }

    fn alias(&self, text: &str) -> Option<bool> {
        self.aliases
            .iter()
            .find(|(alias, _)| alias == text)
            .map(|(_, state)| *state)
    }

    /// Reject values outside the declared value set.
    pub fn check_values(&self, attribute: &str, value: &Value) -> DriverResult<()> {
        if self.values.is_empty() || self.values.contains(value) {
            return Ok(());
        }
        let allowed: Vec<String> = self.values.iter().map(|v| format!("'{v}'")).collect();
        Err(DriverError::invalid_argument(
            attribute,
            format!(
                "allowed values are [{}], '{value}' not allowed",
                allowed.join(", ")
            ),
        ))
    }

    /// Convert a raw device answer to the declared type.
    pub fn cast_response(&self, attribute: &str, raw: Value) -> DriverResult<Value> {
        let text = match raw {
            Value::Str(text) => text,
            other => {
                return self
                    .canonicalize(attribute, other)
                    .map_err(|e| DriverError::invalid_response(attribute, e.to_string()))
            }
        };
        let trimmed = text.trim();
        let bad = |expected: &str| {
            DriverError::invalid_response(attribute, format!("'{trimmed}' is not {expected}"))
        };
        match self.kind {
            ValueKind::Any | ValueKind::Register => Ok(Value::Str(text)),
            ValueKind::Str => Ok(Value::Str(trimmed.to_string())),
            ValueKind::Int => trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.fract() == 0.0)
                        .map(|f| f as i64)
                })
                .map(Value::Int)
                .ok_or_else(|| bad("an integer")),
            ValueKind::Float => trimmed
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| bad("a number")),
            ValueKind::Bool => self
                .alias(trimmed)
                .or_else(|| match trimmed.to_ascii_uppercase().as_str() {
                    "1" | "ON" | "TRUE" => Some(true),
                    "0" | "OFF" | "FALSE" => Some(false),
                    _ => None,
                })
                .map(Value::Bool)
                .ok_or_else(|| bad("a boolean")),
        }
    }
}
