//! Units of float features.
//!
//! A float feature may declare the unit its values are expressed in (`"V"`, `"Hz"`).
//! Callers can then set it from a quantity such as `"250 mV"`: the magnitude is
//! scaled to the declared unit before validation, so limits and the cache always
//! hold values in that unit. Only SI-prefixed forms of the declared unit convert.

use regex::Regex;
use std::fmt;

use crate::error::{DriverError, DriverResult};
use crate::value::Value;

const SI_PREFIXES: &[(&str, f64)] = &[
    ("T", 1e12),
    ("G", 1e9),
    ("M", 1e6),
    ("k", 1e3),
    ("m", 1e-3),
    ("u", 1e-6),
    ("µ", 1e-6),
    ("n", 1e-9),
    ("p", 1e-12),
    ("f", 1e-15),
];

/// A magnitude with its unit symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub magnitude: f64,
    pub unit: String,
}

impl Quantity {
    pub fn new(magnitude: f64, unit: &str) -> Self {
        Self {
            magnitude,
            unit: unit.to_string(),
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", Value::Float(self.magnitude), self.unit)
    }
}

/// Quantities travel through the pipeline in their text form.
impl From<Quantity> for Value {
    fn from(quantity: Quantity) -> Self {
        Value::Str(quantity.to_string())
    }
}

/// Declared unit of a feature.
#[derive(Debug, Clone)]
pub struct Unit {
    symbol: String,
    pattern: Regex,
}

impl Unit {
    pub fn new(symbol: &str) -> DriverResult<Self> {
        let symbol = symbol.trim();
        if symbol.is_empty() || symbol.contains(char::is_whitespace) {
            return Err(DriverError::Configuration(format!(
                "invalid unit symbol '{symbol}'"
            )));
        }
        let pattern = Regex::new(r"^\s*([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)\s*(\S*)\s*$")
            .map_err(|e| DriverError::Configuration(e.to_string()))?;
        Ok(Self {
            symbol: symbol.to_string(),
            pattern,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Scale factor from `unit` to this unit, if `unit` is a prefixed form of it.
    fn factor(&self, unit: &str) -> Option<f64> {
        if unit.is_empty() || unit == self.symbol {
            return Some(1.0);
        }
        let prefix = unit.strip_suffix(self.symbol.as_str())?;
        SI_PREFIXES
            .iter()
            .find(|(p, _)| *p == prefix)
            .map(|(_, factor)| *factor)
    }

    /// Magnitude of `text` (e.g. `"250 mV"`) expressed in this unit.
    pub fn parse(&self, attribute: &str, text: &str) -> DriverResult<f64> {
        let captures = self.pattern.captures(text).ok_or_else(|| {
            DriverError::invalid_argument(attribute, format!("'{text}' is not a quantity"))
        })?;
        let magnitude: f64 = captures[1].parse().map_err(|_| {
            DriverError::invalid_argument(attribute, format!("'{text}' is not a quantity"))
        })?;
        let unit = &captures[2];
        let factor = self.factor(unit).ok_or_else(|| {
            DriverError::invalid_argument(
                attribute,
                format!("cannot convert '{unit}' to '{}'", self.symbol),
            )
        })?;
        Ok(magnitude * factor)
    }

    pub fn quantity(&self, magnitude: f64) -> Quantity {
        Quantity::new(magnitude, &self.symbol)
    }
}
