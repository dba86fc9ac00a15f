//! Numeric range and resolution checks.
//!
//! A limit may bound a value from below, from above or both, and may impose a
//! resolution (step). The step grid starts at the minimum when there is one, and at
//! the maximum otherwise.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DriverError, DriverResult};
use crate::value::Value;

/// Tolerance used when checking a float against its step grid.
const FLOAT_STEP_TOLERANCE: f64 = 1e-9;

/// Integer range with optional resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntLimits {
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub step: Option<i64>,
}

impl IntLimits {
    pub fn new(min: Option<i64>, max: Option<i64>, step: Option<i64>) -> DriverResult<Self> {
        if min.is_none() && max.is_none() {
            return Err(DriverError::Configuration(
                "integer limits need at least a minimum or a maximum".to_string(),
            ));
        }
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(DriverError::Configuration(format!(
                    "integer limits minimum {lo} is above maximum {hi}"
                )));
            }
        }
        if matches!(step, Some(s) if s <= 0) {
            return Err(DriverError::Configuration(
                "integer limits step must be positive".to_string(),
            ));
        }
        Ok(Self { min, max, step })
    }

    /// Closed range `[min, max]` without resolution.
    pub fn range(min: i64, max: i64) -> DriverResult<Self> {
        Self::new(Some(min), Some(max), None)
    }

    pub fn with_step(self, step: i64) -> DriverResult<Self> {
        Self::new(self.min, self.max, Some(step))
    }

    pub fn validate(&self, value: i64) -> bool {
        if matches!(self.min, Some(lo) if value < lo) || matches!(self.max, Some(hi) if value > hi)
        {
            return false;
        }
        match (self.step, self.min.or(self.max)) {
            // Widened: an open range lets `value` sit anywhere relative to `base`.
            (Some(step), Some(base)) => {
                (i128::from(value) - i128::from(base)) % i128::from(step) == 0
            }
            _ => true,
        }
    }
}

/// Floating point range with optional resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloatLimits {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
}

impl FloatLimits {
    pub fn new(min: Option<f64>, max: Option<f64>, step: Option<f64>) -> DriverResult<Self> {
        if min.is_none() && max.is_none() {
            return Err(DriverError::Configuration(
                "float limits need at least a minimum or a maximum".to_string(),
            ));
        }
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(DriverError::Configuration(format!(
                    "float limits minimum {lo} is above maximum {hi}"
                )));
            }
        }
        if matches!(step, Some(s) if !(s > 0.0)) {
            return Err(DriverError::Configuration(
                "float limits step must be positive".to_string(),
            ));
        }
        Ok(Self { min, max, step })
    }

    pub fn range(min: f64, max: f64) -> DriverResult<Self> {
        Self::new(Some(min), Some(max), None)
    }

    pub fn with_step(self, step: f64) -> DriverResult<Self> {
        Self::new(self.min, self.max, Some(step))
    }

    pub fn validate(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        if matches!(self.min, Some(lo) if value < lo) || matches!(self.max, Some(hi) if value > hi)
        {
            return false;
        }
        match (self.step, self.min.or(self.max)) {
            (Some(step), Some(base)) => {
                let ratio = ((value - base).abs() / step * 1e9).round() / 1e9;
                ratio.fract() < FLOAT_STEP_TOLERANCE
            }
            _ => true,
        }
    }
}

/// Limits attached to a numeric feature or action argument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Limits {
    Int(IntLimits),
    Float(FloatLimits),
}

impl Limits {
    /// Check `value` and return it in the numeric type of the limits.
    pub fn check(&self, attribute: &str, value: &Value) -> DriverResult<Value> {
        match self {
            Limits::Int(limits) => {
                let v = value.as_i64().ok_or_else(|| {
                    DriverError::invalid_argument(
                        attribute,
                        format!("expected an integer, got {} '{value}'", value.kind_name()),
                    )
                })?;
                if limits.validate(v) {
                    Ok(Value::Int(v))
                } else {
                    Err(DriverError::invalid_argument(
                        attribute,
                        format!("{v} is out of limits: {self}"),
                    ))
                }
            }
            Limits::Float(limits) => {
                let v = value.as_f64().ok_or_else(|| {
                    DriverError::invalid_argument(
                        attribute,
                        format!("expected a number, got {} '{value}'", value.kind_name()),
                    )
                })?;
                if limits.validate(v) {
                    Ok(Value::Float(v))
                } else {
                    Err(DriverError::invalid_argument(
                        attribute,
                        format!("{v} is out of limits: {self}"),
                    ))
                }
            }
        }
    }
}

impl From<IntLimits> for Limits {
    fn from(limits: IntLimits) -> Self {
        Limits::Int(limits)
    }
}

impl From<FloatLimits> for Limits {
    fn from(limits: FloatLimits) -> Self {
        Limits::Float(limits)
    }
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (min, max, step) = match self {
            Limits::Int(l) => (
                l.min.map(|v| v.to_string()),
                l.max.map(|v| v.to_string()),
                l.step.map(|v| v.to_string()),
            ),
            Limits::Float(l) => (
                l.min.map(|v| v.to_string()),
                l.max.map(|v| v.to_string()),
                l.step.map(|v| v.to_string()),
            ),
        };
        let mut parts = Vec::new();
        if let Some(min) = min {
            parts.push(format!("minimum {min}"));
        }
        if let Some(max) = max {
            parts.push(format!("maximum {max}"));
        }
        if let Some(step) = step {
            parts.push(format!("step {step}"));
        }
        f.write_str(&parts.join(", "))
    }
}
