//! Bit-flag registers.
//!
//! A register maps the bits of an integer to names. Unnamed positions are reported
//! as `BIT_<n>` so no information from the device is lost.

use std::collections::BTreeMap;

use crate::error::{DriverError, DriverResult};
use crate::value::Value;

/// Bit layout of a status or enable register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterLayout {
    names: Vec<String>,
}

impl RegisterLayout {
    /// `names[i]` labels bit `i`; an empty name leaves the bit unnamed.
    /// The width is rounded up to a multiple of 8.
    pub fn new<I, S>(names: I) -> DriverResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.len() > 64 {
            return Err(DriverError::Configuration(format!(
                "register declares {} bits, at most 64 are supported",
                names.len()
            )));
        }
        let width = names.len().div_ceil(8).max(1) * 8;
        for (bit, name) in names.iter_mut().enumerate() {
            if name.is_empty() {
                *name = format!("BIT_{bit}");
            }
        }
        for bit in names.len()..width {
            names.push(format!("BIT_{bit}"));
        }
        Ok(Self { names })
    }

    pub fn width(&self) -> usize {
        self.names.len()
    }

    pub fn decode(&self, raw: u64) -> BTreeMap<String, bool> {
        self.names
            .iter()
            .enumerate()
            .map(|(bit, name)| (name.clone(), raw & (1u64 << bit) != 0))
            .collect()
    }

    pub fn encode(&self, attribute: &str, flags: &BTreeMap<String, bool>) -> DriverResult<u64> {
        let mut raw = 0u64;
        for (name, on) in flags {
            let bit = self
                .names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| {
                    DriverError::invalid_argument(attribute, format!("unknown register bit '{name}'"))
                })?;
            if *on {
                raw |= 1u64 << bit;
            }
        }
        Ok(raw)
    }

    /// Decode a raw device response (decimal text or integer) into flags.
    pub fn decode_response(&self, attribute: &str, raw: &Value) -> DriverResult<Value> {
        let bits = match raw {
            Value::Int(i) => u64::try_from(*i).ok(),
            Value::Str(s) => parse_register_text(s.trim()),
            Value::Flags(_) => return Ok(raw.clone()),
            _ => None,
        }
        .ok_or_else(|| {
            DriverError::invalid_response(attribute, format!("'{raw}' is not a register value"))
        })?;
        Ok(Value::Flags(self.decode(bits)))
    }

    /// Canonical flags for a user value (flags or an integer bit pattern).
    pub fn canonicalize(&self, attribute: &str, value: &Value) -> DriverResult<Value> {
        match value {
            Value::Flags(flags) => {
                let raw = self.encode(attribute, flags)?;
                Ok(Value::Flags(self.decode(raw)))
            }
            Value::Int(i) => u64::try_from(*i)
                .map(|raw| Value::Flags(self.decode(raw)))
                .map_err(|_| DriverError::invalid_argument(attribute, "negative register value")),
            other => Err(DriverError::invalid_argument(
                attribute,
                format!("expected register flags, got {}", other.kind_name()),
            )),
        }
    }
}

fn parse_register_text(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("#H")) {
        return u64::from_str_radix(hex, 16).ok();
    }
    // Some instruments answer with a float such as "+8.00000000E+00".
    text.parse::<u64>()
        .ok()
        .or_else(|| text.parse::<f64>().ok().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
}
