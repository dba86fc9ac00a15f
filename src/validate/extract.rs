//! Response extraction patterns.
//!
//! A pattern such as `"VOLT {}V"` describes where the meaningful token sits inside
//! a raw response. It is compiled once into an anchored regex.

use regex::Regex;

use crate::error::{DriverError, DriverResult};

/// Compiled extraction pattern with exactly one `{}` placeholder.
#[derive(Debug, Clone)]
pub struct Extractor {
    pattern: String,
    regex: Regex,
}

impl Extractor {
    pub fn new(pattern: &str) -> DriverResult<Self> {
        let placeholder = find_placeholder(pattern).ok_or_else(|| {
            DriverError::Configuration(format!("extract pattern '{pattern}' has no placeholder"))
        })?;
        let (prefix, rest) = pattern.split_at(placeholder.0);
        let suffix = &rest[placeholder.1..];
        if find_placeholder(suffix).is_some() {
            return Err(DriverError::Configuration(format!(
                "extract pattern '{pattern}' has more than one placeholder"
            )));
        }
        let source = format!(
            r"^\s*{}(.*?){}\s*$",
            regex::escape(prefix),
            regex::escape(suffix)
        );
        let regex = Regex::new(&source)
            .map_err(|e| DriverError::Configuration(format!("extract pattern '{pattern}': {e}")))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn extract(&self, attribute: &str, raw: &str) -> DriverResult<String> {
        self.regex
            .captures(raw)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .ok_or_else(|| {
                DriverError::invalid_response(
                    attribute,
                    format!("'{raw}' does not match pattern '{}'", self.pattern),
                )
            })
    }
}

/// Byte offset and length of the first `{...}` placeholder.
fn find_placeholder(pattern: &str) -> Option<(usize, usize)> {
    let start = pattern.find('{')?;
    let len = pattern[start..].find('}')? + 1;
    Some((start, len))
}
