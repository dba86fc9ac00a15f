//! The staged get/set/call execution pipeline.
//!
//! # Architecture
//!
//! Every feature read runs `pre_get → get → post_get`, every write runs
//! `pre_set → set → post_set`, every action call runs `pre_call → call →
//! post_call`. Each stage other than the middle one is a [`StepChain`] of named
//! steps that callers may extend. Around the stages the pipeline applies:
//!
//! 1. node access options, then the attribute's options gates (memoised),
//! 2. checks gates (every access),
//! 3. the node cache (reads) or the canonical-equality short-circuit (writes),
//! 4. retry with reconnect on transport-classified failures, re-running the full
//!    three-stage sequence each time,
//! 5. the cache commit and discard-list invalidation after a successful write.
//!
//! All of it runs under one [`Session`], i.e. with exclusive use of the driver's
//! transport.

pub mod action;
pub mod feature;
pub mod job;
pub mod scope;
pub mod settings;
pub mod steps;

pub use action::{Action, ActionArgs, ActionDescriptor, ActionStage, CallOutcome};
pub use feature::{Feature, FeatureDescriptor, FeatureStage};
pub use job::{Job, JobPoll, WaitOptions};
pub use scope::{Session, StepScope};
pub use settings::{FeatureSettings, Setting, SettingGuard};
pub use steps::{step, sync_step, Splice, StepChain, StepFn};

use std::collections::{BTreeMap, HashMap};

use crate::error::{DriverError, DriverResult};
use crate::value::Value;

/// A request travelling down the delegation chain towards the transport.
///
/// `template` is the getter or setter command. It is rendered with `strfmt`, using
/// `{value}` for the wire value of a set and any key of `context` (channels add
/// their id here).
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRequest {
    pub feature: String,
    pub template: String,
    pub context: BTreeMap<String, String>,
    pub value: Option<Value>,
}

impl FeatureRequest {
    pub fn get(feature: &str, template: &str) -> Self {
        Self {
            feature: feature.to_string(),
            template: template.to_string(),
            context: BTreeMap::new(),
            value: None,
        }
    }

    pub fn set(feature: &str, template: &str, value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::get(feature, template)
        }
    }

    /// A request for a literal command not tied to a feature.
    pub fn raw(command: &str) -> Self {
        Self::get("", command)
    }

    pub fn with_context(mut self, key: &str, value: impl ToString) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }

    /// Render the command string sent to the device.
    pub fn render(&self) -> DriverResult<String> {
        if !self.template.contains('{') {
            return Ok(self.template.clone());
        }
        let mut vars: HashMap<String, String> = self
            .context
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(value) = &self.value {
            vars.insert("value".to_string(), value.to_string());
        }
        strfmt::strfmt(&self.template, &vars).map_err(|e| {
            DriverError::Configuration(format!(
                "cannot format command '{}' for '{}': {e}",
                self.template, self.feature
            ))
        })
    }
}

/// Result of the `set` stage, handed to the `post_set` chain.
#[derive(Debug, Clone, PartialEq)]
pub struct SetOutcome {
    pub feature: String,
    /// Canonical user-facing value being committed.
    pub value: Value,
    /// Wire value produced by `pre_set`.
    pub native: Value,
    /// Device acknowledgement, when the set stage returned one.
    pub ack: Option<String>,
}

/// Device status reported by `default_check_operation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStatus {
    pub ok: bool,
    pub details: String,
}

impl OperationStatus {
    pub fn ok() -> Self {
        Self {
            ok: true,
            details: String::new(),
        }
    }

    pub fn failed(details: impl Into<String>) -> Self {
        Self {
            ok: false,
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_with_value_and_context() {
        let request = FeatureRequest::set("voltage", "INST:NSEL {ch_id};:VOLT {value}", Value::Float(1.5))
            .with_context("ch_id", 2);
        assert_eq!(request.render().unwrap(), "INST:NSEL 2;:VOLT 1.5");
    }

    #[test]
    fn test_render_plain_command() {
        assert_eq!(FeatureRequest::raw("*IDN?").render().unwrap(), "*IDN?");
    }

    #[test]
    fn test_render_missing_key_is_configuration_error() {
        let request = FeatureRequest::get("voltage", "MEAS:VOLT? (@{ch_id})");
        assert!(matches!(
            request.render(),
            Err(DriverError::Configuration(_))
        ));
    }
}
