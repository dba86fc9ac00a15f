//! Runtime settings of features.
//!
//! A feature's declaration fixes its defaults (cacheable or not, retry budget,
//! retry policy for device errors). A node may override them per feature while the
//! driver runs, either permanently with [`Node::set_setting`] or for a scope with
//! [`Node::temporary_setting`]. Overrides belong to the node instance, so two
//! channels of one container can behave differently.
//!
//! An override applies to accesses that start after it was made.
//!
//! [`Node::set_setting`]: crate::node::Node::set_setting
//! [`Node::temporary_setting`]: crate::node::Node::temporary_setting

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::node::Node;

/// Effective settings of one feature on one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureSettings {
    /// Reads may be answered from the cache and unchanged sets skipped.
    pub caching: bool,
    /// Additional attempts after a transport-class failure.
    pub retries: u32,
    pub retry_on_operation_failure: bool,
}

/// One setting to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    Caching(bool),
    Retries(u32),
    RetryOnOperationFailure(bool),
}

impl FeatureSettings {
    pub fn with(mut self, setting: Setting) -> Self {
        match setting {
            Setting::Caching(on) => self.caching = on,
            Setting::Retries(n) => self.retries = n,
            Setting::RetryOnOperationFailure(on) => self.retry_on_operation_failure = on,
        }
        self
    }
}

/// Per-node overrides, keyed by feature name.
#[derive(Debug, Default)]
pub struct SettingsOverrides {
    entries: Mutex<HashMap<String, FeatureSettings>>,
}

impl SettingsOverrides {
    pub fn get(&self, feature: &str) -> Option<FeatureSettings> {
        self.entries.lock().get(feature).copied()
    }

    /// Install `settings` and return what was overridden before, if anything.
    pub fn replace(&self, feature: &str, settings: Option<FeatureSettings>) -> Option<FeatureSettings> {
        let mut entries = self.entries.lock();
        match settings {
            Some(settings) => entries.insert(feature.to_string(), settings),
            None => entries.remove(feature),
        }
    }
}

/// Restores a feature's previous settings when dropped.
#[must_use = "the setting is reverted as soon as the guard is dropped"]
pub struct SettingGuard {
    node: Node,
    feature: String,
    previous: Option<FeatureSettings>,
}

impl SettingGuard {
    pub(crate) fn new(node: Node, feature: String, previous: Option<FeatureSettings>) -> Self {
        Self {
            node,
            feature,
            previous,
        }
    }
}

impl Drop for SettingGuard {
    fn drop(&mut self) {
        debug!(node = %self.node.path(), feature = %self.feature, "temporary setting reverted");
        self.node.restore_settings(&self.feature, self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> FeatureSettings {
        FeatureSettings {
            caching: true,
            retries: 0,
            retry_on_operation_failure: true,
        }
    }

    #[test]
    fn test_settings_apply_one_at_a_time() {
        let s = defaults()
            .with(Setting::Retries(4))
            .with(Setting::Caching(false));
        assert_eq!(s.retries, 4);
        assert!(!s.caching);
        assert!(s.retry_on_operation_failure);
    }

    #[test]
    fn test_replace_reports_previous_override() {
        let overrides = SettingsOverrides::default();
        assert_eq!(overrides.replace("voltage", Some(defaults())), None);
        let quiet = defaults().with(Setting::Caching(false));
        assert_eq!(overrides.replace("voltage", Some(quiet)), Some(defaults()));
        assert_eq!(overrides.replace("voltage", None), Some(quiet));
        assert_eq!(overrides.get("voltage"), None);
    }
}
