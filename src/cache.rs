//! Per-node caches.
//!
//! Every node instance owns a [`FeatureCache`] and a [`LimitsCache`]. Entries are
//! only created by a successful get/set and only removed by explicit invalidation;
//! nothing expires with time. Locks are `parking_lot` mutexes and are never held
//! across an await point.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::validate::Limits;
use crate::value::Value;

/// Last known values of a node's features.
#[derive(Debug, Default)]
pub struct FeatureCache {
    entries: Mutex<HashMap<String, Value>>,
}

impl FeatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, feature: &str) -> Option<Value> {
        self.entries.lock().get(feature).cloned()
    }

    pub fn contains(&self, feature: &str) -> bool {
        self.entries.lock().contains_key(feature)
    }

    pub fn store(&self, feature: &str, value: Value) {
        self.entries.lock().insert(feature.to_string(), value);
    }

    /// Store the committed value of a set and drop its dependents in one step.
    pub fn commit_set<'a, I>(&self, feature: &str, value: Value, discards: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut entries = self.entries.lock();
        for dependent in discards {
            entries.remove(dependent);
        }
        entries.insert(feature.to_string(), value);
    }

    pub fn invalidate<'a, I>(&self, features: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut entries = self.entries.lock();
        for feature in features {
            entries.remove(feature);
        }
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Named limits computed by a node, cached until discarded.
#[derive(Debug, Default)]
pub struct LimitsCache {
    entries: Mutex<HashMap<String, Limits>>,
}

impl LimitsCache {
    pub fn get(&self, name: &str) -> Option<Limits> {
        self.entries.lock().get(name).copied()
    }

    pub fn store(&self, name: &str, limits: Limits) {
        self.entries.lock().insert(name.to_string(), limits);
    }

    pub fn invalidate<'a, I>(&self, names: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut entries = self.entries.lock();
        for name in names {
            entries.remove(name);
        }
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Recursive view of the cached values of a node and its children.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheSnapshot {
    pub values: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub subsystems: BTreeMap<String, CacheSnapshot>,
    /// Instantiated channels, keyed by container name then channel id.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub channels: BTreeMap<String, BTreeMap<String, CacheSnapshot>>,
}

impl CacheSnapshot {
    /// True when neither this node nor any child caches a value.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
            && self.subsystems.values().all(CacheSnapshot::is_empty)
            && self
                .channels
                .values()
                .flat_map(BTreeMap::values)
                .all(CacheSnapshot::is_empty)
    }
}
