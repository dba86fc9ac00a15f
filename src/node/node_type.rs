//! Node type declarations and the builder used to compose them.
//!
//! A [`NodeType`] is the immutable description shared by every instance of a
//! driver, subsystem or channel: its features, actions, named limits, child
//! declarations and gates. Types are assembled with [`NodeTypeBuilder`], which
//! supports extending a base type, composing several bases and reconfiguring
//! inherited features without touching the base.

use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{DriverError, DriverResult};
use crate::gate::Gate;
use crate::node::channel::{ChannelDecl, ChannelSpec};
use crate::pipeline::scope::StepScope;
use crate::pipeline::{Action, ActionDescriptor, Feature, FeatureDescriptor};
use crate::validate::Limits;

/// Computes a named limits set against the live node declaring it.
pub type LimitsFn = dyn for<'a> Fn(StepScope<'a>) -> BoxFuture<'a, DriverResult<Limits>> + Send + Sync;

/// Immutable description of a driver, subsystem or channel.
pub struct NodeType {
    name: String,
    features: BTreeMap<String, Arc<FeatureDescriptor>>,
    actions: BTreeMap<String, Arc<ActionDescriptor>>,
    subsystems: BTreeMap<String, Arc<NodeType>>,
    channels: BTreeMap<String, Arc<ChannelDecl>>,
    limits: BTreeMap<String, Arc<LimitsFn>>,
    options: Vec<Gate>,
    checks: Vec<Gate>,
}

impl fmt::Debug for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeType")
            .field("name", &self.name)
            .field("features", &self.features.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("subsystems", &self.subsystems.keys().collect::<Vec<_>>())
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl NodeType {
    pub fn builder(name: &str) -> NodeTypeBuilder {
        NodeTypeBuilder::new(name)
    }

    /// Start a derived type holding everything `base` declares.
    pub fn extend(base: &NodeType, name: &str) -> NodeTypeBuilder {
        let mut builder = NodeTypeBuilder::from_type(base);
        builder.name = name.to_string();
        builder
    }

    /// Start a type combining several bases; later bases override earlier ones.
    pub fn compose(name: &str, bases: &[&NodeType]) -> NodeTypeBuilder {
        bases
            .iter()
            .fold(NodeTypeBuilder::new(name), |builder, base| {
                builder.merge(NodeTypeBuilder::from_type(base))
            })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn feature(&self, name: &str) -> Option<&Arc<FeatureDescriptor>> {
        self.features.get(name)
    }

    pub fn features(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }

    pub fn action(&self, name: &str) -> Option<&Arc<ActionDescriptor>> {
        self.actions.get(name)
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn subsystems(&self) -> &BTreeMap<String, Arc<NodeType>> {
        &self.subsystems
    }

    pub fn channels(&self) -> &BTreeMap<String, Arc<ChannelDecl>> {
        &self.channels
    }

    pub(crate) fn limits_fn(&self, name: &str) -> Option<&Arc<LimitsFn>> {
        self.limits.get(name)
    }

    /// Access options applied to every attribute of instances of this type.
    pub fn options(&self) -> &[Gate] {
        &self.options
    }

    /// Checks run before every attribute access on instances of this type.
    pub fn checks(&self) -> &[Gate] {
        &self.checks
    }
}

/// Mutable declaration of a [`NodeType`].
#[derive(Clone)]
pub struct NodeTypeBuilder {
    name: String,
    features: BTreeMap<String, Feature>,
    actions: BTreeMap<String, Action>,
    subsystems: BTreeMap<String, NodeTypeBuilder>,
    channels: BTreeMap<String, (ChannelSpec, NodeTypeBuilder)>,
    limits: BTreeMap<String, Arc<LimitsFn>>,
    options: Vec<Gate>,
    checks: Vec<Gate>,
    errors: Vec<String>,
}

impl NodeTypeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            features: BTreeMap::new(),
            actions: BTreeMap::new(),
            subsystems: BTreeMap::new(),
            channels: BTreeMap::new(),
            limits: BTreeMap::new(),
            options: Vec::new(),
            checks: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn from_type(node_type: &NodeType) -> Self {
        Self {
            name: node_type.name.clone(),
            features: node_type
                .features
                .iter()
                .map(|(name, d)| (name.clone(), d.config().clone()))
                .collect(),
            actions: node_type
                .actions
                .iter()
                .map(|(name, d)| (name.clone(), d.config().clone()))
                .collect(),
            subsystems: node_type
                .subsystems
                .iter()
                .map(|(name, t)| (name.clone(), Self::from_type(t)))
                .collect(),
            channels: node_type
                .channels
                .iter()
                .map(|(name, decl)| {
                    (name.clone(), (decl.spec(), Self::from_type(decl.node_type())))
                })
                .collect(),
            limits: node_type.limits.clone(),
            options: node_type.options.clone(),
            checks: node_type.checks.clone(),
            errors: Vec::new(),
        }
    }

    fn merge(mut self, other: NodeTypeBuilder) -> Self {
        self.features.extend(other.features);
        self.actions.extend(other.actions);
        for (name, sub) in other.subsystems {
            let merged = match self.subsystems.remove(&name) {
                Some(existing) => existing.merge(sub),
                None => sub,
            };
            self.subsystems.insert(name, merged);
        }
        for (name, (spec, node)) in other.channels {
            let merged = match self.channels.remove(&name) {
                Some((existing_spec, existing_node)) => {
                    (existing_spec.merge(spec), existing_node.merge(node))
                }
                None => (spec, node),
            };
            self.channels.insert(name, merged);
        }
        self.limits.extend(other.limits);
        self.options.extend(other.options);
        self.checks.extend(other.checks);
        self.errors.extend(other.errors);
        self
    }

    /// Declare a feature, replacing any inherited one of the same name.
    pub fn feature(mut self, feature: Feature) -> Self {
        self.features.insert(feature.name().to_string(), feature);
        self
    }

    /// Modify an already declared feature; the base type keeps its own copy.
    pub fn reconfigure<F>(mut self, name: &str, f: F) -> Self
    where
        F: FnOnce(Feature) -> Feature,
    {
        match self.features.remove(name) {
            Some(feature) => {
                let feature = f(feature);
                self.features.insert(name.to_string(), feature);
            }
            None => self
                .errors
                .push(format!("{}: cannot reconfigure unknown feature '{name}'", self.name)),
        }
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.actions.insert(action.name().to_string(), action);
        self
    }

    pub fn reconfigure_action<F>(mut self, name: &str, f: F) -> Self
    where
        F: FnOnce(Action) -> Action,
    {
        match self.actions.remove(name) {
            Some(action) => {
                let action = f(action);
                self.actions.insert(name.to_string(), action);
            }
            None => self
                .errors
                .push(format!("{}: cannot reconfigure unknown action '{name}'", self.name)),
        }
        self
    }

    /// Declare a subsystem. Redeclaring an inherited one builds on its declaration.
    pub fn subsystem<F>(mut self, name: &str, f: F) -> Self
    where
        F: FnOnce(NodeTypeBuilder) -> NodeTypeBuilder,
    {
        let base = self
            .subsystems
            .remove(name)
            .unwrap_or_else(|| NodeTypeBuilder::new(name));
        self.subsystems.insert(name.to_string(), f(base));
        self
    }

    /// Declare a channel container. Redeclaring an inherited one merges the id
    /// source and aliases and builds on the inherited channel type.
    pub fn channels<F>(mut self, name: &str, spec: ChannelSpec, f: F) -> Self
    where
        F: FnOnce(NodeTypeBuilder) -> NodeTypeBuilder,
    {
        let (spec, base) = match self.channels.remove(name) {
            Some((inherited, node)) => (inherited.merge(spec), node),
            None => (spec, NodeTypeBuilder::new(name)),
        };
        self.channels.insert(name.to_string(), (spec, f(base)));
        self
    }

    /// Declare named limits, computed on first use and cached per instance.
    pub fn limits<F>(mut self, name: &str, f: F) -> Self
    where
        F: for<'a> Fn(StepScope<'a>) -> BoxFuture<'a, DriverResult<Limits>> + Send + Sync + 'static,
    {
        self.limits.insert(name.to_string(), Arc::new(f));
        self
    }

    /// Access options gating every attribute of this node and its children.
    pub fn options(mut self, gate: Gate) -> Self {
        self.options.push(gate);
        self
    }

    /// Checks evaluated before every attribute access on this node.
    pub fn checks(mut self, gate: Gate) -> Self {
        self.checks.push(gate);
        self
    }

    pub fn build(self) -> DriverResult<Arc<NodeType>> {
        let mut errors = Vec::new();
        let node_type = self.build_into(&mut errors);
        if errors.is_empty() {
            Ok(Arc::new(node_type))
        } else {
            Err(DriverError::Configuration(errors.join("; ")))
        }
    }

    fn build_into(self, errors: &mut Vec<String>) -> NodeType {
        errors.extend(self.errors);
        let name = self.name;

        let mut features = BTreeMap::new();
        for (key, feature) in self.features {
            match feature.build() {
                Ok(descriptor) => {
                    features.insert(key, Arc::new(descriptor));
                }
                Err(err) => errors.push(format!("{name}.{key}: {err}")),
            }
        }
        let mut actions = BTreeMap::new();
        for (key, action) in self.actions {
            if features.contains_key(&key) {
                errors.push(format!("{name}.{key}: declared as both feature and action"));
                continue;
            }
            match action.build() {
                Ok(descriptor) => {
                    actions.insert(key, Arc::new(descriptor));
                }
                Err(err) => errors.push(format!("{name}.{key}: {err}")),
            }
        }

        let subsystems = self
            .subsystems
            .into_iter()
            .map(|(key, sub)| (key, Arc::new(sub.build_into(errors))))
            .collect();

        let mut channels = BTreeMap::new();
        for (key, (spec, node)) in self.channels {
            let node_type = Arc::new(node.build_into(errors));
            match ChannelDecl::new(&key, spec, node_type) {
                Ok(decl) => {
                    channels.insert(key, Arc::new(decl));
                }
                Err(err) => errors.push(format!("{name}.{key}: {err}")),
            }
        }

        NodeType {
            name,
            features,
            actions,
            subsystems,
            channels,
            limits: self.limits,
            options: self.options,
            checks: self.checks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ChannelIds;

    fn base() -> Arc<NodeType> {
        NodeType::builder("source")
            .feature(Feature::new("voltage").getter("VOLT?").setter("VOLT {value}").float())
            .feature(Feature::new("output").getter("OUTP?").setter("OUTP {value}").boolean())
            .subsystem("trigger", |t| t.feature(Feature::new("delay").getter("TRIG:DEL?")))
            .build()
            .unwrap()
    }

    #[test]
    fn test_extend_keeps_base_untouched() {
        let base = base();
        let derived = NodeType::extend(&base, "precise_source")
            .reconfigure("voltage", |f| f.getter("VOLT:PREC?"))
            .feature(Feature::new("current").getter("CURR?"))
            .build()
            .unwrap();

        assert_eq!(base.feature("voltage").unwrap().config().getter_template(), Some("VOLT?"));
        assert_eq!(
            derived.feature("voltage").unwrap().config().getter_template(),
            Some("VOLT:PREC?")
        );
        assert!(base.feature("current").is_none());
        assert_eq!(derived.features().count(), 3);
    }

    #[test]
    fn test_redeclared_subsystem_builds_on_inherited() {
        let derived = NodeType::extend(&base(), "source2")
            .subsystem("trigger", |t| t.feature(Feature::new("source").getter("TRIG:SOUR?")))
            .build()
            .unwrap();
        let trigger = &derived.subsystems()["trigger"];
        assert!(trigger.feature("delay").is_some());
        assert!(trigger.feature("source").is_some());
    }

    #[test]
    fn test_compose_later_base_wins() {
        let a = NodeType::builder("a")
            .feature(Feature::new("mode").getter("MODE_A?"))
            .build()
            .unwrap();
        let b = NodeType::builder("b")
            .feature(Feature::new("mode").getter("MODE_B?"))
            .feature(Feature::new("extra").getter("EXTRA?"))
            .build()
            .unwrap();
        let composed = NodeType::compose("ab", &[&a, &b]).build().unwrap();
        assert_eq!(composed.feature("mode").unwrap().config().getter_template(), Some("MODE_B?"));
        assert!(composed.feature("extra").is_some());
    }

    #[test]
    fn test_build_errors_are_collected() {
        let err = NodeType::builder("broken")
            .reconfigure("missing", |f| f)
            .channels("outputs", ChannelSpec::inherit(), |c| c)
            .build()
            .unwrap_err();
        let DriverError::Configuration(message) = err else {
            panic!("expected configuration error");
        };
        assert!(message.contains("missing"));
        assert!(message.contains("outputs"));
    }

    #[test]
    fn test_channel_redeclaration_merges_aliases() {
        let base = NodeType::builder("supply")
            .channels(
                "outputs",
                ChannelSpec::new(ChannelIds::fixed([1, 2, 3])).alias(1, "P6V"),
                |c| c.feature(Feature::new("voltage").getter("VOLT{ch_id}?")),
            )
            .build()
            .unwrap();
        let derived = NodeType::extend(&base, "supply2")
            .channels("outputs", ChannelSpec::inherit().alias(2, "P25V"), |c| {
                c.feature(Feature::new("current").getter("CURR{ch_id}?"))
            })
            .build()
            .unwrap();
        let decl = &derived.channels()["outputs"];
        assert_eq!(decl.aliases().len(), 2);
        assert!(decl.node_type().feature("voltage").is_some());
        assert!(decl.node_type().feature("current").is_some());
    }
}
