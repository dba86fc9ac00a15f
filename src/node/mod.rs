//! Composition nodes: driver, subsystems and channels.
//!
//! # Architecture
//!
//! A driver instance is a tree of [`Node`]s. The root is the driver itself; its
//! subsystems are created together with it, its channels lazily through a
//! [`ChannelContainer`]. Every node owns a private feature cache, a limits cache
//! and an options memo, and holds a weak reference to its parent.
//!
//! Communication always goes through three delegation primitives:
//!
//! | node      | `default_get_feature` / `default_set_feature`  | `default_check_operation` |
//! |-----------|-----------------------------------------------|---------------------------|
//! | driver    | formats the request and talks to the transport | asks the protocol         |
//! | subsystem | forwards to the parent                         | forwards to the parent    |
//! | channel   | adds its id to the request, then forwards      | forwards to the parent    |
//!
//! # Example
//!
//! ```ignore
//! let driver = Driver::builder(supply_type).transport(MockTransport::new()).build()?;
//! driver.initialize().await?;
//! let output = driver.channels("outputs")?.resolve("P6V").await?;
//! output.set("voltage", 1.5).await?;
//! ```

mod channel;
mod driver;
mod node_type;

pub use channel::{ChannelContainer, ChannelDecl, ChannelId, ChannelIds, ChannelListFn, ChannelSpec};
pub use driver::{Driver, DriverBuilder};
pub(crate) use driver::DriverRoot;
pub use node_type::{LimitsFn, NodeType, NodeTypeBuilder};

use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

use crate::cache::{CacheSnapshot, FeatureCache, LimitsCache};
use crate::config::PipelineSettings;
use crate::error::{DriverError, DriverResult};
use crate::gate::{ensure_options, Gate, OptionsMemo};
use crate::pipeline::action::{ActionArgs, CallOutcome};
use crate::pipeline::feature::FeatureDescriptor;
use crate::pipeline::settings::{FeatureSettings, Setting, SettingGuard, SettingsOverrides};
use crate::pipeline::scope::{Session, StepScope};
use crate::pipeline::{FeatureRequest, OperationStatus, SetOutcome};
use crate::validate::{Limits, Quantity};
use crate::value::Value;

/// Memo key under which a node's own access options are recorded.
const ACCESS_KEY: &str = "@access";

/// Position of a node in the composition tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Driver,
    Subsystem {
        name: String,
    },
    Channel {
        container: String,
        id: ChannelId,
        /// Template key receiving the channel id.
        placeholder: String,
    },
}

/// Handle to a driver, subsystem or channel instance.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

pub(crate) struct NodeInner {
    node_type: Arc<NodeType>,
    kind: NodeKind,
    path: String,
    parent: Weak<NodeInner>,
    root: Arc<DriverRoot>,
    cache: FeatureCache,
    limits: LimitsCache,
    options: OptionsMemo,
    overrides: SettingsOverrides,
    subsystems: BTreeMap<String, Node>,
    containers: BTreeMap<String, ChannelContainer>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.inner.path)
            .field("type", &self.inner.node_type.name())
            .finish()
    }
}

impl Node {
    pub(crate) fn create(
        node_type: Arc<NodeType>,
        kind: NodeKind,
        path: String,
        parent: Weak<NodeInner>,
        root: Arc<DriverRoot>,
    ) -> Node {
        let inner = Arc::new_cyclic(|me: &Weak<NodeInner>| {
            let subsystems = node_type
                .subsystems()
                .iter()
                .map(|(name, child)| {
                    let node = Node::create(
                        child.clone(),
                        NodeKind::Subsystem { name: name.clone() },
                        format!("{path}.{name}"),
                        me.clone(),
                        root.clone(),
                    );
                    (name.clone(), node)
                })
                .collect();
            let containers = node_type
                .channels()
                .iter()
                .map(|(name, decl)| {
                    let container = ChannelContainer::new(
                        decl.clone(),
                        format!("{path}.{name}"),
                        me.clone(),
                        root.clone(),
                    );
                    (name.clone(), container)
                })
                .collect();
            NodeInner {
                node_type: node_type.clone(),
                kind,
                path: path.clone(),
                parent,
                root: root.clone(),
                cache: FeatureCache::new(),
                limits: LimitsCache::default(),
                options: OptionsMemo::default(),
                overrides: SettingsOverrides::default(),
                subsystems,
                containers,
            }
        });
        Node { inner }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Dotted location of this node, e.g. `e3631a.outputs[1]`.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn kind(&self) -> &NodeKind {
        &self.inner.kind
    }

    pub fn node_type(&self) -> &Arc<NodeType> {
        &self.inner.node_type
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.inner.root.settings
    }

    /// Whether both handles point at the same node instance.
    pub fn same_instance(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The parent node; `None` for the driver.
    pub fn parent(&self) -> DriverResult<Option<Node>> {
        match self.inner.kind {
            NodeKind::Driver => Ok(None),
            _ => self.parent_node().map(Some),
        }
    }

    fn parent_node(&self) -> DriverResult<Node> {
        self.inner
            .parent
            .upgrade()
            .map(|inner| Node { inner })
            .ok_or_else(|| DriverError::Detached(self.inner.path.clone()))
    }

    pub fn subsystem(&self, name: &str) -> DriverResult<Node> {
        self.inner
            .subsystems
            .get(name)
            .cloned()
            .ok_or_else(|| self.unknown(name))
    }

    pub fn channels(&self, name: &str) -> DriverResult<ChannelContainer> {
        self.inner
            .containers
            .get(name)
            .cloned()
            .ok_or_else(|| self.unknown(name))
    }

    fn unknown(&self, attribute: &str) -> DriverError {
        DriverError::UnknownAttribute {
            node: self.inner.path.clone(),
            attribute: attribute.to_string(),
        }
    }

    pub(crate) fn cache(&self) -> &FeatureCache {
        &self.inner.cache
    }

    pub(crate) fn options_memo(&self) -> &OptionsMemo {
        &self.inner.options
    }

    pub(crate) async fn session(&self) -> Session {
        Session::acquire(self.inner.root.clone()).await
    }

    /// Resolve `path` relative to this node into (owning node, attribute name).
    ///
    /// Each leading `.` moves to the parent; other segments name subsystems.
    pub(crate) fn resolve_path(&self, path: &str) -> DriverResult<(Node, String)> {
        let mut node = self.clone();
        let mut rest = path;
        while let Some(stripped) = rest.strip_prefix('.') {
            node = node.parent()?.ok_or_else(|| self.unknown(path))?;
            rest = stripped;
        }
        let mut segments: Vec<&str> = rest.split('.').collect();
        let attribute = match segments.pop() {
            Some(name) if !name.is_empty() => name,
            _ => return Err(self.unknown(path)),
        };
        for segment in segments {
            node = node.subsystem(segment)?;
        }
        Ok((node, attribute.to_string()))
    }

    // ========================================================================
    // Public pipeline entry points
    // ========================================================================

    /// Read a feature (`name`, `.name` or `sub.name`).
    pub async fn get(&self, path: &str) -> DriverResult<Value> {
        let (node, feature) = self.resolve_path(path)?;
        let mut session = node.session().await;
        node.get_in(&mut session, &feature).await
    }

    /// Write a feature.
    pub async fn set(&self, path: &str, value: impl Into<Value>) -> DriverResult<()> {
        let (node, feature) = self.resolve_path(path)?;
        let mut session = node.session().await;
        node.set_in(&mut session, &feature, value.into()).await
    }

    /// Call an action.
    pub async fn call(&self, path: &str, args: ActionArgs) -> DriverResult<CallOutcome> {
        let (node, action) = self.resolve_path(path)?;
        let mut session = node.session().await;
        node.call_in(&mut session, &action, args).await
    }

    pub(crate) fn get_in<'a>(&'a self, session: &'a mut Session, feature: &'a str) -> BoxFuture<'a, DriverResult<Value>> {
        Box::pin(async move {
            let descriptor = self
                .inner
                .node_type
                .feature(feature)
                .ok_or_else(|| self.unknown(feature))?;
            descriptor.read(self, session).await
        })
    }

    pub(crate) fn set_in<'a>(&'a self, session: &'a mut Session, feature: &'a str, value: Value) -> BoxFuture<'a, DriverResult<()>> {
        Box::pin(async move {
            let descriptor = self
                .inner
                .node_type
                .feature(feature)
                .ok_or_else(|| self.unknown(feature))?;
            descriptor.write(self, session, value).await
        })
    }

    pub(crate) fn call_in<'a>(&'a self, session: &'a mut Session, action: &'a str, args: ActionArgs) -> BoxFuture<'a, DriverResult<CallOutcome>> {
        Box::pin(async move {
            let descriptor = self
                .inner
                .node_type
                .action(action)
                .ok_or_else(|| self.unknown(action))?;
            descriptor.invoke(self, session, args).await
        })
    }

    /// Read a float feature together with its declared unit.
    pub async fn get_quantity(&self, path: &str) -> DriverResult<Quantity> {
        let (node, feature) = self.resolve_path(path)?;
        let descriptor = node.feature_descriptor(&feature)?;
        let unit = descriptor.unit().cloned().ok_or_else(|| {
            DriverError::Configuration(format!("feature '{feature}' declares no unit"))
        })?;
        let value = node.get(&feature).await?;
        let magnitude = value.as_f64().ok_or_else(|| {
            DriverError::invalid_response(&feature, format!("'{value}' is not a number"))
        })?;
        Ok(unit.quantity(magnitude))
    }

    fn feature_descriptor(&self, feature: &str) -> DriverResult<&Arc<FeatureDescriptor>> {
        self.inner
            .node_type
            .feature(feature)
            .ok_or_else(|| self.unknown(feature))
    }

    /// Evaluate the access options of this node and all its ancestors.
    pub(crate) async fn ensure_access(&self, session: &mut Session) -> DriverResult<()> {
        let mut lineage = vec![self.clone()];
        while let Some(parent) = lineage.last().and_then(|n| n.inner.parent.upgrade()) {
            lineage.push(Node { inner: parent });
        }
        for node in lineage.iter().rev() {
            let gates: Vec<&Gate> = node.inner.node_type.options().iter().collect();
            ensure_options(node, session, ACCESS_KEY, &gates).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Delegation chain
    // ========================================================================

    pub(crate) fn default_get_feature<'a>(&'a self, session: &'a mut Session, request: FeatureRequest) -> BoxFuture<'a, DriverResult<String>> {
        Box::pin(async move {
            match &self.inner.kind {
                NodeKind::Driver => {
                    let protocol = self.inner.root.protocol.clone();
                    protocol.get_feature(session.transport(), &request).await
                }
                NodeKind::Subsystem { .. } => {
                    self.parent_node()?
                        .default_get_feature(session, request)
                        .await
                }
                NodeKind::Channel { .. } => {
                    let request = self.with_channel_id(request);
                    self.parent_node()?
                        .default_get_feature(session, request)
                        .await
                }
            }
        })
    }

    pub(crate) fn default_set_feature<'a>(&'a self, session: &'a mut Session, request: FeatureRequest) -> BoxFuture<'a, DriverResult<Option<String>>> {
        Box::pin(async move {
            match &self.inner.kind {
                NodeKind::Driver => {
                    let protocol = self.inner.root.protocol.clone();
                    protocol.set_feature(session.transport(), &request).await
                }
                NodeKind::Subsystem { .. } => {
                    self.parent_node()?
                        .default_set_feature(session, request)
                        .await
                }
                NodeKind::Channel { .. } => {
                    let request = self.with_channel_id(request);
                    self.parent_node()?
                        .default_set_feature(session, request)
                        .await
                }
            }
        })
    }

    pub(crate) fn default_check_operation<'a>(&'a self, session: &'a mut Session, outcome: &'a SetOutcome) -> BoxFuture<'a, DriverResult<OperationStatus>> {
        Box::pin(async move {
            match &self.inner.kind {
                NodeKind::Driver => {
                    let protocol = self.inner.root.protocol.clone();
                    protocol.check_operation(session.transport(), outcome).await
                }
                _ => {
                    self.parent_node()?
                        .default_check_operation(session, outcome)
                        .await
                }
            }
        })
    }

    // The innermost channel wins when nested channels share a placeholder.
    fn with_channel_id(&self, mut request: FeatureRequest) -> FeatureRequest {
        if let NodeKind::Channel {
            id, placeholder, ..
        } = &self.inner.kind
        {
            request
                .context
                .entry(placeholder.clone())
                .or_insert_with(|| id.to_string());
        }
        request
    }

    // ========================================================================
    // Limits
    // ========================================================================

    /// Named limits, computed by the closest node declaring them and cached there.
    pub(crate) async fn resolve_limits(&self, session: &mut Session, name: &str) -> DriverResult<Limits> {
        let mut owner = self.clone();
        let limits_fn = loop {
            if let Some(f) = owner.inner.node_type.limits_fn(name) {
                break f.clone();
            }
            owner = match owner.parent()? {
                Some(parent) => parent,
                None => {
                    return Err(DriverError::Configuration(format!(
                        "no limits named '{name}' visible from {}",
                        self.path()
                    )))
                }
            };
        };
        if let Some(limits) = owner.inner.limits.get(name) {
            return Ok(limits);
        }
        let limits = limits_fn(StepScope::new(&owner, session)).await?;
        trace!(node = %owner.path(), name, %limits, "limits computed");
        owner.inner.limits.store(name, limits);
        Ok(limits)
    }

    /// Drop cached named limits here and on every ancestor.
    pub fn discard_limits<'a, I>(&self, names: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: Vec<&str> = names.into_iter().collect();
        if names.is_empty() {
            return;
        }
        let mut current = Some(self.inner.clone());
        while let Some(inner) = current {
            inner.limits.invalidate(names.iter().copied());
            current = inner.parent.upgrade();
        }
    }

    // ========================================================================
    // Runtime settings
    // ========================================================================

    pub(crate) fn feature_settings(&self, descriptor: &FeatureDescriptor) -> FeatureSettings {
        self.inner
            .overrides
            .get(descriptor.name())
            .unwrap_or_else(|| descriptor.declared_settings(self.settings()))
    }

    /// Current settings of a feature on this node instance.
    pub fn read_settings(&self, path: &str) -> DriverResult<FeatureSettings> {
        let (node, feature) = self.resolve_path(path)?;
        let descriptor = node.feature_descriptor(&feature)?;
        Ok(node.feature_settings(descriptor))
    }

    /// Change one setting of a feature until changed again.
    ///
    /// Turning caching off also forgets the feature's cached value.
    pub fn set_setting(&self, path: &str, setting: Setting) -> DriverResult<()> {
        self.override_setting(path, setting).map(|_| ())
    }

    /// Change one setting of a feature until the returned guard is dropped.
    pub fn temporary_setting(&self, path: &str, setting: Setting) -> DriverResult<SettingGuard> {
        let (node, feature, previous) = self.override_setting(path, setting)?;
        Ok(SettingGuard::new(node, feature, previous))
    }

    fn override_setting(&self, path: &str, setting: Setting) -> DriverResult<(Node, String, Option<FeatureSettings>)> {
        let (node, feature) = self.resolve_path(path)?;
        let descriptor = node.feature_descriptor(&feature)?;
        let updated = node.feature_settings(descriptor).with(setting);
        let previous = node.inner.overrides.replace(&feature, Some(updated));
        if !updated.caching {
            node.inner.cache.invalidate([feature.as_str()]);
        }
        debug!(node = %node.path(), feature = %feature, ?setting, "feature setting changed");
        Ok((node, feature, previous))
    }

    pub(crate) fn restore_settings(&self, feature: &str, previous: Option<FeatureSettings>) {
        self.inner.overrides.replace(feature, previous);
        let caching = match previous {
            Some(settings) => settings.caching,
            None => self
                .feature_descriptor(feature)
                .map(|d| d.declared_settings(self.settings()).caching)
                .unwrap_or(true),
        };
        // Values cached while the temporary setting allowed it are not trusted.
        if !caching {
            self.inner.cache.invalidate([feature]);
        }
    }

    // ========================================================================
    // Cache management
    // ========================================================================

    /// Last cached value of a feature of this node, without any I/O.
    pub fn cached(&self, feature: &str) -> Option<Value> {
        self.inner.cache.get(feature)
    }

    /// Invalidate cached features by path.
    ///
    /// `x` is a feature of this node, `.x` of the parent, `sub.x` of a subsystem
    /// and `channels.x` of every instantiated channel of a container.
    pub fn discard(&self, paths: &[&str]) {
        for path in paths {
            self.discard_path(path);
        }
    }

    fn discard_path(&self, path: &str) {
        if let Some(rest) = path.strip_prefix('.') {
            match self.inner.parent.upgrade() {
                Some(inner) => Node { inner }.discard_path(rest),
                None => warn!(node = %self.path(), path, "discard path leaves the driver"),
            }
            return;
        }
        let Some((head, rest)) = path.split_once('.') else {
            self.inner.cache.invalidate([path]);
            return;
        };
        if let Some(sub) = self.inner.subsystems.get(head) {
            sub.discard_path(rest);
        } else if let Some(container) = self.inner.containers.get(head) {
            for channel in container.instantiated() {
                channel.discard_path(rest);
            }
        } else {
            warn!(node = %self.path(), path, "discard path names no subsystem or channel");
        }
    }

    /// Cached values of the listed features, without any I/O.
    ///
    /// Paths follow [`Node::discard`]. Features of a channel container are reported
    /// per instantiated channel, e.g. `outputs[2].voltage`; entries that are not
    /// cached are left out.
    pub fn check_cache(&self, paths: &[&str]) -> BTreeMap<String, Value> {
        let mut found = BTreeMap::new();
        for path in paths {
            self.collect_cached(path, String::new(), &mut found);
        }
        found
    }

    fn collect_cached(&self, path: &str, label: String, found: &mut BTreeMap<String, Value>) {
        if let Some(rest) = path.strip_prefix('.') {
            if let Some(inner) = self.inner.parent.upgrade() {
                Node { inner }.collect_cached(rest, format!("{label}."), found);
            }
            return;
        }
        let Some((head, rest)) = path.split_once('.') else {
            if let Some(value) = self.inner.cache.get(path) {
                found.insert(format!("{label}{path}"), value);
            }
            return;
        };
        if let Some(sub) = self.inner.subsystems.get(head) {
            sub.collect_cached(rest, format!("{label}{head}."), found);
        } else if let Some(container) = self.inner.containers.get(head) {
            for channel in container.instantiated() {
                let label = format!("{label}{head}[{}].", channel_label(&channel));
                channel.collect_cached(rest, label, found);
            }
        }
    }

    /// Empty the caches of this node and all of its children.
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
        self.inner.limits.clear();
        for sub in self.inner.subsystems.values() {
            sub.clear_cache();
        }
        for container in self.inner.containers.values() {
            for channel in container.instantiated() {
                channel.clear_cache();
            }
        }
    }

    /// Cached values of this node and all of its children.
    pub fn cache_snapshot(&self) -> CacheSnapshot {
        let mut channels = BTreeMap::new();
        for (name, container) in &self.inner.containers {
            let instances: BTreeMap<String, CacheSnapshot> = container
                .instantiated()
                .iter()
                .map(|channel| (channel_label(channel), channel.cache_snapshot()))
                .collect();
            if !instances.is_empty() {
                channels.insert(name.clone(), instances);
            }
        }
        CacheSnapshot {
            values: self.inner.cache.snapshot(),
            subsystems: self
                .inner
                .subsystems
                .iter()
                .map(|(name, sub)| (name.clone(), sub.cache_snapshot()))
                .collect(),
            channels,
        }
    }
}

fn channel_label(node: &Node) -> String {
    match node.kind() {
        NodeKind::Channel { id, .. } => id.to_string(),
        _ => node.path().to_string(),
    }
}
