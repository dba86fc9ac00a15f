//! Channel containers: lazily instantiated, id-keyed child nodes.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::error::{DriverError, DriverResult};
use crate::node::{DriverRoot, Node, NodeInner, NodeKind, NodeType};
use crate::pipeline::scope::{Session, StepScope};

/// Template key a channel writes its id under unless told otherwise.
pub const DEFAULT_PLACEHOLDER: &str = "ch_id";

/// Identifier of one channel instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelId {
    Index(i64),
    Name(String),
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Index(i) => write!(f, "{i}"),
            ChannelId::Name(name) => f.write_str(name),
        }
    }
}

impl From<i64> for ChannelId {
    fn from(v: i64) -> Self {
        ChannelId::Index(v)
    }
}

impl From<i32> for ChannelId {
    fn from(v: i32) -> Self {
        ChannelId::Index(i64::from(v))
    }
}

impl From<&str> for ChannelId {
    fn from(v: &str) -> Self {
        ChannelId::Name(v.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(v: String) -> Self {
        ChannelId::Name(v)
    }
}

/// Lists the channel ids currently present, evaluated on the parent node.
pub type ChannelListFn =
    dyn for<'a> Fn(StepScope<'a>) -> BoxFuture<'a, DriverResult<Vec<ChannelId>>> + Send + Sync;

/// Where a container's channel ids come from.
#[derive(Clone)]
pub enum ChannelIds {
    Fixed(Vec<ChannelId>),
    Dynamic(Arc<ChannelListFn>),
}

impl fmt::Debug for ChannelIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelIds::Fixed(ids) => f.debug_tuple("Fixed").field(ids).finish(),
            ChannelIds::Dynamic(_) => f.write_str("Dynamic"),
        }
    }
}

impl ChannelIds {
    pub fn fixed<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ChannelId>,
    {
        ChannelIds::Fixed(ids.into_iter().map(Into::into).collect())
    }

    pub fn dynamic<F>(list: F) -> Self
    where
        F: for<'a> Fn(StepScope<'a>) -> BoxFuture<'a, DriverResult<Vec<ChannelId>>>
            + Send
            + Sync
            + 'static,
    {
        ChannelIds::Dynamic(Arc::new(list))
    }
}

/// Id source, aliases and placeholder of a channel container declaration.
///
/// Fields left unset inherit from the declaration being extended.
#[derive(Clone, Default)]
pub struct ChannelSpec {
    ids: Option<ChannelIds>,
    aliases: BTreeMap<ChannelId, Vec<String>>,
    placeholder: Option<String>,
}

impl ChannelSpec {
    pub fn new(ids: ChannelIds) -> Self {
        Self {
            ids: Some(ids),
            ..Self::default()
        }
    }

    /// Keep the id source of the inherited declaration.
    pub fn inherit() -> Self {
        Self::default()
    }

    /// Add an alternative key for channel `id`.
    pub fn alias(mut self, id: impl Into<ChannelId>, alias: &str) -> Self {
        self.aliases
            .entry(id.into())
            .or_default()
            .push(alias.to_string());
        self
    }

    /// Template key receiving the channel id (default `ch_id`).
    pub fn placeholder(mut self, key: &str) -> Self {
        self.placeholder = Some(key.to_string());
        self
    }

    pub(crate) fn merge(mut self, other: ChannelSpec) -> Self {
        if other.ids.is_some() {
            self.ids = other.ids;
        }
        // Aliases redeclared for an id replace the inherited ones for that id.
        self.aliases.extend(other.aliases);
        if other.placeholder.is_some() {
            self.placeholder = other.placeholder;
        }
        self
    }
}

/// Built declaration of a channel container.
#[derive(Debug)]
pub struct ChannelDecl {
    name: String,
    ids: ChannelIds,
    alias_decls: BTreeMap<ChannelId, Vec<String>>,
    aliases: BTreeMap<String, ChannelId>,
    placeholder: String,
    node_type: Arc<NodeType>,
}

impl ChannelDecl {
    pub(crate) fn new(name: &str, spec: ChannelSpec, node_type: Arc<NodeType>) -> DriverResult<Self> {
        let ids = spec.ids.ok_or_else(|| {
            DriverError::Configuration(format!("channels '{name}' declare no id source"))
        })?;
        if let ChannelIds::Fixed(fixed) = &ids {
            for (i, id) in fixed.iter().enumerate() {
                if fixed[..i].contains(id) {
                    return Err(DriverError::Configuration(format!(
                        "channels '{name}' declare id {id} twice"
                    )));
                }
            }
        }

        let mut aliases = BTreeMap::new();
        for (id, names) in &spec.aliases {
            if let ChannelIds::Fixed(fixed) = &ids {
                if !fixed.contains(id) {
                    return Err(DriverError::Configuration(format!(
                        "channels '{name}' alias an undeclared id {id}"
                    )));
                }
            }
            for alias in names {
                if let Some(previous) = aliases.insert(alias.clone(), id.clone()) {
                    if previous != *id {
                        return Err(DriverError::Configuration(format!(
                            "channels '{name}' use alias '{alias}' for both {previous} and {id}"
                        )));
                    }
                }
            }
        }

        Ok(Self {
            name: name.to_string(),
            ids,
            alias_decls: spec.aliases,
            aliases,
            placeholder: spec
                .placeholder
                .unwrap_or_else(|| DEFAULT_PLACEHOLDER.to_string()),
            node_type,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ids(&self) -> &ChannelIds {
        &self.ids
    }

    /// Alias to id map.
    pub fn aliases(&self) -> &BTreeMap<String, ChannelId> {
        &self.aliases
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    pub fn node_type(&self) -> &Arc<NodeType> {
        &self.node_type
    }

    pub(crate) fn spec(&self) -> ChannelSpec {
        ChannelSpec {
            ids: Some(self.ids.clone()),
            aliases: self.alias_decls.clone(),
            placeholder: Some(self.placeholder.clone()),
        }
    }
}

/// Channel instances of one parent node.
///
/// Instances are created on first access and reused afterwards, so every lookup
/// of the same id (or one of its aliases) yields the same node.
#[derive(Clone)]
pub struct ChannelContainer {
    inner: Arc<ContainerInner>,
}

struct ContainerInner {
    decl: Arc<ChannelDecl>,
    path: String,
    parent: Weak<NodeInner>,
    root: Arc<DriverRoot>,
    instances: Mutex<BTreeMap<ChannelId, Node>>,
}

impl fmt::Debug for ChannelContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelContainer")
            .field("path", &self.inner.path)
            .field("ids", &self.inner.decl.ids)
            .finish()
    }
}

impl ChannelContainer {
    pub(crate) fn new(
        decl: Arc<ChannelDecl>,
        path: String,
        parent: Weak<NodeInner>,
        root: Arc<DriverRoot>,
    ) -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                decl,
                path,
                parent,
                root,
                instances: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.decl.name()
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Alias to id map.
    pub fn aliases(&self) -> &BTreeMap<String, ChannelId> {
        self.inner.decl.aliases()
    }

    /// Whether both handles refer to the same container.
    pub fn same_instance(&self, other: &ChannelContainer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn parent(&self) -> DriverResult<Node> {
        self.inner
            .parent
            .upgrade()
            .map(|inner| Node { inner })
            .ok_or_else(|| DriverError::Detached(self.inner.path.clone()))
    }

    /// Ids of the channels currently present.
    pub async fn available(&self) -> DriverResult<Vec<ChannelId>> {
        match &self.inner.decl.ids {
            ChannelIds::Fixed(ids) => Ok(ids.clone()),
            ChannelIds::Dynamic(_) => {
                let parent = self.parent()?;
                let mut session = parent.session().await;
                self.available_in(&mut session).await
            }
        }
    }

    pub(crate) async fn available_in(&self, session: &mut Session) -> DriverResult<Vec<ChannelId>> {
        match &self.inner.decl.ids {
            ChannelIds::Fixed(ids) => Ok(ids.clone()),
            ChannelIds::Dynamic(list) => {
                let parent = self.parent()?;
                list(StepScope::new(&parent, session)).await
            }
        }
    }

    /// The channel for `key`, which may be an id or an alias.
    pub async fn resolve(&self, key: impl Into<ChannelId>) -> DriverResult<Node> {
        let id = self.canonical_id(key.into());
        let available = self.available().await?;
        self.instance(id, &available)
    }

    pub(crate) async fn resolve_in(&self, session: &mut Session, key: ChannelId) -> DriverResult<Node> {
        let id = self.canonical_id(key);
        let available = self.available_in(session).await?;
        self.instance(id, &available)
    }

    /// Nodes of every available channel, in id order.
    pub async fn nodes(&self) -> DriverResult<Vec<Node>> {
        let available = self.available().await?;
        available
            .iter()
            .map(|id| self.instance(id.clone(), &available))
            .collect()
    }

    /// Channels created so far.
    pub fn instantiated(&self) -> Vec<Node> {
        self.inner.instances.lock().values().cloned().collect()
    }

    fn canonical_id(&self, key: ChannelId) -> ChannelId {
        match &key {
            ChannelId::Name(name) => self
                .inner
                .decl
                .aliases()
                .get(name)
                .cloned()
                .unwrap_or(key),
            ChannelId::Index(_) => key,
        }
    }

    fn instance(&self, id: ChannelId, available: &[ChannelId]) -> DriverResult<Node> {
        if !available.contains(&id) {
            return Err(DriverError::UnknownChannel {
                container: self.inner.path.clone(),
                key: id.to_string(),
            });
        }
        let mut instances = self.inner.instances.lock();
        if let Some(node) = instances.get(&id) {
            return Ok(node.clone());
        }
        let node = Node::create(
            self.inner.decl.node_type().clone(),
            NodeKind::Channel {
                container: self.name().to_string(),
                id: id.clone(),
                placeholder: self.inner.decl.placeholder().to_string(),
            },
            format!("{}[{id}]", self.inner.path),
            self.inner.parent.clone(),
            self.inner.root.clone(),
        );
        debug!(path = %node.path(), "channel instantiated");
        instances.insert(id, node.clone());
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_type() -> Arc<NodeType> {
        NodeType::builder("channel").build().unwrap()
    }

    #[test]
    fn test_id_display_and_conversion() {
        assert_eq!(ChannelId::from(3).to_string(), "3");
        assert_eq!(ChannelId::from("CH_A").to_string(), "CH_A");
        let ids: Vec<ChannelId> = serde_json::from_str(r#"[1, "aux"]"#).unwrap();
        assert_eq!(ids, vec![ChannelId::Index(1), ChannelId::Name("aux".into())]);
    }

    #[test]
    fn test_alias_must_target_declared_id() {
        let spec = ChannelSpec::new(ChannelIds::fixed([1, 2])).alias(5, "P6V");
        let err = ChannelDecl::new("outputs", spec, empty_type()).unwrap_err();
        assert!(err.to_string().contains("undeclared id 5"));
    }

    #[test]
    fn test_alias_cannot_name_two_ids() {
        let spec = ChannelSpec::new(ChannelIds::fixed([1, 2]))
            .alias(1, "MAIN")
            .alias(2, "MAIN");
        assert!(ChannelDecl::new("outputs", spec, empty_type()).is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let spec = ChannelSpec::new(ChannelIds::fixed([1, 1]));
        assert!(ChannelDecl::new("outputs", spec, empty_type()).is_err());
    }

    #[test]
    fn test_merge_overrides_per_id() {
        let inherited = ChannelSpec::new(ChannelIds::fixed([1, 2]))
            .alias(1, "OLD")
            .alias(2, "TWO");
        let merged = inherited.merge(ChannelSpec::inherit().alias(1, "NEW").placeholder("out"));
        let decl = ChannelDecl::new("outputs", merged, empty_type()).unwrap();
        assert_eq!(decl.aliases().get("NEW"), Some(&ChannelId::Index(1)));
        assert!(!decl.aliases().contains_key("OLD"));
        assert_eq!(decl.aliases().get("TWO"), Some(&ChannelId::Index(2)));
        assert_eq!(decl.placeholder(), "out");
    }
}
