//! Driver sessions and step scopes.
//!
//! A [`Session`] is exclusive ownership of a driver's transport for the duration of
//! one public get/set/call (including its gates, nested reads and retries). It is
//! passed down the call chain explicitly, so nested reads never lock twice and no
//! other pipeline on the same driver can interleave with a reconnect.
//!
//! A [`StepScope`] pairs a session with the node a step runs on. Steps, gates and
//! actions use it to read other features and talk to the device.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::error::{DriverError, DriverResult};
use crate::error_recovery::Recoverable;
use crate::node::{ChannelId, DriverRoot, Node};
use crate::pipeline::action::{ActionArgs, CallOutcome};
use crate::pipeline::FeatureRequest;
use crate::transport::Transport;
use crate::validate::Limits;
use crate::value::Value;

/// Exclusive use of a driver's transport.
pub struct Session {
    root: Arc<DriverRoot>,
    link: OwnedMutexGuard<Box<dyn Transport>>,
    gates_in_progress: Vec<String>,
}

impl Session {
    pub(crate) async fn acquire(root: Arc<DriverRoot>) -> Self {
        let link = root.transport.clone().lock_owned().await;
        Self {
            root,
            link,
            gates_in_progress: Vec::new(),
        }
    }

    pub(crate) fn root(&self) -> &Arc<DriverRoot> {
        &self.root
    }

    pub(crate) fn transport(&mut self) -> &mut dyn Transport {
        &mut **self.link
    }

    /// Mark a gate as being evaluated; fails if it already is.
    pub(crate) fn enter_gate(&mut self, key: String) -> DriverResult<()> {
        if self.gates_in_progress.contains(&key) {
            return Err(DriverError::Configuration(format!(
                "re-entrant gate evaluation for {key}"
            )));
        }
        self.gates_in_progress.push(key);
        Ok(())
    }

    pub(crate) fn gate_active(&self, key: &str) -> bool {
        self.gates_in_progress.iter().any(|k| k == key)
    }

    pub(crate) fn exit_gate(&mut self, key: &str) {
        if let Some(index) = self.gates_in_progress.iter().rposition(|k| k == key) {
            self.gates_in_progress.remove(index);
        }
    }
}

#[async_trait]
impl Recoverable for Session {
    /// Close and reopen the link, then wait for the configured settle delay.
    async fn recover(&mut self) -> DriverResult<()> {
        warn!(driver = %self.root.name, transport = self.link.name(), "reopening transport");
        self.link.reopen().await?;
        let delay = self.root.settings.reopen_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        debug!(driver = %self.root.name, "transport reopened");
        Ok(())
    }
}

/// Node plus session handed to steps, gates, limits and actions.
pub struct StepScope<'a> {
    node: &'a Node,
    session: &'a mut Session,
}

impl<'a> StepScope<'a> {
    pub(crate) fn new(node: &'a Node, session: &'a mut Session) -> Self {
        Self { node, session }
    }

    /// The node the running step belongs to.
    pub fn node(&self) -> &Node {
        self.node
    }

    pub(crate) fn session(&mut self) -> &mut Session {
        self.session
    }

    pub(crate) fn split(&mut self) -> (&Node, &mut Session) {
        (self.node, &mut *self.session)
    }

    /// Shorter-lived copy of this scope.
    pub fn reborrow(&mut self) -> StepScope<'_> {
        StepScope {
            node: self.node,
            session: &mut *self.session,
        }
    }

    /// Read a feature by path relative to this node (`.x` is the parent's `x`,
    /// `sub.x` a subsystem's `x`).
    pub async fn get(&mut self, path: &str) -> DriverResult<Value> {
        let (node, feature) = self.node.resolve_path(path)?;
        node.get_in(self.session, &feature).await
    }

    pub async fn set(&mut self, path: &str, value: impl Into<Value>) -> DriverResult<()> {
        let (node, feature) = self.node.resolve_path(path)?;
        node.set_in(self.session, &feature, value.into()).await
    }

    pub async fn call(&mut self, path: &str, args: ActionArgs) -> DriverResult<CallOutcome> {
        let (node, action) = self.node.resolve_path(path)?;
        node.call_in(self.session, &action, args).await
    }

    /// A channel of one of this node's containers, looked up without re-locking.
    pub async fn channel(&mut self, container: &str, key: impl Into<ChannelId>) -> DriverResult<Node> {
        let container = self.node.channels(container)?;
        container.resolve_in(self.session, key.into()).await
    }

    /// Named limits as seen from this node.
    pub async fn limits(&mut self, name: &str) -> DriverResult<Limits> {
        self.node.resolve_limits(self.session, name).await
    }

    /// Send a raw query through this node's delegation chain.
    pub async fn query(&mut self, command: &str) -> DriverResult<String> {
        let request = FeatureRequest::raw(command);
        self.node.default_get_feature(self.session, request).await
    }

    /// Send a raw command through this node's delegation chain.
    pub async fn write(&mut self, command: &str) -> DriverResult<()> {
        let request = FeatureRequest::raw(command);
        self.node
            .default_set_feature(self.session, request)
            .await
            .map(|_| ())
    }
}
