//! Driver root: owns the transport session and the node tree.

use std::ops::Deref;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::config::{DriverConfig, PipelineSettings};
use crate::error::{DriverError, DriverResult};
use crate::error_recovery::Recoverable;
use crate::node::{Node, NodeKind, NodeType};
use crate::protocol::{DriverProtocol, MessageProtocol};
use crate::transport::Transport;

/// State shared by every node of one driver instance.
pub(crate) struct DriverRoot {
    pub(crate) name: String,
    pub(crate) protocol: Arc<dyn DriverProtocol>,
    pub(crate) transport: Arc<Mutex<Box<dyn Transport>>>,
    pub(crate) settings: PipelineSettings,
}

/// A connected instrument driver.
///
/// Dereferences to its root [`Node`], so features of the driver itself are
/// reachable directly: `driver.get("idn")`.
#[derive(Debug)]
pub struct Driver {
    node: Node,
}

impl Deref for Driver {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.node
    }
}

impl Driver {
    pub fn builder(node_type: Arc<NodeType>) -> DriverBuilder {
        DriverBuilder {
            node_type,
            name: None,
            transport: None,
            protocol: Arc::new(MessageProtocol),
            settings: PipelineSettings::default(),
        }
    }

    /// Build a driver from a loaded configuration.
    pub fn from_config(node_type: Arc<NodeType>, config: &DriverConfig) -> DriverResult<Self> {
        config
            .validate()
            .map_err(|e| DriverError::Configuration(e.to_string()))?;
        let mut builder = Driver::builder(node_type)
            .settings(config.pipeline.clone())
            .boxed_transport(config.transport.connect()?)
            .boxed_protocol(config.protocol.build());
        if let Some(name) = &config.name {
            builder = builder.name(name);
        }
        builder.build()
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    fn root(&self) -> &Arc<DriverRoot> {
        &self.node.inner.root
    }

    pub fn name(&self) -> &str {
        &self.root().name
    }

    /// Open the connection to the instrument.
    #[instrument(skip(self), fields(driver = %self.name()))]
    pub async fn initialize(&self) -> DriverResult<()> {
        let mut session = self.node.session().await;
        session.transport().open().await?;
        info!(transport = session.transport().name(), "driver initialized");
        Ok(())
    }

    /// Close the connection and forget every cached value.
    #[instrument(skip(self), fields(driver = %self.name()))]
    pub async fn finalize(&self) -> DriverResult<()> {
        let mut session = self.node.session().await;
        session.transport().close().await?;
        self.node.clear_cache();
        info!("driver finalized");
        Ok(())
    }

    /// Reopen the connection after a failure.
    pub async fn reopen_connection(&self) -> DriverResult<()> {
        let mut session = self.node.session().await;
        session.recover().await
    }

    pub async fn is_connected(&self) -> bool {
        let mut session = self.node.session().await;
        session.transport().is_open()
    }
}

/// Assembles a [`Driver`].
pub struct DriverBuilder {
    node_type: Arc<NodeType>,
    name: Option<String>,
    transport: Option<Box<dyn Transport>>,
    protocol: Arc<dyn DriverProtocol>,
    settings: PipelineSettings,
}

impl DriverBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn transport<T: Transport + 'static>(self, transport: T) -> Self {
        self.boxed_transport(Box::new(transport))
    }

    pub fn boxed_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn protocol<P: DriverProtocol + 'static>(self, protocol: P) -> Self {
        self.boxed_protocol(Arc::new(protocol))
    }

    pub fn boxed_protocol(mut self, protocol: Arc<dyn DriverProtocol>) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> DriverResult<Driver> {
        let transport = self.transport.ok_or_else(|| {
            DriverError::Configuration(format!("driver '{}' has no transport", self.node_type.name()))
        })?;
        let name = self
            .name
            .unwrap_or_else(|| self.node_type.name().to_string());
        let root = Arc::new(DriverRoot {
            name: name.clone(),
            protocol: self.protocol,
            transport: Arc::new(Mutex::new(transport)),
            settings: self.settings,
        });
        let node = Node::create(self.node_type, NodeKind::Driver, name, Weak::new(), root);
        Ok(Driver { node })
    }
}
