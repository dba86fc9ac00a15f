//! Feature/action execution framework for laboratory instrument drivers.
//!
//! A driver is declared as a tree of node types (driver, subsystems, channels)
//! whose attributes are *features* (get/set values) and *actions* (calls). Every
//! access runs the same pipeline: options and checks gates, cache lookup, a staged
//! get/set/call sequence made of named, customizable steps, and a bounded retry
//! that reopens the transport between attempts.
//!
//! ```no_run
//! use daq_features::{Driver, Feature, FloatLimits, MockTransport, NodeType};
//!
//! # async fn demo() -> daq_features::DriverResult<()> {
//! let supply = NodeType::builder("supply")
//!     .feature(
//!         Feature::new("voltage")
//!             .getter("VOLT?")
//!             .setter("VOLT {value}")
//!             .float()
//!             .limits(FloatLimits::range(0.0, 6.0)?),
//!     )
//!     .build()?;
//!
//! let driver = Driver::builder(supply).transport(MockTransport::new()).build()?;
//! driver.initialize().await?;
//! driver.set("voltage", 1.5).await?;
//! assert_eq!(driver.get("voltage").await?.as_f64(), Some(1.5));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod error_recovery;
pub mod gate;
pub mod node;
pub mod pipeline;
pub mod protocol;
pub mod telemetry;
pub mod transport;
pub mod validate;
pub mod value;

pub use cache::CacheSnapshot;
pub use config::{ConfigError, DriverConfig, PipelineSettings, TransportConfig};
pub use error::{DriverError, DriverResult, TransportError};
pub use gate::Gate;
pub use node::{
    ChannelContainer, ChannelId, ChannelIds, ChannelSpec, Driver, DriverBuilder, Node, NodeKind,
    NodeType, NodeTypeBuilder,
};
pub use pipeline::{
    step, sync_step, Action, ActionArgs, ActionStage, CallOutcome, Feature, FeatureRequest,
    FeatureSettings, FeatureStage, Job, JobPoll, OperationStatus, SetOutcome, Setting,
    SettingGuard, Splice, StepScope, WaitOptions,
};
pub use protocol::{DriverProtocol, MessageProtocol, ScpiProtocol};
pub use transport::{MockTransport, TcpTransport, Transport};
pub use validate::{FloatLimits, IntLimits, Limits, Mapping, Quantity, Unit, ValueKind};
pub use value::Value;
