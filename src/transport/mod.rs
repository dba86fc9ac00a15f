//! Byte-level links to instruments.
//!
//! A [`Transport`] moves text commands and responses. It knows nothing about
//! features; formatting and parsing happen in the pipeline and the
//! [`DriverProtocol`](crate::protocol::DriverProtocol).
//!
//! Available implementations:
//! - [`MockTransport`]: scripted responses and failure injection for tests
//! - [`TcpTransport`]: raw socket instruments (LXI, SCPI-RAW on port 5025)
//! - `SerialTransport`: RS-232 instruments (requires the `instrument_serial` feature)

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;
pub mod tcp;

pub use mock::MockTransport;
#[cfg(feature = "instrument_serial")]
pub use serial::SerialTransport;
pub use tcp::TcpTransport;

use async_trait::async_trait;
use tracing::debug;

use crate::error::TransportError;

/// A connection to one instrument.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short identifier used in logs (e.g. "tcp", "serial").
    fn name(&self) -> &str;

    fn is_open(&self) -> bool;

    async fn open(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;

    /// Close and open again. Errors while closing a broken link are ignored.
    async fn reopen(&mut self) -> Result<(), TransportError> {
        if let Err(err) = self.close().await {
            debug!(transport = self.name(), error = %err, "close before reopen failed");
        }
        self.open().await
    }

    /// Send a command without reading a response.
    async fn write(&mut self, command: &str) -> Result<(), TransportError>;

    /// Send a command and read one response line, terminator stripped.
    async fn query(&mut self, command: &str) -> Result<String, TransportError>;
}
