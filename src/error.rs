//! Error types for the feature/action pipeline.
//!
//! `DriverError` is the single error type returned by every public operation on a
//! driver node. Using the `thiserror` crate, it separates the failure classes the
//! pipeline must treat differently:
//!
//! - **Gating**: `AccessDenied` (options gate false, permanent for the node instance)
//!   and `PreconditionFailed` (checks gate false, may succeed later). Never retried.
//! - **Validation**: `InvalidArgument` (a value supplied by the caller was rejected)
//!   and `InvalidResponse` (a device response could not be converted). Never retried.
//! - **Transport class**: `Transport` (link failure) and `OperationFailed` (the device
//!   reported an error after a set or call). Both trigger the retry protocol, the
//!   latter unless the attribute opted out. A rejected command is a transport error
//!   that a reconnect cannot fix, so it is not retried.
//! - **Terminal**: `CommunicationFailed` wraps every cause of an exhausted retry
//!   sequence, the most recent last.
//!
//! Transport adapters report `TransportError`, which converts into `DriverError`
//! through `#[from]` so adapter calls compose with `?`.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Link-level failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport not connected")]
    NotConnected,

    #[error("Transport timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected EOF from transport")]
    UnexpectedEof,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Link error: {0}")]
    Link(String),

    /// The device answered, but refused or did not know the command.
    #[error("Command rejected: {0}")]
    Rejected(String),
}

impl From<anyhow::Error> for TransportError {
    fn from(err: anyhow::Error) -> Self {
        // Keep the whole context chain in the message.
        TransportError::Link(format!("{err:#}"))
    }
}

/// Errors returned by feature, action and channel operations.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Access to '{attribute}' denied on {node}: option '{gate}' not available")]
    AccessDenied {
        node: String,
        attribute: String,
        gate: String,
    },

    #[error("Precondition '{gate}' failed for '{attribute}' on {node}")]
    PreconditionFailed {
        node: String,
        attribute: String,
        gate: String,
    },

    #[error("Invalid argument for '{attribute}': {reason}")]
    InvalidArgument { attribute: String, reason: String },

    #[error("Invalid response for '{attribute}': {reason}")]
    InvalidResponse { attribute: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Operation on '{attribute}' failed: {details}")]
    OperationFailed { attribute: String, details: String },

    #[error("Communication failed for '{attribute}' after {} attempt(s): {}", .causes.len(), render_causes(.causes))]
    CommunicationFailed {
        attribute: String,
        causes: Vec<DriverError>,
    },

    #[error("Unknown channel '{key}' in '{container}'")]
    UnknownChannel { container: String, key: String },

    #[error("Unknown attribute '{attribute}' on {node}")]
    UnknownAttribute { node: String, attribute: String },

    #[error("Feature '{0}' cannot be read")]
    NotReadable(String),

    #[error("Feature '{0}' cannot be set")]
    NotSettable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Node {0} outlived its driver")]
    Detached(String),

    #[error("Job '{action}' did not complete within {timeout:?}")]
    JobTimeout { action: String, timeout: Duration },

    #[error("Job '{0}' was cancelled")]
    JobCancelled(String),
}

fn render_causes(causes: &[DriverError]) -> String {
    causes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl DriverError {
    pub(crate) fn invalid_argument(attribute: &str, reason: impl Into<String>) -> Self {
        DriverError::InvalidArgument {
            attribute: attribute.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_response(attribute: &str, reason: impl Into<String>) -> Self {
        DriverError::InvalidResponse {
            attribute: attribute.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error participates in the retry protocol.
    ///
    /// `retry_operation_failures` lets an attribute reclassify device-reported
    /// operation failures as terminal.
    pub fn is_transport_class(&self, retry_operation_failures: bool) -> bool {
        match self {
            DriverError::Transport(TransportError::Rejected(_)) => false,
            DriverError::Transport(_) => true,
            DriverError::OperationFailed { .. } => retry_operation_failures,
            _ => false,
        }
    }

    /// Underlying causes of a terminal communication failure, oldest first.
    pub fn causes(&self) -> &[DriverError] {
        match self {
            DriverError::CommunicationFailed { causes, .. } => causes,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DriverError::invalid_argument("mode", "'BAD' not in ['CW', 'PULSED']");
        assert_eq!(
            err.to_string(),
            "Invalid argument for 'mode': 'BAD' not in ['CW', 'PULSED']"
        );
    }

    #[test]
    fn test_communication_failed_lists_causes() {
        let err = DriverError::CommunicationFailed {
            attribute: "voltage".into(),
            causes: vec![
                TransportError::Timeout(Duration::from_millis(5)).into(),
                TransportError::NotConnected.into(),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("after 2 attempt(s)"));
        assert!(text.ends_with("Transport error: Transport not connected"));
        assert_eq!(err.causes().len(), 2);
    }

    #[test]
    fn test_transport_classification() {
        let op = DriverError::OperationFailed {
            attribute: "voltage".into(),
            details: "-222,Data out of range".into(),
        };
        assert!(op.is_transport_class(true));
        assert!(!op.is_transport_class(false));
        assert!(DriverError::from(TransportError::NotConnected).is_transport_class(false));
        assert!(!DriverError::invalid_response("x", "y").is_transport_class(true));
        assert!(!DriverError::from(TransportError::Rejected("FOO?".into())).is_transport_class(true));
    }

    #[test]
    fn test_anyhow_context_is_kept() {
        let err: TransportError = anyhow::anyhow!("read error")
            .context("Failed to query serial port")
            .into();
        assert_eq!(
            err.to_string(),
            "Link error: Failed to query serial port: read error"
        );
    }
}
