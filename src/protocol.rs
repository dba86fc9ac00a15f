//! Message formatting and operation checking at the driver root.
//!
//! Every default read or write of every node ends up here once the delegation
//! chain reaches the driver. A [`DriverProtocol`] turns a [`FeatureRequest`] into
//! a command, exchanges it over the transport and reports whether a completed
//! set was accepted by the instrument.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::{DriverError, DriverResult};
use crate::pipeline::{FeatureRequest, OperationStatus, SetOutcome};
use crate::transport::Transport;

/// Command formatting and operation checking of one instrument family.
#[async_trait]
pub trait DriverProtocol: Send + Sync {
    /// Render the request and return the raw response.
    async fn get_feature(&self, transport: &mut dyn Transport, request: &FeatureRequest) -> DriverResult<String> {
        let command = request.render()?;
        trace!(feature = %request.feature, %command, "query");
        let response = transport.query(&command).await?;
        Ok(response)
    }

    /// Render the request and send it. Returns the instrument's acknowledgement
    /// if the protocol reads one.
    async fn set_feature(&self, transport: &mut dyn Transport, request: &FeatureRequest) -> DriverResult<Option<String>> {
        let command = request.render()?;
        trace!(feature = %request.feature, %command, "write");
        transport.write(&command).await?;
        Ok(None)
    }

    /// Ask whether the last set succeeded.
    async fn check_operation(&self, _transport: &mut dyn Transport, _outcome: &SetOutcome) -> DriverResult<OperationStatus> {
        Ok(OperationStatus::ok())
    }
}

/// Plain message-based protocol: one command per line, no error reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageProtocol;

impl DriverProtocol for MessageProtocol {}

/// SCPI instruments report failed commands through their error queue.
#[derive(Debug, Clone)]
pub struct ScpiProtocol {
    error_query: String,
}

impl Default for ScpiProtocol {
    fn default() -> Self {
        Self {
            error_query: "SYST:ERR?".to_string(),
        }
    }
}

impl ScpiProtocol {
    pub fn with_error_query(query: &str) -> Self {
        Self {
            error_query: query.to_string(),
        }
    }
}

/// Split a SCPI error queue entry such as `-222,"Data out of range"`.
pub fn parse_scpi_error(response: &str) -> DriverResult<(i32, String)> {
    let (code, message) = response
        .trim()
        .split_once(',')
        .ok_or_else(|| DriverError::InvalidResponse {
            attribute: "error queue".to_string(),
            reason: format!("malformed error entry '{response}'"),
        })?;
    let code = code
        .trim()
        .parse::<i32>()
        .map_err(|e| DriverError::InvalidResponse {
            attribute: "error queue".to_string(),
            reason: format!("bad error code '{code}': {e}"),
        })?;
    Ok((code, message.trim().trim_matches('"').to_string()))
}

#[async_trait]
impl DriverProtocol for ScpiProtocol {
    async fn check_operation(&self, transport: &mut dyn Transport, outcome: &SetOutcome) -> DriverResult<OperationStatus> {
        let response = transport.query(&self.error_query).await?;
        let (code, message) = parse_scpi_error(&response)?;
        if code == 0 {
            Ok(OperationStatus::ok())
        } else {
            debug!(feature = %outcome.feature, code, %message, "instrument reported an error");
            Ok(OperationStatus::failed(format!("{code}: {message}")))
        }
    }
}

/// Protocol selection in configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    #[default]
    Message,
    Scpi,
}

impl ProtocolKind {
    pub fn build(self) -> Arc<dyn DriverProtocol> {
        match self {
            ProtocolKind::Message => Arc::new(MessageProtocol),
            ProtocolKind::Scpi => Arc::new(ScpiProtocol::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, Transport};
    use crate::value::Value;

    #[test]
    fn test_parse_scpi_error() {
        assert_eq!(parse_scpi_error("+0,\"No error\"").unwrap(), (0, "No error".to_string()));
        assert_eq!(
            parse_scpi_error("-222,\"Data out of range\"\n").unwrap(),
            (-222, "Data out of range".to_string())
        );
        assert!(parse_scpi_error("garbage").is_err());
    }

    #[tokio::test]
    async fn test_scpi_check_reads_error_queue() {
        let mut mock = MockTransport::new().with_response("SYST:ERR?", "-222,\"Data out of range\"");
        mock.open().await.unwrap();
        let outcome = SetOutcome {
            feature: "voltage".into(),
            value: Value::Float(99.0),
            native: Value::Float(99.0),
            ack: None,
        };
        let status = ScpiProtocol::default()
            .check_operation(&mut mock, &outcome)
            .await
            .unwrap();
        assert!(!status.ok);
        assert!(status.details.contains("Data out of range"));

        mock.set_response("SYST:ERR?", "+0,\"No error\"");
        let status = ScpiProtocol::default()
            .check_operation(&mut mock, &outcome)
            .await
            .unwrap();
        assert!(status.ok);
    }

    #[tokio::test]
    async fn test_default_get_renders_template() {
        let mut mock = MockTransport::new().with_response("VOLT2?", "1.25");
        mock.open().await.unwrap();
        let request = FeatureRequest::get("voltage", "VOLT{ch_id}?").with_context("ch_id", "2");
        let raw = MessageProtocol.get_feature(&mut mock, &request).await.unwrap();
        assert_eq!(raw, "1.25");
        assert_eq!(mock.call_log(), vec!["query:VOLT2?".to_string()]);
    }
}
