//! Driver configuration using Figment.
//!
//! Configuration is loaded from a TOML file and then overridden by environment
//! variables prefixed with `INSTR_`, nested keys separated by `__`:
//!
//! ```text
//! INSTR_LOG_LEVEL=debug
//! INSTR_PIPELINE__DEFAULT_RETRIES=3
//! INSTR_TRANSPORT__ADDRESS=192.168.1.20:5025
//! ```
//!
//! # Example
//!
//! ```toml
//! name = "bench_supply"
//! log_level = "info"
//! protocol = "scpi"
//!
//! [pipeline]
//! caching_allowed = true
//! default_retries = 2
//! reopen_delay_ms = 100
//!
//! [transport]
//! kind = "tcp"
//! address = "192.168.1.20:5025"
//! timeout_ms = 2000
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::error::{DriverError, DriverResult};
use crate::protocol::ProtocolKind;
use crate::transport::{MockTransport, TcpTransport, Transport};

/// Failures loading or checking a [`DriverConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    Load(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    Validation(String),
    #[error("Configuration serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Top-level driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Instance name used in logs; defaults to the node type name.
    #[serde(default)]
    pub name: Option<String>,
    /// Level handed to [`crate::telemetry::init_tracing`] by applications.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub protocol: ProtocolKind,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    pub transport: TransportConfig,
}

/// Behaviour of the feature/action pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Global switch for the per-node feature caches.
    #[serde(default = "default_caching_allowed")]
    pub caching_allowed: bool,
    /// Retries of attributes that do not declare their own count.
    #[serde(default)]
    pub default_retries: u32,
    /// Pause after reopening the link before the next attempt.
    #[serde(default = "default_reopen_delay")]
    pub reopen_delay_ms: u64,
    #[serde(default = "default_job_poll_interval")]
    pub job_poll_interval_ms: u64,
    #[serde(default = "default_job_timeout")]
    pub job_timeout_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            caching_allowed: default_caching_allowed(),
            default_retries: 0,
            reopen_delay_ms: default_reopen_delay(),
            job_poll_interval_ms: default_job_poll_interval(),
            job_timeout_ms: default_job_timeout(),
        }
    }
}

impl PipelineSettings {
    pub fn reopen_delay(&self) -> Duration {
        Duration::from_millis(self.reopen_delay_ms)
    }

    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }
}

/// Link to the instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// In-memory simulator, optionally preloaded with responses.
    Mock {
        #[serde(default)]
        responses: std::collections::BTreeMap<String, String>,
    },
    Tcp {
        /// `host:port`
        address: String,
        #[serde(default = "default_timeout")]
        timeout_ms: u64,
        #[serde(default = "default_write_termination")]
        write_termination: String,
        #[serde(default = "default_read_termination")]
        read_termination: String,
    },
    Serial {
        port: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        #[serde(default = "default_timeout")]
        timeout_ms: u64,
        #[serde(default = "default_serial_write_termination")]
        write_termination: String,
        #[serde(default = "default_read_termination")]
        read_termination: String,
    },
}

impl TransportConfig {
    /// Build the (unopened) transport described by this section.
    pub fn connect(&self) -> DriverResult<Box<dyn Transport>> {
        match self {
            TransportConfig::Mock { responses } => {
                let mock = MockTransport::new();
                for (query, response) in responses {
                    mock.set_response(query, response);
                }
                Ok(Box::new(mock))
            }
            TransportConfig::Tcp {
                address,
                timeout_ms,
                write_termination,
                read_termination,
            } => Ok(Box::new(
                TcpTransport::new(address, Duration::from_millis(*timeout_ms))
                    .with_termination(write_termination, termination_byte(read_termination)?),
            )),
            #[cfg(feature = "instrument_serial")]
            TransportConfig::Serial {
                port,
                baud_rate,
                timeout_ms,
                write_termination,
                read_termination,
            } => Ok(Box::new(
                crate::transport::SerialTransport::new(
                    port,
                    *baud_rate,
                    Duration::from_millis(*timeout_ms),
                )
                .with_termination(write_termination, termination_byte(read_termination)?),
            )),
            #[cfg(not(feature = "instrument_serial"))]
            TransportConfig::Serial { port, .. } => Err(DriverError::Configuration(format!(
                "Serial port '{port}' requested but serial support is not enabled. Rebuild with --features instrument_serial"
            ))),
        }
    }
}

fn termination_byte(termination: &str) -> DriverResult<u8> {
    match termination.as_bytes() {
        [byte] => Ok(*byte),
        _ => Err(DriverError::Configuration(format!(
            "read termination must be a single byte, got {termination:?}"
        ))),
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_caching_allowed() -> bool {
    true
}

fn default_reopen_delay() -> u64 {
    100
}

fn default_job_poll_interval() -> u64 {
    100
}

fn default_job_timeout() -> u64 {
    60_000
}

fn default_timeout() -> u64 {
    2_000
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_write_termination() -> String {
    "\n".to_string()
}

fn default_serial_write_termination() -> String {
    "\r\n".to_string()
}

fn default_read_termination() -> String {
    "\n".to_string()
}

impl DriverConfig {
    /// Load configuration from a TOML file plus `INSTR_` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file cannot be parsed or fails validation.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("INSTR_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML, e.g. to save a working setup.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check values serde cannot: log level names, non-zero timeouts and a
    /// usable transport description.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.pipeline.job_poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "job_poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.pipeline.job_timeout_ms < self.pipeline.job_poll_interval_ms {
            return Err(ConfigError::Validation(format!(
                "job_timeout_ms ({}) is shorter than job_poll_interval_ms ({})",
                self.pipeline.job_timeout_ms, self.pipeline.job_poll_interval_ms
            )));
        }

        match &self.transport {
            TransportConfig::Mock { .. } => {}
            TransportConfig::Tcp {
                address,
                timeout_ms,
                read_termination,
                ..
            } => {
                if address.rsplit_once(':').is_none() {
                    return Err(ConfigError::Validation(format!(
                        "TCP address '{address}' must be host:port"
                    )));
                }
                validate_link(*timeout_ms, read_termination)?;
            }
            TransportConfig::Serial {
                port,
                baud_rate,
                timeout_ms,
                read_termination,
                ..
            } => {
                if port.is_empty() {
                    return Err(ConfigError::Validation("Serial port name is empty".to_string()));
                }
                if *baud_rate == 0 {
                    return Err(ConfigError::Validation(format!(
                        "Invalid baud_rate 0 for serial port '{port}'"
                    )));
                }
                validate_link(*timeout_ms, read_termination)?;
            }
        }
        Ok(())
    }
}

fn validate_link(timeout_ms: u64, read_termination: &str) -> Result<(), ConfigError> {
    if timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "timeout_ms must be greater than 0".to_string(),
        ));
    }
    if read_termination.len() != 1 {
        return Err(ConfigError::Validation(format!(
            "read_termination must be a single byte, got {read_termination:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_load_tcp_config_with_defaults() {
        let file = write_config(
            r#"
            name = "bench_supply"
            protocol = "scpi"

            [transport]
            kind = "tcp"
            address = "192.168.1.20:5025"
            "#,
        );
        let config = DriverConfig::load_from(file.path()).unwrap();
        assert_eq!(config.name.as_deref(), Some("bench_supply"));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.protocol, ProtocolKind::Scpi);
        assert_eq!(config.pipeline, PipelineSettings::default());
        assert!(matches!(
            config.transport,
            TransportConfig::Tcp { timeout_ms: 2000, .. }
        ));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = write_config(
            r#"
            [pipeline]
            default_retries = 1

            [transport]
            kind = "mock"
            "#,
        );
        std::env::set_var("INSTR_PIPELINE__DEFAULT_RETRIES", "4");
        std::env::set_var("INSTR_LOG_LEVEL", "debug");
        let config = DriverConfig::load_from(file.path());
        std::env::remove_var("INSTR_PIPELINE__DEFAULT_RETRIES");
        std::env::remove_var("INSTR_LOG_LEVEL");

        let config = config.unwrap();
        assert_eq!(config.pipeline.default_retries, 4);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    #[serial]
    fn test_invalid_log_level() {
        let file = write_config(
            r#"
            log_level = "verbose"
            [transport]
            kind = "mock"
            "#,
        );
        let err = DriverConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(msg) if msg.contains("verbose")));
    }

    #[test]
    #[serial]
    fn test_saved_config_loads_back() {
        let file = write_config(
            r#"
            log_level = "warn"
            [pipeline]
            caching_allowed = false
            [transport]
            kind = "serial"
            port = "/dev/ttyUSB0"
            baud_rate = 115200
            "#,
        );
        let config = DriverConfig::load_from(file.path()).unwrap();
        let saved = write_config(&config.to_toml_string().unwrap());
        let reloaded = DriverConfig::load_from(saved.path()).unwrap();
        assert_eq!(reloaded.transport, config.transport);
        assert!(!reloaded.pipeline.caching_allowed);
        assert_eq!(reloaded.log_level, "warn");
    }

    #[test]
    fn test_tcp_address_needs_port() {
        let config = DriverConfig {
            name: None,
            log_level: "info".into(),
            protocol: ProtocolKind::Message,
            pipeline: PipelineSettings::default(),
            transport: TransportConfig::Tcp {
                address: "localhost".into(),
                timeout_ms: 100,
                write_termination: "\n".into(),
                read_termination: "\n".into(),
            },
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mock_transport_is_preloaded() {
        let mut responses = std::collections::BTreeMap::new();
        responses.insert("*IDN?".to_string(), "ACME".to_string());
        let transport = TransportConfig::Mock { responses }.connect().unwrap();
        assert_eq!(transport.name(), "mock");
    }

    #[cfg(not(feature = "instrument_serial"))]
    #[test]
    fn test_serial_requires_feature() {
        let err = TransportConfig::Serial {
            port: "/dev/ttyUSB0".into(),
            baud_rate: 9600,
            timeout_ms: 100,
            write_termination: "\r\n".into(),
            read_termination: "\n".into(),
        }
        .connect()
        .err()
        .unwrap();
        assert!(err.to_string().contains("instrument_serial"));
    }
}
