//! Tracing subscriber setup for applications embedding drivers.

use tracing_subscriber::EnvFilter;

use crate::config::ConfigError;

/// Output format of [`init_tracing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Build the filter: `RUST_LOG` when set, otherwise `level`.
pub fn env_filter(level: &str) -> Result<EnvFilter, ConfigError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| ConfigError::Validation(format!("Invalid log filter '{level}': {e}"))),
    }
}

/// Install a global fmt subscriber. Returns `false` if one was already set.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<bool, ConfigError> {
    let filter = env_filter(level)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match format {
        LogFormat::Pretty => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    };
    if installed {
        tracing::info!(level, "tracing initialized");
    }
    Ok(installed)
}
