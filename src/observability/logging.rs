//! # Structured Logging
//!
//! Installs the global `tracing` subscriber: an `EnvFilter` plus a JSON or text
//! `fmt` layer writing to stdout or to an append-mode log file. Also provides
//! the correlation id attached to every inbound request.

use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};
use uuid::Uuid;

use crate::core::error::{GatewayError, GatewayResult};
use crate::observability::config::{LogConfig, LogFormat, LogOutput};

/// Correlation ID for tracking a request through the logs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a new correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Reuse an id supplied by the client
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Build the filter: `RUST_LOG` when set, the configured level otherwise
fn env_filter(config: &LogConfig) -> GatewayResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| GatewayError::config(format!("Invalid log level '{}': {}", config.level, e))),
    }
}

fn try_init_with<W>(config: &LogConfig, filter: EnvFilter, writer: W) -> bool
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match config.format {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_writer(writer),
            )
            .try_init()
            .is_ok(),
        LogFormat::Text => Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true).with_ansi(false).with_writer(writer))
            .try_init()
            .is_ok(),
    }
}

/// Install the global subscriber described by `config`.
///
/// Calling it again once a subscriber is installed only logs a warning.
pub fn init_logging(config: &LogConfig) -> GatewayResult<()> {
    let filter = env_filter(config)?;

    let installed = match &config.output {
        LogOutput::Stdout => try_init_with(config, filter, std::io::stdout),
        LogOutput::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| GatewayError::config(format!("Failed to open log file '{}': {}", path, e)))?;
            try_init_with(config, filter, Mutex::new(file))
        }
    };

    if !installed {
        warn!("Tracing subscriber already initialized, skipping initialization");
        return Ok(());
    }

    info!(level = %config.level, format = ?config.format, "Structured logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_correlation_ids_are_unique() {
        let a = CorrelationId::new();
        let b = CorrelationId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
        assert_eq!(CorrelationId::from_string("abc".into()).to_string(), "abc");
    }

    #[test]
    fn test_invalid_level_is_config_error() {
        let config = LogConfig {
            level: "music_api_gateway=loud".to_string(),
            ..Default::default()
        };
        if std::env::var("RUST_LOG").is_err() {
            assert!(matches!(env_filter(&config), Err(GatewayError::Configuration { .. })));
        }
    }

    #[test]
    fn test_unwritable_log_file_is_config_error() {
        let dir = tempdir().unwrap();
        let config = LogConfig {
            output: LogOutput::File(dir.path().join("missing/dir/gateway.log").display().to_string()),
            ..Default::default()
        };
        assert!(matches!(init_logging(&config), Err(GatewayError::Configuration { .. })));
    }
}
