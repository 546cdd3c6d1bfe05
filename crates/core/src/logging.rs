//! Structured logging bootstrap
//!
//! Installs a `tracing` subscriber driven by [`LoggingConfig`]. `RUST_LOG`
//! wins over the configured level when it is set.

use serde_json::json;
use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{ConfigError, LoggingConfig};

/// Initialize logging for a trellis process
///
/// Logs go to stderr so command output on stdout stays machine readable.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_lowercase()))
        .map_err(|e| ConfigError::Logging {
            message: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format.to_lowercase().as_str() {
        "json" => registry
            .with(Layer::new().with_writer(io::stderr).json())
            .try_init(),
        "pretty" => registry
            .with(Layer::new().with_writer(io::stderr).pretty())
            .try_init(),
        _ => registry
            .with(Layer::new().with_writer(io::stderr).compact())
            .try_init(),
    };

    installed.map_err(|e| ConfigError::Logging {
        message: e.to_string(),
    })?;

    tracing::debug!(
        target: "trellis::logging",
        "{}",
        json!({
            "message": "Structured logging initialized",
            "level": config.level,
            "format": config.format,
        })
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_reports_error() {
        let config = LoggingConfig {
            level: "error".to_string(),
            format: "compact".to_string(),
        };

        assert!(init_logging(&config).is_ok());
        assert!(matches!(
            init_logging(&config),
            Err(ConfigError::Logging { .. })
        ));
    }
}
