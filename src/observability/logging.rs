//! # Structured Logging
//!
//! Installs the global `tracing` subscriber. JSON output is the default so log shippers can
//! index fields; the text format is meant for a developer terminal.
//!
//! `RUST_LOG` wins over the configured level when it is set, which allows per-module filters
//! such as `observations_api=debug,sqlx=warn` without a config change.

use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use super::config::{LogConfig, LogFormat};
use crate::core::error::{ObservationsError, ObservationsResult};

fn env_filter(config: &LogConfig) -> ObservationsResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            ObservationsError::config(format!("Invalid log level '{}': {}", config.level, e))
        }),
    }
}

/// Install the global subscriber described by `config`
///
/// Calling this twice is harmless: the second subscriber is discarded with a warning.
pub fn init_logging(config: &LogConfig) -> ObservationsResult<()> {
    let filter = env_filter(config)?;

    let result = match config.format {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Text => Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init(),
    };

    if result.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
        return Ok(());
    }

    info!(level = %config.level, format = ?config.format, "Structured logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_a_config_error() {
        std::env::remove_var("RUST_LOG");
        let config = LogConfig {
            level: "observations_api=notalevel".to_string(),
            format: LogFormat::Text,
        };
        assert!(env_filter(&config).is_err());
    }

    #[test]
    fn test_init_twice_is_ok() {
        let config = LogConfig::default();
        init_logging(&config).unwrap();
        init_logging(&config).unwrap();
    }
}
