//! Process-wide logging setup.
//!
//! Library code logs through the `log` facade and opens `tracing` spans;
//! `init_logging` installs one subscriber that receives both.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::LoggingConfig;
use crate::error::ConfigError;

/// Builds the level filter. `RUST_LOG` wins over the configured level.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| ConfigError::Logging(format!("invalid log level '{}': {}", config.level, e)))
}

/// Installs the global subscriber and the `log` bridge.
///
/// Returns an error instead of panicking when called a second time.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = build_filter(config)?;
    let registry = Registry::default().with(filter);

    let installed = if config.json {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))
    } else {
        tracing::subscriber::set_global_default(registry.with(fmt::layer()))
    };
    installed.map_err(|e| ConfigError::Logging(e.to_string()))?;

    tracing_log::LogTracer::init().map_err(|e| ConfigError::Logging(e.to_string()))?;

    log::debug!("Logging initialized at level {}", config.level);
    Ok(())
}
