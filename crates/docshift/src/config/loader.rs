use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;

pub const ENV_UPLOAD_DIR: &str = "DOCSHIFT_UPLOAD_DIR";
pub const ENV_DATABASE_PATH: &str = "DOCSHIFT_DATABASE_PATH";
pub const ENV_WORKER_COUNT: &str = "DOCSHIFT_WORKER_COUNT";
pub const ENV_LOG_LEVEL: &str = "DOCSHIFT_LOG_LEVEL";

/// Smallest accepted share token length.
pub const MIN_TOKEN_LENGTH: usize = 32;
/// Longest share token lifetime: one hundred years.
pub const MAX_EXPIRY_HOURS: i64 = 24 * 365 * 100;
/// Longest graceful drain at shutdown: one day.
pub const MAX_SHUTDOWN_TIMEOUT_SECS: u64 = 24 * 60 * 60;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let mut config: Config = serde_json::from_str(content)?;

    apply_env_overrides(&mut config)?;
    validate_config(&config)?;

    Ok(config)
}

/// Applies `DOCSHIFT_*` environment variables on top of the file values.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Some(dir) = env_value(ENV_UPLOAD_DIR) {
        config.storage.upload_directory = PathBuf::from(dir);
    }
    if let Some(path) = env_value(ENV_DATABASE_PATH) {
        config.database.path = Some(PathBuf::from(path));
    }
    if let Some(count) = env_value(ENV_WORKER_COUNT) {
        config.conversion.worker_count = count.parse().map_err(|_| ConfigError::Validation {
            message: format!("{} must be a positive integer, got '{}'", ENV_WORKER_COUNT, count),
        })?;
    }
    if let Some(level) = env_value(ENV_LOG_LEVEL) {
        config.logging.level = level;
    }
    Ok(())
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let fail = |message: String| Err(ConfigError::Validation { message });

    if config.version != "1.0" {
        return fail(format!("Unsupported config version: {}", config.version));
    }
    if config.storage.max_upload_bytes == 0 {
        return fail("storage.max_upload_bytes must be greater than zero".to_string());
    }
    for (field, value) in [
        ("storage.originals_directory", &config.storage.originals_directory),
        ("storage.converted_directory", &config.storage.converted_directory),
    ] {
        if value.is_empty() || value.contains(['/', '\\']) || value.contains("..") {
            return fail(format!("{} must be a plain directory name", field));
        }
    }
    if config.conversion.worker_count == 0 {
        return fail("conversion.worker_count must be at least 1".to_string());
    }
    if config.conversion.shutdown_timeout_secs > MAX_SHUTDOWN_TIMEOUT_SECS {
        return fail(format!(
            "conversion.shutdown_timeout_secs must be at most {}, got {}",
            MAX_SHUTDOWN_TIMEOUT_SECS, config.conversion.shutdown_timeout_secs
        ));
    }
    if config.share.token_length < MIN_TOKEN_LENGTH {
        return fail(format!(
            "share.token_length must be at least {}, got {}",
            MIN_TOKEN_LENGTH, config.share.token_length
        ));
    }
    if config.share.expiry_hours <= 0 {
        return fail("share.expiry_hours must be greater than zero".to_string());
    }
    if config.share.expiry_hours > MAX_EXPIRY_HOURS {
        return fail(format!(
            "share.expiry_hours must be at most {}, got {}",
            MAX_EXPIRY_HOURS, config.share.expiry_hours
        ));
    }
    if config.share.max_access == 0 {
        return fail("share.max_access must be greater than zero".to_string());
    }

    Ok(())
}
