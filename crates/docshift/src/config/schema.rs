use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub share: ShareConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            storage: StorageConfig::default(),
            database: DatabaseConfig::default(),
            conversion: ConversionConfig::default(),
            share: ShareConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_upload_directory")]
    pub upload_directory: PathBuf,
    #[serde(default = "default_originals_directory")]
    pub originals_directory: String,
    #[serde(default = "default_converted_directory")]
    pub converted_directory: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

fn default_upload_directory() -> PathBuf {
    PathBuf::from("storage/uploads")
}

fn default_originals_directory() -> String {
    "originals".to_string()
}

fn default_converted_directory() -> String {
    "converted".to_string()
}

fn default_max_upload_bytes() -> u64 {
    100 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_directory: default_upload_directory(),
            originals_directory: default_originals_directory(),
            converted_directory: default_converted_directory(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Falls back to `db::default_database_path()` when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_worker_count() -> usize {
    5
}

fn default_shutdown_timeout_secs() -> u64 {
    60
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareConfig {
    #[serde(default = "default_token_length")]
    pub token_length: usize,
    #[serde(default = "default_expiry_hours")]
    pub expiry_hours: i64,
    #[serde(default = "default_max_access")]
    pub max_access: u32,
}

fn default_token_length() -> usize {
    64
}

fn default_expiry_hours() -> i64 {
    24
}

fn default_max_access() -> u32 {
    10
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            token_length: default_token_length(),
            expiry_hours: default_expiry_hours(),
            max_access: default_max_access(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
