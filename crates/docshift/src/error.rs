use std::path::PathBuf;
use thiserror::Error;

pub use crate::db::DatabaseError;

/// Errors surfaced by the service boundary.
///
/// `NotFound` is also used for ownership mismatches so callers cannot probe
/// for the existence of other users' jobs.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Share link has expired")]
    Expired,

    #[error("Share link has reached its maximum number of accesses")]
    QuotaExceeded,

    #[error("Access denied: {0}")]
    Security(#[from] SecurityError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// True for failures caused by the caller rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Conflict(_)
                | Self::NotFound(_)
                | Self::Expired
                | Self::QuotaExceeded
        ) || matches!(self, Self::Security(e) if !matches!(e, SecurityError::RandomSource(_)))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

/// Raised by a converter or by the runner while preparing a conversion.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Source file does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write document '{path}': {source}")]
    WriteDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to process PDF: {0}")]
    Pdf(String),

    #[error("Failed to process Word document: {0}")]
    Docx(String),

    #[error("Failed to process spreadsheet: {0}")]
    Xlsx(String),

    #[error("No converter registered for {0}")]
    NoConverter(String),

    #[error("Failed to prepare output location: {0}")]
    Output(#[from] StorageError),

    #[error("Refused file reference: {0}")]
    Security(#[from] SecurityError),

    #[error("Converter reported success but wrote no output")]
    NoOutput,

    #[error("Converter panicked: {0}")]
    Panicked(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete file '{path}': {source}")]
    DeleteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker pool is not accepting new jobs")]
    ChannelClosed,
}

/// Rejection raised by the access guard.
///
/// The messages deliberately carry no path so they can be returned to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("empty file reference")]
    EmptyPath,

    #[error("path traversal detected")]
    PathTraversal,

    #[error("file reference is outside the permitted directory")]
    OutsideBase,

    #[error("secure random source unavailable: {0}")]
    RandomSource(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
