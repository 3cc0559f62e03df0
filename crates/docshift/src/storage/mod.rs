pub mod filesystem;

use std::path::{Path, PathBuf};

use crate::error::{SecurityError, StorageError};
use crate::model::UserId;

pub use filesystem::FileStorage;

/// Where uploaded originals and converted outputs live.
pub trait StorageBackend: Send + Sync {
    /// Persists uploaded bytes under the owner's area and returns the new path.
    /// Never overwrites an existing file.
    fn store_upload(
        &self,
        owner: UserId,
        original_filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StorageError>;

    /// The owner's output directory, created if missing.
    fn converted_dir(&self, owner: UserId) -> Result<PathBuf, StorageError>;

    /// Removes a stored file. Returns false if it was already gone.
    fn delete_at_path(&self, path: &Path) -> Result<bool, DeleteError>;

    /// Directory every stored path must fall under.
    fn root(&self) -> &Path;
}

/// Failure to delete: either the path was refused or the filesystem failed.
#[derive(thiserror::Error, Debug)]
pub enum DeleteError {
    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<DeleteError> for crate::error::ServiceError {
    fn from(err: DeleteError) -> Self {
        match err {
            DeleteError::Security(e) => Self::Security(e),
            DeleteError::Storage(e) => Self::Storage(e),
        }
    }
}
