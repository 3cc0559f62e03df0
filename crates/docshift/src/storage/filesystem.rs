use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;

use super::{DeleteError, StorageBackend};
use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::guard::resolve_safe_path;
use crate::model::UserId;
use crate::sanitize::{extension_of, redact_path, unique_filename};

/// Attempts before giving up on finding a free generated name.
const MAX_NAME_ATTEMPTS: usize = 16;

/// Anchors a relative root at the working directory so stored paths are
/// absolute and can be checked against it.
fn absolute_root(root: &Path) -> PathBuf {
    std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf())
}

/// Local-disk storage laid out as `<root>/<owner>/<originals|converted>/`.
pub struct FileStorage {
    root: PathBuf,
    originals_directory: String,
    converted_directory: String,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let defaults = StorageConfig::default();
        Self {
            root: absolute_root(root.as_ref()),
            originals_directory: defaults.originals_directory,
            converted_directory: defaults.converted_directory,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            root: absolute_root(&config.upload_directory),
            originals_directory: config.originals_directory.clone(),
            converted_directory: config.converted_directory.clone(),
        }
    }

    fn owner_dir(&self, owner: UserId, leaf: &str) -> PathBuf {
        self.root.join(owner.to_string()).join(leaf)
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Creates the file with O_EXCL so an existing file is never replaced.
    /// A collision regenerates the name.
    fn store_with_atomic_creation(
        &self,
        dir_path: &Path,
        original_filename: &str,
        content: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let extension = extension_of(original_filename).unwrap_or_else(|| "bin".to_string());

        let mut last_path = dir_path.to_path_buf();
        for _ in 0..MAX_NAME_ATTEMPTS {
            let try_path = dir_path.join(unique_filename(original_filename, &extension));

            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&try_path)
            {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(content).and_then(|_| file.sync_all()) {
                        let _ = std::fs::remove_file(&try_path);
                        return Err(StorageError::WriteFile {
                            path: try_path,
                            source: e,
                        });
                    }
                    return Ok(try_path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    last_path = try_path;
                    continue;
                }
                Err(e) => {
                    return Err(StorageError::WriteFile {
                        path: try_path,
                        source: e,
                    });
                }
            }
        }

        Err(StorageError::FileExists(last_path))
    }
}

impl StorageBackend for FileStorage {
    fn store_upload(
        &self,
        owner: UserId,
        original_filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let dir_path = self.owner_dir(owner, &self.originals_directory);
        self.ensure_directory(&dir_path)?;

        let path = self.store_with_atomic_creation(&dir_path, original_filename, bytes)?;
        debug!("Stored upload {} ({} bytes)", redact_path(&path), bytes.len());
        Ok(path)
    }

    fn converted_dir(&self, owner: UserId) -> Result<PathBuf, StorageError> {
        let dir_path = self.owner_dir(owner, &self.converted_directory);
        self.ensure_directory(&dir_path)?;
        Ok(dir_path)
    }

    fn delete_at_path(&self, path: &Path) -> Result<bool, DeleteError> {
        let safe = resolve_safe_path(path, Some(&self.root))?;
        match std::fs::remove_file(&safe) {
            Ok(()) => {
                debug!("Deleted {}", redact_path(&safe));
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::DeleteFile {
                path: safe,
                source: e,
            }
            .into()),
        }
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SecurityError;
    use tempfile::TempDir;

    #[test]
    fn test_store_upload_layout() {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::new(temp.path());

        let path = storage.store_upload(42, "Annual Report.pdf", b"%PDF-1.5").unwrap();
        assert!(path.starts_with(temp.path().join("42").join("originals")));
        assert!(path.to_string_lossy().ends_with("_Annual_Report.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.5");
    }

    #[test]
    fn test_same_name_twice_keeps_both() {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::new(temp.path());

        let a = storage.store_upload(1, "a.pdf", b"one").unwrap();
        let b = storage.store_upload(1, "a.pdf", b"two").unwrap();
        assert_ne!(a, b);
        assert_eq!(std::fs::read(&a).unwrap(), b"one");
        assert_eq!(std::fs::read(&b).unwrap(), b"two");
    }

    #[test]
    fn test_hostile_name_stays_in_owner_dir() {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::new(temp.path());

        let path = storage.store_upload(7, "../../../etc/cron.d/x.pdf", b"x").unwrap();
        assert_eq!(path.parent().unwrap(), temp.path().join("7").join("originals"));
    }

    #[test]
    fn test_converted_dir_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::new(temp.path());

        let first = storage.converted_dir(3).unwrap();
        let second = storage.converted_dir(3).unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
        assert!(first.ends_with("3/converted"));
    }

    #[test]
    fn test_delete_at_path() {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::new(temp.path());

        let path = storage.store_upload(1, "a.pdf", b"x").unwrap();
        assert!(storage.delete_at_path(&path).unwrap());
        assert!(!path.exists());
        assert!(!storage.delete_at_path(&path).unwrap());
    }

    #[test]
    fn test_delete_outside_root_is_refused() {
        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let victim = outside.path().join("keep.txt");
        std::fs::write(&victim, b"keep").unwrap();

        let storage = FileStorage::new(temp.path());
        let err = storage.delete_at_path(&victim).unwrap_err();
        assert!(matches!(err, DeleteError::Security(SecurityError::OutsideBase)));

        let sneaky = temp.path().join("..").join("..").join("etc").join("passwd");
        assert!(matches!(
            storage.delete_at_path(&sneaky).unwrap_err(),
            DeleteError::Security(_)
        ));
        assert!(victim.exists());
    }

    #[test]
    fn test_from_config_uses_directory_names() {
        let temp = TempDir::new().unwrap();
        let config = StorageConfig {
            upload_directory: temp.path().to_path_buf(),
            originals_directory: "in".to_string(),
            converted_directory: "out".to_string(),
            ..StorageConfig::default()
        };
        let storage = FileStorage::from_config(&config);
        assert!(storage.converted_dir(5).unwrap().ends_with("5/out"));
        assert!(storage.store_upload(5, "a.pdf", b"x").unwrap().starts_with(temp.path().join("5").join("in")));
    }
}
