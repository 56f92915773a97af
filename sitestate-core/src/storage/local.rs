/*!
Local filesystem cache storage adapter.
*/

use super::CacheStorage;
use crate::{Result, StoreError};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Local filesystem storage adapter
///
/// Each key maps to one file inside the cache directory. Writes go to a
/// temporary file in the same directory which is then renamed over the
/// target, so a reader never sees a half-written snapshot.
///
/// # Example
/// ```rust
/// use sitestate_core::storage::{CacheStorage, LocalFileStorage};
///
/// # let dir = tempfile::tempdir()?;
/// let storage = LocalFileStorage::new(dir.path().join(".cache/redux"));
/// storage.write("redux.state", b"snapshot bytes")?;
/// assert!(storage.exists("redux.state"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    cache_dir: PathBuf,
}

impl LocalFileStorage {
    /// Create a storage adapter rooted at `cache_dir`
    ///
    /// The directory is created on first write.
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Resolve the file path for a given key
    fn resolve_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(key)
    }

    /// Ensure the cache directory exists, creating it if necessary
    fn ensure_cache_dir(&self) -> Result<()> {
        if !self.cache_dir.exists() {
            fs::create_dir_all(&self.cache_dir).map_err(|e| {
                StoreError::storage(format!(
                    "Failed to create cache directory {}: {}",
                    self.cache_dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

impl CacheStorage for LocalFileStorage {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let full_path = self.resolve_path(key);

        match fs::read(&full_path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::storage(format!(
                "Failed to read cache entry {}: {}",
                full_path.display(),
                e
            ))),
        }
    }

    fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let full_path = self.resolve_path(key);
        self.ensure_cache_dir()?;

        let mut file = NamedTempFile::new_in(&self.cache_dir).map_err(|e| {
            StoreError::storage(format!(
                "Failed to create temporary file in {}: {}",
                self.cache_dir.display(),
                e
            ))
        })?;
        file.write_all(data)?;
        file.as_file().sync_all()?;
        file.persist(&full_path).map_err(|e| {
            StoreError::storage(format!(
                "Failed to write cache entry {}: {}",
                full_path.display(),
                e.error
            ))
        })?;

        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.resolve_path(key).exists()
    }

    fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.resolve_path(key);

        match fs::remove_file(&full_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::storage(format!(
                "Failed to delete cache entry {}: {}",
                full_path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_file_storage_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::new(temp_dir.path());

        let data = b"snapshot bytes";
        let key = "redux.state";

        assert!(storage.write(key, data).is_ok());
        assert!(storage.exists(key));
        assert_eq!(storage.read(key).unwrap(), Some(data.to_vec()));

        assert!(storage.delete(key).is_ok());
        assert!(!storage.exists(key));
    }

    #[test]
    fn test_missing_key_reads_as_none() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::new(temp_dir.path().join("never-created"));

        assert_eq!(storage.read("redux.state").unwrap(), None);
        assert!(storage.delete("redux.state").is_ok());
    }

    #[test]
    fn test_write_creates_cache_dir_and_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::new(temp_dir.path().join(".cache").join("redux"));

        storage.write("redux.state", b"first").unwrap();
        storage.write("redux.state", b"second").unwrap();

        assert_eq!(
            storage.read("redux.state").unwrap(),
            Some(b"second".to_vec())
        );
        let leftovers = fs::read_dir(storage.cache_dir()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_read_directory_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("redux.state")).unwrap();
        let storage = LocalFileStorage::new(temp_dir.path());

        assert!(storage.read("redux.state").is_err());
    }
}
