/*!
Cache storage adapters for snapshot persistence.

This module defines the key/value storage port the snapshot codec writes to,
plus the adapters shipped with the crate. The codec never touches the
filesystem directly, so tests and embedders can swap in any backend.
*/

pub mod local;

use crate::{Result, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Key/value byte storage used for the build-state cache
///
/// Implementations must report a missing key as `Ok(None)` from `read` and
/// reserve `Err` for real failures.
pub trait CacheStorage {
    /// Read the bytes stored under `key`
    ///
    /// # Returns
    /// `Some(bytes)` if the key exists, `None` if it does not
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `data` under `key`, replacing any previous value
    fn write(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Check if a value exists under `key`
    fn exists(&self, key: &str) -> bool;

    /// Remove the value under `key`; removing a missing key is not an error
    fn delete(&self, key: &str) -> Result<()>;
}

impl<T: CacheStorage + ?Sized> CacheStorage for Box<T> {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).read(key)
    }

    fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        (**self).write(key, data)
    }

    fn exists(&self, key: &str) -> bool {
        (**self).exists(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }
}

pub use local::LocalFileStorage;

/// Memory-based storage adapter
///
/// Stores values in a shared `HashMap`. Clones share the same map, which lets
/// tests hand one handle to a codec and inspect or corrupt the bytes through
/// another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.data
            .lock()
            .map_err(|e| StoreError::storage(format!("Memory storage lock poisoned: {e}")))
    }
}

impl CacheStorage for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        self.entries()?.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.entries()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_basic_operations() {
        let storage = MemoryStorage::new();

        assert_eq!(storage.read("redux.state").unwrap(), None);
        assert!(!storage.exists("redux.state"));

        storage.write("redux.state", b"bytes").unwrap();
        assert!(storage.exists("redux.state"));
        assert_eq!(storage.read("redux.state").unwrap(), Some(b"bytes".to_vec()));

        storage.delete("redux.state").unwrap();
        assert!(!storage.exists("redux.state"));
        assert!(storage.delete("redux.state").is_ok());
    }

    #[test]
    fn test_memory_storage_clones_share_data() {
        let storage = MemoryStorage::new();
        let handle = storage.clone();

        storage.write("k", b"v").unwrap();
        assert_eq!(handle.read("k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_boxed_storage_delegates() {
        let storage: Box<dyn CacheStorage> = Box::new(MemoryStorage::new());
        storage.write("k", b"v").unwrap();
        assert!(storage.exists("k"));
    }
}
