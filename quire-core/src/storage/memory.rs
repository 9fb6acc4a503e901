//! In-memory backend for tests and ephemeral sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

use super::StorageBackend;
use crate::error::StorageError;

/// HashMap-backed partition.
///
/// Counts writes and can be told to fail them, which is how the store's
/// "no write side effect" and transport-error paths are exercised.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    writes: AtomicU64,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `put`/`delete` calls so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Make every subsequent `put`/`delete` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn contains_key(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StorageError::Database("writes disabled".into()));
        }
        Ok(())
    }
}

impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.check_writable()?;
        self.entries.write().await.insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        self.entries.write().await.remove(key);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let backend = MemoryBackend::new();
        assert!(backend.get("k").await.unwrap().is_none());

        backend.put("k", vec![1, 2]).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(vec![1, 2]));

        backend.delete("k").await.unwrap();
        assert!(backend.get("k").await.unwrap().is_none());
        // Deleting again is fine
        backend.delete("k").await.unwrap();
        assert_eq!(backend.writes(), 3);
    }

    #[tokio::test]
    async fn test_failed_writes_leave_state_untouched() {
        let backend = MemoryBackend::new();
        backend.put("k", vec![1]).await.unwrap();
        backend.set_fail_writes(true);

        assert!(backend.put("k", vec![2]).await.is_err());
        assert!(backend.delete("k").await.is_err());
        assert_eq!(backend.get("k").await.unwrap(), Some(vec![1]));
        assert_eq!(backend.writes(), 1);
    }

    #[tokio::test]
    async fn test_list_returns_all_entries() {
        let backend = MemoryBackend::new();
        backend.put("a", vec![1]).await.unwrap();
        backend.put("b", vec![2]).await.unwrap();

        let mut entries = backend.list().await.unwrap();
        entries.sort();
        let expected: Vec<(String, Vec<u8>)> =
            vec![("a".to_string(), vec![1]), ("b".to_string(), vec![2])];
        assert_eq!(entries, expected);
    }
}
