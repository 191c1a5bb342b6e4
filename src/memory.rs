//! In-memory backend.
//!
//! Selected by [`crate::config::StorageDirectory::Memory`]: no filesystem
//! setup and no legacy migration. Data is lost on process exit.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{HydrateError, Result};
use crate::store::{validate_key, Backend, Entry};

/// In-memory implementation of [`Backend`].
///
/// Uses a BTreeMap for ordered key iteration and RwLock for concurrency.
/// Clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    open: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Get the number of entries in the store.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(HydrateError::BackendClosed)
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryStore {
    async fn entries(&self) -> Result<Vec<Entry>> {
        self.ensure_open()?;
        Ok(self
            .data
            .read()
            .iter()
            .map(|(k, v)| Entry::new(k.clone(), v.clone()))
            .collect())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        validate_key(key)?;
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        validate_key(key)?;
        self.data.write().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        self.data.write().clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn stored(store: &MemoryStore, key: &str) -> Option<Vec<u8>> {
        store
            .entries()
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.key == key)
            .map(|e| e.value)
    }

    #[tokio::test]
    async fn test_put_and_read_back() {
        let store = MemoryStore::new();

        store.put("key", b"value".to_vec()).await.unwrap();

        assert_eq!(stored(&store, "key").await.unwrap(), b"value");
        assert_eq!(stored(&store, "nonexistent").await, None);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryStore::new();

        store.put("key", b"v1".to_vec()).await.unwrap();
        store.put("key", b"v2".to_vec()).await.unwrap();

        assert_eq!(stored(&store, "key").await.unwrap(), b"v2");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryStore::new();

        store.put("key", b"value".to_vec()).await.unwrap();
        assert!(stored(&store, "key").await.is_some());

        store.delete("key").await.unwrap();
        assert!(stored(&store, "key").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_nonexistent() {
        let store = MemoryStore::new();
        // Should not error
        store.delete("nonexistent").await.unwrap();
    }

    #[tokio::test]
    async fn test_entries_in_key_order() {
        let store = MemoryStore::new();

        store.put("b", b"2".to_vec()).await.unwrap();
        store.put("a", b"1".to_vec()).await.unwrap();

        let entries = store.entries().await.unwrap();
        assert_eq!(
            entries,
            vec![Entry::new("a", b"1".to_vec()), Entry::new("b", b"2".to_vec())]
        );
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryStore::new();

        store.put("a", b"1".to_vec()).await.unwrap();
        store.put("b", b"2".to_vec()).await.unwrap();
        store.clear().await.unwrap();

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let store = MemoryStore::new();
        store.close().await.unwrap();

        assert!(!store.is_open());
        let result = store.put("key", b"v".to_vec()).await;
        assert!(matches!(result, Err(HydrateError::BackendClosed)));
        assert!(store.entries().await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_key() {
        let store = MemoryStore::new();

        let result = store.put("", b"v".to_vec()).await;
        assert!(matches!(result, Err(HydrateError::InvalidKey(_))));
    }
}
