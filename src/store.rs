//! Backend trait - the key-value store the persistence adapter writes to.
//!
//! Values are opaque bytes; the adapter decides their encoding. Backends do
//! not serialize their own mutations: [`crate::storage::Storage`] holds the
//! one lock every write, delete, clear and close goes through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{HydrateError, Result};

/// Maximum key length in bytes.
pub const MAX_KEY_LENGTH: usize = 1024;

/// A stored key and its raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The key.
    pub key: String,
    /// The value (opaque bytes).
    pub value: Vec<u8>,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Validate that a key is well-formed.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(HydrateError::InvalidKey("key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(HydrateError::InvalidKey(format!(
            "key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

/// A key-value store backend.
///
/// Implemented by [`crate::memory::MemoryStore`] and
/// [`crate::sqlite::SqliteStore`].
#[async_trait]
pub trait Backend: Send + Sync {
    /// Every stored entry, in key order.
    async fn entries(&self) -> Result<Vec<Entry>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Delete a key.
    ///
    /// Returns `Ok(())` if the key was deleted or didn't exist.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every entry.
    async fn clear(&self) -> Result<()>;

    /// Release the backend. Every later operation fails.
    async fn close(&self) -> Result<()>;

    /// Returns false once the backend was closed.
    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key_valid() {
        assert!(validate_key("CounterState").is_ok());
        assert!(validate_key("CounterStatesecond").is_ok());
        assert!(validate_key("/nodes/n1").is_ok());
    }

    #[test]
    fn test_validate_key_empty() {
        let err = validate_key("").unwrap_err();
        assert!(matches!(err, HydrateError::InvalidKey(_)));
    }

    #[test]
    fn test_validate_key_too_long() {
        let key = "a".repeat(MAX_KEY_LENGTH + 1);
        let err = validate_key(&key).unwrap_err();
        assert!(matches!(err, HydrateError::InvalidKey(_)));
    }

    #[test]
    fn test_entry_creation() {
        let entry = Entry::new("key", b"value".to_vec());
        assert_eq!(entry.key, "key");
        assert_eq!(entry.value, b"value");
    }
}
