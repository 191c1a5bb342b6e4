//! SQLite backend.
//!
//! The filesystem mode keeps every entry in one database file inside the
//! storage directory.
//!
//! Features:
//! - WAL mode for concurrent readers
//! - Upsert writes, so a key holds only its last value

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::error::{HydrateError, Result};
use crate::store::{validate_key, Backend, Entry};

/// SQLite implementation of [`Backend`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create a SQLite store at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening SQLite store at {:?}", path);

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(HydrateError::backend)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(HydrateError::backend)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    #[cfg(test)]
    pub(crate) async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(HydrateError::backend)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(HydrateError::backend)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hydrated_state (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("SQLite schema initialized");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.pool.is_closed() {
            Err(HydrateError::BackendClosed)
        } else {
            Ok(())
        }
    }

    /// Get current Unix timestamp.
    fn now_unix() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Backend for SqliteStore {
    async fn entries(&self) -> Result<Vec<Entry>> {
        self.ensure_open()?;

        let rows: Vec<(String, Vec<u8>)> =
            sqlx::query_as("SELECT key, value FROM hydrated_state ORDER BY key")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(key, value)| Entry { key, value })
            .collect())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        validate_key(key)?;

        sqlx::query(
            r#"
            INSERT INTO hydrated_state (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(&value)
        .bind(Self::now_unix())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        validate_key(key)?;

        sqlx::query("DELETE FROM hydrated_state WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_open()?;

        sqlx::query("DELETE FROM hydrated_state")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        debug!("SQLite store closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.pool.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn stored(store: &SqliteStore, key: &str) -> Option<Vec<u8>> {
        store
            .entries()
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.key == key)
            .map(|e| e.value)
    }

    #[tokio::test]
    async fn test_sqlite_put_and_read_back() {
        let store = SqliteStore::in_memory().await.unwrap();

        store.put("key", b"value".to_vec()).await.unwrap();

        assert_eq!(stored(&store, "key").await.unwrap(), b"value");
    }

    #[tokio::test]
    async fn test_sqlite_put_overwrites() {
        let store = SqliteStore::in_memory().await.unwrap();

        store.put("key", b"v1".to_vec()).await.unwrap();
        store.put("key", b"v2".to_vec()).await.unwrap();

        assert_eq!(stored(&store, "key").await.unwrap(), b"v2");
        assert_eq!(store.entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_delete() {
        let store = SqliteStore::in_memory().await.unwrap();

        store.put("key", b"value".to_vec()).await.unwrap();
        assert!(stored(&store, "key").await.is_some());

        store.delete("key").await.unwrap();
        assert!(stored(&store, "key").await.is_none());
    }

    #[tokio::test]
    async fn test_sqlite_entries_and_clear() {
        let store = SqliteStore::in_memory().await.unwrap();

        store.put("b", b"2".to_vec()).await.unwrap();
        store.put("a", b"1".to_vec()).await.unwrap();

        let keys: Vec<String> = store
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["a", "b"]);

        store.clear().await.unwrap();
        assert!(store.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_close() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.is_open());

        store.close().await.unwrap();
        assert!(!store.is_open());
        assert!(matches!(
            store.put("key", b"v".to_vec()).await,
            Err(HydrateError::BackendClosed)
        ));
    }

    #[tokio::test]
    async fn test_sqlite_file_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.db");

        let store = SqliteStore::open(&path).await.unwrap();
        store.put("key", b"persisted".to_vec()).await.unwrap();
        store.close().await.unwrap();

        let reopened = SqliteStore::open(&path).await.unwrap();
        assert_eq!(stored(&reopened, "key").await.unwrap(), b"persisted");
    }
}
