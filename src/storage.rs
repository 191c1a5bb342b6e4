//! Persistence adapter over a [`Backend`].
//!
//! [`Storage`] keeps a decoded copy of every entry so [`Storage::read`] is
//! synchronous. All mutations (write, delete, clear, close) across all keys
//! go through one FIFO-fair lock, so the backend sees them strictly one at a
//! time and in the order they were requested.
//!
//! [`StorageFactory`] owns the one-time initialization: directory setup,
//! backend opening and the legacy import happen under the factory's lock,
//! and every caller receives the same handle. Clearing only marks the handle
//! for re-initialization; it keeps its backend and lock, so holders created
//! before the clear keep writing where later readers look.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{StorageConfig, StorageDirectory};
use crate::error::{HydrateError, Result};
use crate::memory::MemoryStore;
use crate::migrate;
use crate::normalize::Json;
use crate::sqlite::SqliteStore;
use crate::store::{validate_key, Backend};

/// Encryption applied to stored bytes.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, encrypted: &[u8]) -> Result<Vec<u8>>;
}

/// Handle to an opened backend.
pub struct Storage {
    backend: Box<dyn Backend>,
    cipher: Option<Arc<dyn Cipher>>,
    cache: RwLock<HashMap<String, Json>>,
    lock: Mutex<()>,
    invalidated: AtomicBool,
    closed: AtomicBool,
}

impl Storage {
    /// Wrap `backend`, loading its current entries.
    ///
    /// Entries that do not decode are skipped.
    pub async fn open(backend: Box<dyn Backend>, cipher: Option<Arc<dyn Cipher>>) -> Result<Self> {
        let storage = Self {
            backend,
            cipher,
            cache: RwLock::new(HashMap::new()),
            lock: Mutex::new(()),
            invalidated: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };

        let cache = storage.load().await?;
        *storage.cache.write() = cache;

        Ok(storage)
    }

    /// Reload every entry from the backend and mark the handle valid again.
    ///
    /// Runs under the mutation lock, after anything already queued on it.
    pub async fn reinitialize(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.ensure_open()?;
        let cache = self.load().await.map_err(operation_failed)?;
        *self.cache.write() = cache;
        self.invalidated.store(false, Ordering::SeqCst);

        info!("Reinitialized storage");
        Ok(())
    }

    async fn load(&self) -> Result<HashMap<String, Json>> {
        let entries = self.backend.entries().await?;
        let mut cache = HashMap::with_capacity(entries.len());
        for entry in entries {
            match self.decode(&entry.value) {
                Ok(value) => {
                    cache.insert(entry.key, value);
                }
                Err(e) => warn!("Skipping undecodable entry {:?}: {}", entry.key, e),
            }
        }
        debug!("Loaded {} entries", cache.len());
        Ok(cache)
    }

    /// Last value written under `key`.
    ///
    /// Never blocks on in-flight mutations. Returns `None` once closed.
    pub fn read(&self, key: &str) -> Option<Json> {
        if !self.is_open() {
            return None;
        }
        self.cache.read().get(key).cloned()
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.cache.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Store `value` under `key`.
    pub async fn write(&self, key: &str, value: &Json) -> Result<()> {
        validate_key(key)?;
        let bytes = self.encode(value)?;

        let _guard = self.lock.lock().await;
        self.ensure_open()?;
        self.backend
            .put(key, bytes)
            .await
            .map_err(operation_failed)?;
        self.cache.write().insert(key.to_string(), value.clone());

        debug!("Wrote {:?}", key);
        Ok(())
    }

    /// Remove the entry under `key`.
    pub async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;

        let _guard = self.lock.lock().await;
        self.ensure_open()?;
        self.backend.delete(key).await.map_err(operation_failed)?;
        self.cache.write().remove(key);

        debug!("Deleted {:?}", key);
        Ok(())
    }

    /// Remove every entry and invalidate this handle.
    ///
    /// The handle stays usable. A [`StorageFactory`] re-initializes it on its
    /// next request.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.invalidated.store(true, Ordering::SeqCst);
        self.ensure_open()?;
        self.backend.clear().await.map_err(operation_failed)?;
        self.cache.write().clear();

        info!("Cleared storage");
        Ok(())
    }

    /// Close the backend. Later mutations fail and reads return `None`.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.backend.close().await.map_err(operation_failed)?;

        info!("Closed storage");
        Ok(())
    }

    /// Returns false once closed.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.backend.is_open()
    }

    /// Returns false once cleared (until re-initialized) or closed.
    pub fn is_valid(&self) -> bool {
        !self.invalidated.load(Ordering::SeqCst) && self.is_open()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(HydrateError::BackendClosed)
        }
    }

    fn encode(&self, value: &Json) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(value)?;
        match &self.cipher {
            Some(cipher) => cipher.encrypt(&bytes),
            None => Ok(bytes),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Json> {
        match &self.cipher {
            Some(cipher) => Ok(serde_json::from_slice(&cipher.decrypt(bytes)?)?),
            None => Ok(serde_json::from_slice(bytes)?),
        }
    }
}

fn operation_failed(err: HydrateError) -> HydrateError {
    match err {
        HydrateError::BackendClosed
        | HydrateError::InvalidKey(_)
        | HydrateError::BackendOperationFailed(_) => err,
        other => HydrateError::backend(other),
    }
}

/// Builds the shared [`Storage`] handle on first request.
pub struct StorageFactory {
    config: StorageConfig,
    cipher: Option<Arc<dyn Cipher>>,
    instance: Mutex<Option<Arc<Storage>>>,
}

impl StorageFactory {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            cipher: None,
            instance: Mutex::new(None),
        }
    }

    /// Encrypt stored bytes with `cipher`.
    pub fn with_cipher(mut self, cipher: impl Cipher + 'static) -> Self {
        self.cipher = Some(Arc::new(cipher));
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Factory for the storage directory named by the environment.
    ///
    /// See [`StorageConfig::from_env`].
    pub fn from_env() -> Self {
        Self::new(StorageConfig::from_env())
    }

    /// The shared handle, initializing it on first use.
    ///
    /// A cleared handle is re-initialized in place and returned again; only
    /// a closed one is replaced. Concurrent callers wait for the
    /// initialization and share its result.
    pub async fn storage(&self) -> Result<Arc<Storage>> {
        let mut instance = self.instance.lock().await;
        match instance.as_ref() {
            Some(storage) if storage.is_valid() => return Ok(Arc::clone(storage)),
            Some(storage) if storage.is_open() => {
                storage.reinitialize().await?;
                self.import_legacy(storage).await;
                return Ok(Arc::clone(storage));
            }
            _ => {}
        }

        let storage = Arc::new(self.build().await?);
        self.import_legacy(&storage).await;
        *instance = Some(Arc::clone(&storage));
        Ok(storage)
    }

    async fn build(&self) -> Result<Storage> {
        self.config.validate()?;

        match &self.config.directory {
            StorageDirectory::Memory => {
                info!("Opening in-memory storage");
                Storage::open(Box::new(MemoryStore::new()), self.cipher.clone()).await
            }
            StorageDirectory::Path(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                let backend = SqliteStore::open(dir.join(&self.config.database_file)).await?;
                Storage::open(Box::new(backend), self.cipher.clone()).await
            }
        }
    }

    async fn import_legacy(&self, storage: &Storage) {
        if !self.config.migrate_legacy {
            return;
        }
        if let StorageDirectory::Path(dir) = &self.config.directory {
            migrate::import_legacy(dir, storage).await;
        }
    }
}

impl Default for StorageFactory {
    fn default() -> Self {
        Self::from_env()
    }
}
