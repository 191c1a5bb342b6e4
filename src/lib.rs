//! # univrs-hydrate
//!
//! Hydrated state for the Univrs ecosystem: application state that is
//! restored from a key-value store on startup and written back on every
//! change.
//!
//! - **Normalization**: any [`Value`] graph is converted into plain JSON
//!   data, with cycle detection and a conversion hook for opaque objects
//! - **Serialized persistence**: every write, delete, clear and close goes
//!   through one FIFO lock on the shared [`Storage`] handle
//! - **Hydration**: [`Hydrated`] restores its state once and persists each
//!   transition in order, reporting failures instead of failing the caller
//! - **Legacy import**: a `.feed_bloc.json` dump in the storage directory is
//!   imported once and removed
//!
//! ## Backends
//!
//! - [`SqliteStore`]: a single SQLite file in the storage directory
//! - [`MemoryStore`]: in-process storage, selected by the memory sentinel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use univrs_hydrate::{
//!     BoxError, Hydrate, Hydrated, Hydration, JsonMap, Map, StorageConfig, StorageFactory,
//! };
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Counter {
//!     value: i64,
//! }
//!
//! impl Hydrate for Counter {
//!     fn from_persisted(data: &JsonMap) -> Result<Option<Self>, BoxError> {
//!         Ok(data
//!             .get("value")
//!             .and_then(|v| v.as_i64())
//!             .map(|value| Counter { value }))
//!     }
//!
//!     fn to_persisted(&self) -> Option<Map> {
//!         Some(Map::from_iter([("value", self.value)]))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> univrs_hydrate::Result<()> {
//!     let factory = StorageFactory::new(StorageConfig::at("/var/lib/my-app"));
//!     let hydration = Hydration::from_factory(&factory).await?;
//!
//!     let counter = Hydrated::new(&hydration, Counter { value: 0 })?;
//!     counter.emit(Counter { value: counter.state().value + 1 });
//!     counter.flush().await;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Normalization
//!
//! ```rust
//! use univrs_hydrate::{normalize, Map, Value};
//!
//! let shared = Value::list([1, 2]);
//! let value = Value::map([("a", shared.clone()), ("b", shared)]);
//! assert_eq!(
//!     normalize(&value).unwrap(),
//!     serde_json::json!({"a": [1, 2], "b": [1, 2]})
//! );
//!
//! let cyclic = Map::new();
//! cyclic.insert("me", cyclic.clone());
//! assert!(normalize(&Value::Map(cyclic)).unwrap_err().is_cyclic());
//! ```

pub mod cell;
pub mod config;
pub mod error;
pub mod hydrated;
pub mod memory;
pub mod migrate;
pub mod normalize;
pub mod report;
pub mod sqlite;
pub mod storage;
pub mod store;
pub mod value;
pub mod watch;

// Re-export main types
pub use cell::{Observer, StateCell};
pub use config::{StorageConfig, StorageDirectory};
pub use error::{BoxError, HydrateError, NormalizeError, Result};
pub use hydrated::{Hydrate, Hydrated, Hydration, HydrationOptions};
pub use memory::MemoryStore;
pub use migrate::{import_legacy, LEGACY_FILE_NAME};
pub use normalize::{denormalize, normalize, normalize_outcome, Json, JsonMap, TraversalOutcome};
pub use report::{ErrorReporter, LogReporter};
pub use sqlite::SqliteStore;
pub use storage::{Cipher, Storage, StorageFactory};
pub use store::{Backend, Entry, MAX_KEY_LENGTH};
pub use value::{List, Map, Opaque, ToPlain, Value};
pub use watch::{Change, ChangeStream};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{BoxError, HydrateError, Result};
    pub use crate::hydrated::{Hydrate, Hydrated, Hydration, HydrationOptions};
    pub use crate::normalize::{normalize, Json, JsonMap};
    pub use crate::storage::{Storage, StorageFactory};
    pub use crate::value::{Map, ToPlain, Value};
}
