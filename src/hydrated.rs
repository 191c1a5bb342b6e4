//! Hydrated state: a [`StateCell`] whose value survives restarts.
//!
//! [`Hydrated::new`] restores the last persisted value of the state (or
//! falls back to the given initial state) and persists the restored state
//! once. Afterwards every transition is normalized and queued for writing.
//! Writes for one holder are applied in the order the transitions happened.
//!
//! Failures are reported through the [`ErrorReporter`] of the [`Hydration`]
//! context rather than returned, except:
//! - a missing storage backend always fails construction
//! - an initial state that cannot be normalized fails construction

use parking_lot::RwLock;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::cell::{Observer, StateCell};
use crate::error::{BoxError, HydrateError, NormalizeError, Result};
use crate::normalize::{denormalize, normalize, Json, JsonMap};
use crate::report::{ErrorReporter, LogReporter};
use crate::storage::{Storage, StorageFactory};
use crate::store::validate_key;
use crate::value::{Map, Value};
use crate::watch::{Change, ChangeStream};

/// Conversion between a state type and persisted data.
pub trait Hydrate: Clone + PartialEq + Send + Sync + 'static {
    /// Rebuild state from a persisted object.
    ///
    /// `Ok(None)` keeps the initial state.
    fn from_persisted(data: &JsonMap) -> std::result::Result<Option<Self>, BoxError>;

    /// Data to persist for this state, `None` to skip the write.
    ///
    /// Persisted data is always an object, so restoring can hand it back to
    /// [`Hydrate::from_persisted`].
    fn to_persisted(&self) -> Option<Map>;

    /// Key prefix shared by every holder of this state type.
    fn storage_prefix() -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Per-holder addressing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HydrationOptions {
    /// Overrides [`Hydrate::storage_prefix`].
    pub prefix: Option<String>,
    /// Distinguishes holders of the same state type.
    pub id: String,
}

impl HydrationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// `prefix + id`.
    pub fn storage_key<S: Hydrate>(&self) -> String {
        let prefix = self.prefix.clone().unwrap_or_else(S::storage_prefix);
        format!("{}{}", prefix, self.id)
    }
}

/// Shared context handed to every hydrated holder.
///
/// Clones share the same storage slot.
#[derive(Clone)]
pub struct Hydration {
    storage: Arc<RwLock<Option<Arc<Storage>>>>,
    reporter: Arc<dyn ErrorReporter>,
}

impl Hydration {
    /// A context without storage. Holders fail until one is set.
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(None)),
            reporter: Arc::new(LogReporter),
        }
    }

    pub fn with_storage(storage: Arc<Storage>) -> Self {
        let hydration = Self::new();
        hydration.set_storage(Some(storage));
        hydration
    }

    /// A context using the factory's shared storage.
    pub async fn from_factory(factory: &StorageFactory) -> Result<Self> {
        Ok(Self::with_storage(factory.storage().await?))
    }

    pub fn with_reporter(mut self, reporter: impl ErrorReporter + 'static) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    /// Replace the storage used by holders created from now on.
    pub fn set_storage(&self, storage: Option<Arc<Storage>>) {
        *self.storage.write() = storage;
    }

    pub fn storage(&self) -> Result<Arc<Storage>> {
        self.storage
            .read()
            .clone()
            .ok_or(HydrateError::BackendNotConfigured)
    }

    pub fn reporter(&self) -> Arc<dyn ErrorReporter> {
        Arc::clone(&self.reporter)
    }
}

impl Default for Hydration {
    fn default() -> Self {
        Self::new()
    }
}

enum Request {
    Write(Json),
    Delete(oneshot::Sender<Result<()>>),
    Flush(oneshot::Sender<()>),
}

/// Observes the cell and queues writes.
struct Controller<S> {
    key: String,
    reporter: Arc<dyn ErrorReporter>,
    requests: mpsc::UnboundedSender<Request>,
    _state: PhantomData<fn(S)>,
}

impl<S: Hydrate> Controller<S> {
    /// Persist the state a holder starts with.
    fn feed(&self, state: &S) -> Result<()> {
        match persisted(state) {
            Ok(Some(json)) => {
                self.enqueue(json);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                let err = HydrateError::from(e);
                self.reporter.report(&err, &self.context("initial feed"));
                Err(err)
            }
        }
    }

    fn enqueue(&self, json: Json) {
        if self.requests.send(Request::Write(json)).is_err() {
            self.reporter
                .report(&HydrateError::NoRuntime, &self.context("write"));
        }
    }

    fn context(&self, operation: &str) -> String {
        format!("{} {}", operation, self.key)
    }
}

impl<S: Hydrate> Observer<S> for Controller<S> {
    fn on_change(&self, change: &Change<S>) {
        match persisted(&change.next) {
            Ok(Some(json)) => self.enqueue(json),
            Ok(None) => {}
            Err(e) => self
                .reporter
                .report(&HydrateError::from(e), &self.context("state change")),
        }
    }
}

fn persisted<S: Hydrate>(state: &S) -> std::result::Result<Option<Json>, NormalizeError> {
    state
        .to_persisted()
        .map(|map| normalize(&Value::Map(map)))
        .transpose()
}

fn restore<S: Hydrate>(storage: &Storage, key: &str, initial: S, reporter: &dyn ErrorReporter) -> S {
    let Some(stored) = storage.read(key) else {
        return initial;
    };

    match denormalize(&stored, S::from_persisted) {
        Ok(Some(state)) => {
            debug!("Restored {:?}", key);
            state
        }
        Ok(None) => initial,
        Err(e) => {
            let err = HydrateError::Reconstruction(e.to_string());
            reporter.report(&err, &format!("restore {}", key));
            initial
        }
    }
}

async fn run_writer(
    key: String,
    storage: Arc<Storage>,
    reporter: Arc<dyn ErrorReporter>,
    mut requests: mpsc::UnboundedReceiver<Request>,
) {
    while let Some(request) = requests.recv().await {
        match request {
            Request::Write(json) => {
                if let Err(e) = storage.write(&key, &json).await {
                    reporter.report(&e, &format!("write {}", key));
                }
            }
            Request::Delete(done) => {
                let _ = done.send(storage.delete(&key).await);
            }
            Request::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Writer for {:?} stopped", key);
}

/// A state holder persisted under one storage key.
///
/// Writes run on a task spawned on the runtime the holder was created in.
/// Dropping the holder does not cancel writes already queued; they still
/// reach storage while that runtime keeps running. Writes still queued when
/// the runtime shuts down are lost, so call [`Hydrated::flush`] before
/// shutting down.
pub struct Hydrated<S: Hydrate> {
    cell: Arc<StateCell<S>>,
    controller: Arc<Controller<S>>,
    storage: Arc<Storage>,
}

impl<S: Hydrate> Hydrated<S> {
    /// Hydrate with the default key for `S`.
    pub fn new(hydration: &Hydration, initial: S) -> Result<Self> {
        Self::with_options(hydration, initial, HydrationOptions::default())
    }

    /// Hydrate with an explicit prefix or instance id.
    ///
    /// Must be called within a tokio runtime; writes run on it.
    pub fn with_options(hydration: &Hydration, initial: S, options: HydrationOptions) -> Result<Self> {
        let storage = hydration.storage()?;
        let runtime = Handle::try_current().map_err(|_| HydrateError::NoRuntime)?;
        let key = options.storage_key::<S>();
        validate_key(&key)?;
        let reporter = hydration.reporter();

        let state = restore(&storage, &key, initial, reporter.as_ref());

        let (requests, receiver) = mpsc::unbounded_channel();
        runtime.spawn(run_writer(
            key.clone(),
            Arc::clone(&storage),
            Arc::clone(&reporter),
            receiver,
        ));

        let controller = Arc::new(Controller {
            key,
            reporter,
            requests,
            _state: PhantomData,
        });
        controller.feed(&state)?;

        let cell = Arc::new(StateCell::new(state));
        cell.observe(controller.clone());

        Ok(Self {
            cell,
            controller,
            storage,
        })
    }

    /// Current state.
    pub fn state(&self) -> S {
        self.cell.state()
    }

    /// Move to `next` and queue its write. Returns false if unchanged.
    pub fn emit(&self, next: S) -> bool {
        self.cell.emit(next)
    }

    /// The underlying cell.
    pub fn cell(&self) -> &Arc<StateCell<S>> {
        &self.cell
    }

    pub fn subscribe(&self) -> ChangeStream<S> {
        self.cell.subscribe()
    }

    pub fn storage_key(&self) -> &str {
        &self.controller.key
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Wait until every write queued so far was applied or reported.
    pub async fn flush(&self) {
        let (done, finished) = oneshot::channel();
        if self.controller.requests.send(Request::Flush(done)).is_ok() {
            let _ = finished.await;
        }
    }

    /// Delete this holder's entry after the writes queued before it.
    ///
    /// The in-memory state is left as is.
    pub async fn clear(&self) -> Result<()> {
        let (done, finished) = oneshot::channel();
        self.controller
            .requests
            .send(Request::Delete(done))
            .map_err(|_| HydrateError::NoRuntime)?;
        finished.await.map_err(|_| HydrateError::NoRuntime)?
    }
}
