//! Observable state container.
//!
//! A [`StateCell`] holds one state value. Transitions are processed one at a
//! time: observers see each [`Change`] synchronously before the new state is
//! stored, then the change is published to stream subscribers.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::watch::{Change, ChangeSender, ChangeStream};

/// Synchronous hook run for every transition, before it takes effect.
pub trait Observer<S>: Send + Sync {
    fn on_change(&self, change: &Change<S>);
}

/// Holds the current state and notifies about transitions.
pub struct StateCell<S> {
    state: RwLock<S>,
    emitting: Mutex<()>,
    observers: RwLock<Vec<Arc<dyn Observer<S>>>>,
    changes: ChangeSender<S>,
}

impl<S> StateCell<S>
where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(initial: S) -> Self {
        Self {
            state: RwLock::new(initial),
            emitting: Mutex::new(()),
            observers: RwLock::new(Vec::new()),
            changes: ChangeSender::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> S {
        self.state.read().clone()
    }

    /// Register an observer for all later transitions.
    pub fn observe(&self, observer: Arc<dyn Observer<S>>) {
        self.observers.write().push(observer);
    }

    /// Subscribe to transitions published from now on.
    pub fn subscribe(&self) -> ChangeStream<S> {
        self.changes.subscribe()
    }

    /// Move to `next`. Returns false if it equals the current state.
    pub fn emit(&self, next: S) -> bool {
        let _emitting = self.emitting.lock();

        let current = self.state();
        if current == next {
            return false;
        }

        let change = Change::new(current, next);
        let observers = self.observers.read().clone();
        for observer in &observers {
            observer.on_change(&change);
        }

        *self.state.write() = change.next.clone();
        self.changes.send(change);
        true
    }
}
