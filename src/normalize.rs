//! Traversal engine: converts a [`Value`] graph into plain JSON data.
//!
//! The output only ever contains null, booleans, finite numbers, strings,
//! arrays and string-keyed objects. Cycles are detected by tracking the
//! identities of the containers on the current traversal path; the same
//! container may still appear any number of times outside that path.

use serde_json::Number;
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};

use crate::error::{BoxError, NormalizeError};
use crate::value::{Opaque, Value};

/// Normalized plain data.
pub type Json = serde_json::Value;

/// String-keyed object of normalized data.
pub type JsonMap = serde_json::Map<String, Json>;

/// Result of normalizing a single value.
///
/// `Atomic` values needed no container allocation (scalars and empty
/// lists); `Complex` values did.
#[derive(Debug, Clone, PartialEq)]
pub enum TraversalOutcome {
    Atomic(Json),
    Complex(Json),
}

impl TraversalOutcome {
    pub fn is_atomic(&self) -> bool {
        matches!(self, TraversalOutcome::Atomic(_))
    }

    pub fn as_json(&self) -> &Json {
        match self {
            TraversalOutcome::Atomic(json) | TraversalOutcome::Complex(json) => json,
        }
    }

    pub fn into_json(self) -> Json {
        match self {
            TraversalOutcome::Atomic(json) | TraversalOutcome::Complex(json) => json,
        }
    }
}

/// Identities of the containers on the active traversal path.
///
/// Entries are pushed through [`SeenStack::enter`] and popped when the
/// returned [`Frame`] is dropped, so every exit path unwinds the stack.
#[derive(Debug, Default)]
pub struct SeenStack {
    order: Vec<usize>,
    members: HashSet<usize>,
}

impl SeenStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns true if the container with this identity is being traversed.
    pub fn contains(&self, id: usize) -> bool {
        self.members.contains(&id)
    }

    /// Push `value` for the lifetime of the returned frame.
    ///
    /// Fails with [`NormalizeError::CyclicReference`] if it is already on
    /// the stack. Scalars have no identity and always enter.
    pub fn enter(&mut self, value: &Value) -> Result<Frame<'_>, NormalizeError> {
        let id = value.identity();
        if let Some(id) = id {
            if !self.members.insert(id) {
                return Err(NormalizeError::CyclicReference {
                    value: value.clone(),
                });
            }
            self.order.push(id);
        }
        Ok(Frame { stack: self, id })
    }

    fn pop(&mut self, id: usize) {
        let top = self.order.pop();
        assert_eq!(top, Some(id), "seen stack popped out of order");
        self.members.remove(&id);
    }
}

/// Scope guard for one entry of a [`SeenStack`].
pub struct Frame<'a> {
    stack: &'a mut SeenStack,
    id: Option<usize>,
}

impl Deref for Frame<'_> {
    type Target = SeenStack;

    fn deref(&self) -> &SeenStack {
        &*self.stack
    }
}

impl DerefMut for Frame<'_> {
    fn deref_mut(&mut self) -> &mut SeenStack {
        &mut *self.stack
    }
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.stack.pop(id);
        }
    }
}

/// Normalize a value into plain data.
pub fn normalize(value: &Value) -> Result<Json, NormalizeError> {
    normalize_outcome(value).map(TraversalOutcome::into_json)
}

/// Normalize a value, keeping the atomic/complex tag of the result.
///
/// Cycles reached outside any conversion hook surface as
/// [`NormalizeError::Unsupported`] caused by the cycle.
pub fn normalize_outcome(value: &Value) -> Result<TraversalOutcome, NormalizeError> {
    let mut seen = SeenStack::new();
    let result = traverse(value, &mut seen);
    debug_assert!(seen.is_empty());

    result.map_err(|err| match err {
        NormalizeError::CyclicReference { .. } => {
            NormalizeError::unsupported_with(value.clone(), err)
        }
        other => other,
    })
}

/// Reconstruct state from persisted data.
///
/// The engine has no universal reverse mapping: `reconstruct` receives the
/// stored object and decides. Anything other than an object is rejected.
pub fn denormalize<T, F>(value: &Json, reconstruct: F) -> Result<Option<T>, BoxError>
where
    F: FnOnce(&JsonMap) -> Result<Option<T>, BoxError>,
{
    match value {
        Json::Object(map) => reconstruct(map),
        other => Err(format!("expected a persisted object, found {}", json_kind(other)).into()),
    }
}

fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn traverse(value: &Value, seen: &mut SeenStack) -> Result<TraversalOutcome, NormalizeError> {
    match traverse_plain(value, seen)? {
        Some(outcome) => Ok(outcome),
        None => traverse_custom(value, seen),
    }
}

/// Scalars and containers; `None` for anything needing a hook.
fn traverse_plain(
    value: &Value,
    seen: &mut SeenStack,
) -> Result<Option<TraversalOutcome>, NormalizeError> {
    if let Some(json) = atomic(value) {
        return Ok(Some(TraversalOutcome::Atomic(json)));
    }

    match value {
        Value::List(list) => {
            let mut frame = seen.enter(value)?;
            // Hooks may touch the container, so no lock is held while recursing.
            let items = list.items();
            if items.is_empty() {
                return Ok(Some(TraversalOutcome::Atomic(Json::Array(Vec::new()))));
            }
            let mut out = Vec::with_capacity(items.len());
            for item in &items {
                out.push(traverse(item, &mut frame)?.into_json());
            }
            Ok(Some(TraversalOutcome::Complex(Json::Array(out))))
        }
        Value::Map(map) => {
            let mut frame = seen.enter(value)?;
            let entries = map.entries();
            let mut out = JsonMap::new();
            for (key, item) in &entries {
                // Non-string keys are dropped.
                let Value::String(key) = key else { continue };
                out.insert(key.clone(), traverse(item, &mut frame)?.into_json());
            }
            Ok(Some(TraversalOutcome::Complex(Json::Object(out))))
        }
        _ => Ok(None),
    }
}

fn atomic(value: &Value) -> Option<Json> {
    match value {
        Value::Null => Some(Json::Null),
        Value::Bool(b) => Some(Json::Bool(*b)),
        Value::Int(i) => Some(Json::from(*i)),
        // NaN and infinities have no Number representation.
        Value::Float(x) => Number::from_f64(*x).map(Json::Number),
        Value::String(s) => Some(Json::String(s.clone())),
        _ => None,
    }
}

fn traverse_custom(
    value: &Value,
    seen: &mut SeenStack,
) -> Result<TraversalOutcome, NormalizeError> {
    let Value::Opaque(object) = value else {
        return Err(NormalizeError::unsupported(value.clone()));
    };

    match convert(object, value, seen) {
        Ok(Some(outcome)) => Ok(outcome),
        Ok(None) => Err(NormalizeError::unsupported(value.clone())),
        Err(err @ NormalizeError::Unsupported { .. }) => Err(err),
        Err(err) => Err(NormalizeError::unsupported_with(value.clone(), err)),
    }
}

fn convert(
    object: &Opaque,
    value: &Value,
    seen: &mut SeenStack,
) -> Result<Option<TraversalOutcome>, NormalizeError> {
    let mut frame = seen.enter(value)?;
    let plain = object
        .to_plain()
        .map_err(|cause| match cause.downcast::<NormalizeError>() {
            Ok(inner) => *inner,
            Err(cause) => NormalizeError::Unsupported {
                value: value.clone(),
                cause: Some(cause),
            },
        })?;
    traverse_plain(&plain, &mut frame)
}
