//! In-memory value model handed to the traversal engine.
//!
//! [`Value`] is a closed set of shapes. Containers ([`List`], [`Map`]) are
//! shared handles, so the same container can appear in several places of a
//! graph, including inside itself. Anything that is not plain data is an
//! [`Opaque`] object exposing a [`ToPlain`] conversion hook.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use crate::error::BoxError;

/// Conversion hook for objects that are not plain data.
///
/// The returned value is normalized again, so it may contain containers
/// but must not be another opaque object.
pub trait ToPlain: Send + Sync {
    fn to_plain(&self) -> std::result::Result<Value, BoxError>;
}

/// A value that can be normalized into plain data.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(List),
    Map(Map),
    Opaque(Opaque),
}

impl Value {
    /// Build a list value from its items.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::List(List::from_iter(items))
    }

    /// Build a map value from its entries.
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        Value::Map(Map::from_iter(entries))
    }

    /// Wrap an object exposing a conversion hook.
    pub fn opaque(object: impl ToPlain + 'static) -> Self {
        Value::Opaque(Opaque::new(object))
    }

    /// Short name of the shape, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Opaque(_) => "opaque",
        }
    }

    /// Identity of a shared handle, `None` for scalars.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::List(list) => Some(list.id()),
            Value::Map(map) => Some(map.id()),
            Value::Opaque(opaque) => Some(opaque.id()),
            _ => None,
        }
    }

    /// Returns true for a string value.
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }
}

// Containers print shallowly so cyclic graphs stay printable.
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::List(list) => list.fmt(f),
            Value::Map(map) => map.fmt(f),
            Value::Opaque(opaque) => opaque.fmt(f),
        }
    }
}

/// Shared, mutable ordered sequence.
#[derive(Clone, Default)]
pub struct List(Arc<RwLock<Vec<Value>>>);

impl List {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item.
    pub fn push(&self, item: impl Into<Value>) {
        self.0.write().push(item.into());
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Snapshot of the current items. Containers in it are shared handles.
    pub fn items(&self) -> Vec<Value> {
        self.0.read().clone()
    }

    /// Identity of the underlying allocation.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// Returns true if both handles point at the same list.
    pub fn ptr_eq(&self, other: &List) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<V: Into<Value>> FromIterator<V> for List {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        List(Arc::new(RwLock::new(iter.into_iter().map(Into::into).collect())))
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "List(#{:x}, len={})", self.id(), self.len())
    }
}

/// Shared, mutable mapping with insertion order.
///
/// Keys may be any value; only string keys survive normalization.
#[derive(Clone, Default)]
pub struct Map(Arc<RwLock<Vec<(Value, Value)>>>);

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, replacing the value of an equal scalar key.
    pub fn insert(&self, key: impl Into<Value>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let mut entries = self.0.write();
        match entries.iter_mut().find(|(k, _)| same_key(k, &key)) {
            Some(slot) => slot.1 = value,
            None => entries.push((key, value)),
        }
    }

    /// Look up the value stored under a string key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0
            .read()
            .iter()
            .find(|(k, _)| matches!(k, Value::String(s) if s == key))
            .map(|(_, v)| v.clone())
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Snapshot of the current entries.
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.0.read().clone()
    }

    /// Identity of the underlying allocation.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    /// Returns true if both handles point at the same map.
    pub fn ptr_eq(&self, other: &Map) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

fn same_key(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        _ => match (a.identity(), b.identity()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

impl<K: Into<Value>, V: Into<Value>> FromIterator<(K, V)> for Map {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map = Map::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Map(#{:x}, len={})", self.id(), self.len())
    }
}

/// Shared handle to an object that converts itself through [`ToPlain`].
#[derive(Clone)]
pub struct Opaque(Arc<dyn ToPlain>);

impl Opaque {
    pub fn new(object: impl ToPlain + 'static) -> Self {
        Opaque(Arc::new(object))
    }

    /// Invoke the conversion hook.
    pub fn to_plain(&self) -> std::result::Result<Value, BoxError> {
        self.0.to_plain()
    }

    /// Identity of the underlying allocation.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque(#{:x})", self.id())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i.into())
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i.into())
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}

impl From<List> for Value {
    fn from(list: List) -> Self {
        Value::List(list)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Map(map)
    }
}

impl From<Opaque> for Value {
    fn from(opaque: Opaque) -> Self {
        Value::Opaque(opaque)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::list(items.into_iter().map(Value::from)),
            Json::Object(entries) => {
                Value::map(entries.into_iter().map(|(k, v)| (k, Value::from(v))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_insert_replaces_string_key() {
        let map = Map::new();
        map.insert("a", 1);
        map.insert("a", 2);
        map.insert(1, "int key");

        assert_eq!(map.len(), 2);
        assert!(matches!(map.get("a"), Some(Value::Int(2))));
    }

    #[test]
    fn test_clone_shares_identity() {
        let list = List::from_iter([1, 2]);
        let alias = list.clone();
        alias.push(3);

        assert!(list.ptr_eq(&alias));
        assert_eq!(list.len(), 3);
        assert_eq!(Value::List(list).identity(), Value::List(alias).identity());
    }

    #[test]
    fn test_debug_is_shallow_for_cycles() {
        let map = Map::new();
        map.insert("self", map.clone());

        let printed = format!("{:?}", Value::Map(map));
        assert!(printed.starts_with("Map(#"));
        assert!(printed.contains("len=1"));
    }

    #[test]
    fn test_scalars_have_no_identity() {
        assert!(Value::Null.identity().is_none());
        assert!(Value::from("s").identity().is_none());
        assert!(Value::from(1.5).identity().is_none());
    }

    #[test]
    fn test_from_json() {
        let value = Value::from(serde_json::json!({"a": [1, 2.5, "x"], "b": null}));
        let Value::Map(map) = value else {
            panic!("expected map");
        };
        let Some(Value::List(list)) = map.get("a") else {
            panic!("expected list under a");
        };
        let items = list.items();
        assert!(matches!(items[0], Value::Int(1)));
        assert!(matches!(items[1], Value::Float(x) if x == 2.5));
        assert!(matches!(&items[2], Value::String(s) if s == "x"));
        assert!(matches!(map.get("b"), Some(Value::Null)));
    }
}
