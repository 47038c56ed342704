//! The recursive document value type: null, bool, signed 64-bit int,
//! float, string, array, or an ordered string-keyed object.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// An ordered mapping from string keys to values. Keys are unique within a
/// mapping; insertion order is preserved so that `$project`/`$addFields`
/// output order matches what a client expects to see.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Object {
    entries: Vec<(String, Value)>,
}

impl Object {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Inserts or replaces a key, preserving its original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().map(|(k, _)| k)
    }
}

impl FromIterator<(String, Value)> for Object {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut obj = Object::new();
        for (k, v) in iter {
            obj.insert(k, v);
        }
        obj
    }
}

/// A document value: one of eight kinds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(Object),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a.as_slice()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Looks up a dot-separated field path (e.g. "a.b.c") through nested
    /// objects. Returns `None` if any segment is absent or not an object.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut cur = self;
        for segment in path.split('.') {
            cur = cur.as_object()?.get(segment)?;
        }
        Some(cur)
    }

    /// Sets a dot-separated field path, creating intermediate objects as
    /// needed. Fails silently (becomes a no-op) if an intermediate segment
    /// already holds a non-object value -- callers validate beforehand.
    pub fn set_path(&mut self, path: &str, value: Value) {
        let mut segments = path.split('.').peekable();
        let mut cur = self;
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                if let Some(obj) = cur.as_object_mut() {
                    obj.insert(segment, value);
                }
                return;
            }
            if cur.as_object().is_none() {
                *cur = Value::Object(Object::new());
            }
            let obj = cur.as_object_mut().unwrap();
            if !obj.contains_key(segment) {
                obj.insert(segment, Value::Object(Object::new()));
            }
            cur = obj.get_mut(segment).unwrap();
        }
    }

    pub fn remove_path(&mut self, path: &str) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = match segments.pop() {
            Some(l) => l,
            None => return,
        };
        let mut cur = self;
        for segment in segments {
            match cur.as_object_mut().and_then(|o| o.get_mut(segment)) {
                Some(next) => cur = next,
                None => return,
            }
        }
        if let Some(obj) = cur.as_object_mut() {
            obj.remove(last);
        }
    }

    /// Type rank used for cross-type ordering, matching the ordering
    /// "type-aware numeric compare": numbers compare by value across
    /// Int/Float, everything else compares only within its own kind, and
    /// kinds order Null < Bool < Number < String < Array < Object.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(_) => write!(f, "[array]"),
            Value::Object(_) => write!(f, "{{object}}"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => {
                // Order-independent equality: same keys, same values.
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Array(a), Value::Array(b)) => a.partial_cmp(b),
            _ => self.type_rank().partial_cmp(&other.type_rank()),
        }
    }
}

/// A total order over `Value`, used as the sort key for range/composite
/// indexes. NaN floats sort after all other numbers (never panics, unlike
/// the derived `Ord` one would need on `f64`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SortKey(Vec<u8>);

impl SortKey {
    pub fn from_value(v: &Value) -> Self {
        let mut bytes = Vec::new();
        encode_sort_key(v, &mut bytes);
        SortKey(bytes)
    }

    pub fn from_values(vs: &[Value]) -> Self {
        let mut bytes = Vec::new();
        for v in vs {
            encode_sort_key(v, &mut bytes);
        }
        SortKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

fn encode_sort_key(v: &Value, out: &mut Vec<u8>) {
    match v {
        Value::Null => out.push(0),
        Value::Bool(b) => {
            out.push(1);
            out.push(*b as u8);
        }
        Value::Int(i) => {
            out.push(2);
            // Order-preserving encoding: flip the sign bit.
            let bits = (*i as u64) ^ (1u64 << 63);
            out.extend_from_slice(&bits.to_be_bytes());
        }
        Value::Float(x) => {
            out.push(2);
            let bits = x.to_bits();
            let mapped = if *x >= 0.0 { bits | (1u64 << 63) } else { !bits };
            out.extend_from_slice(&mapped.to_be_bytes());
        }
        Value::String(s) => {
            out.push(3);
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        Value::Array(a) => {
            out.push(4);
            for item in a {
                encode_sort_key(item, out);
            }
        }
        Value::Object(o) => {
            out.push(5);
            let mut keys: Vec<&String> = o.keys().collect();
            keys.sort();
            for k in keys {
                out.extend_from_slice(k.as_bytes());
                out.push(0);
                encode_sort_key(o.get(k).unwrap(), out);
            }
        }
    }
}

/// Convenience for converting to/from `serde_json::Value`, used at the
/// wire boundary (requests/responses are JSON) and for persisted metadata.
impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Self {
        match j {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Object(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::Number(i.into()),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(a) => serde_json::Value::Array(a.into_iter().map(Into::into).collect()),
            Value::Object(o) => serde_json::Value::Object(
                o.iter().map(|(k, v)| (k.clone(), v.clone().into())).collect(),
            ),
        }
    }
}

/// A flat map of indexed field paths used when diffing a document's old
/// and new state for secondary-index maintenance (§4.6).
pub fn flatten_indexable(doc: &Value, fields: &[String]) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for field in fields {
        if let Some(v) = doc.get_path(field) {
            out.insert(field.clone(), v.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_cross_type_equality() {
        assert_eq!(Value::Int(5), Value::Float(5.0));
        assert!(Value::Int(5) < Value::Float(5.5));
    }

    #[test]
    fn object_equality_is_order_independent() {
        let mut a = Object::new();
        a.insert("x", Value::Int(1));
        a.insert("y", Value::Int(2));
        let mut b = Object::new();
        b.insert("y", Value::Int(2));
        b.insert("x", Value::Int(1));
        assert_eq!(Value::Object(a), Value::Object(b));
    }

    #[test]
    fn get_set_path_nested() {
        let mut v = Value::Object(Object::new());
        v.set_path("a.b.c", Value::Int(42));
        assert_eq!(v.get_path("a.b.c"), Some(&Value::Int(42)));
    }

    #[test]
    fn sort_key_orders_integers_correctly() {
        let a = SortKey::from_value(&Value::Int(-5));
        let b = SortKey::from_value(&Value::Int(0));
        let c = SortKey::from_value(&Value::Int(5));
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn json_roundtrip_preserves_structure() {
        let j = serde_json::json!({"a": 1, "b": [1,2,3], "c": {"d": "x"}});
        let v: Value = j.clone().into();
        let back: serde_json::Value = v.into();
        assert_eq!(j, back);
    }
}
