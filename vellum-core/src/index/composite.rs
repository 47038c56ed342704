//! Composite index: ordered map keyed by a concatenation of several
//! fields, supporting prefix scans for multi-field conjunctions.

use crate::document::Id;
use crate::value::{SortKey, Value};
use crossbeam_skiplist::SkipMap;
use dashmap::DashSet;

pub struct CompositeIndex {
    map: SkipMap<SortKey, DashSet<Id>>,
}

impl CompositeIndex {
    pub fn new() -> Self {
        CompositeIndex { map: SkipMap::new() }
    }

    pub fn insert(&self, key: Value, id: Id) {
        let sk = composite_key(&key);
        let entry = self.map.get_or_insert_with(sk, DashSet::new);
        entry.value().insert(id);
    }

    pub fn remove(&self, key: &Value, id: Id) {
        let sk = composite_key(key);
        if let Some(entry) = self.map.get(&sk) {
            entry.value().remove(&id);
        }
    }

    pub fn lookup(&self, key: &Value) -> Vec<Id> {
        let sk = composite_key(key);
        self.map.get(&sk).map(|e| e.value().iter().map(|r| *r).collect()).unwrap_or_default()
    }

    /// Returns ids whose key starts with the given prefix values, in
    /// ascending order -- used when a query constrains only a leading
    /// subset of the index's fields.
    pub fn prefix(&self, prefix: &[Value]) -> Vec<Id> {
        let prefix_key = SortKey::from_values(prefix);
        let mut out = Vec::new();
        for entry in self.map.iter() {
            if key_has_prefix(entry.key(), &prefix_key) {
                out.extend(entry.value().iter().map(|r| *r));
            }
        }
        out
    }
}

/// A composite key is always built from `Value::Array([...])`, one
/// element per indexed field, in definition order.
fn composite_key(key: &Value) -> SortKey {
    match key {
        Value::Array(parts) => SortKey::from_values(parts),
        single => SortKey::from_value(single),
    }
}

fn key_has_prefix(full: &SortKey, prefix: &SortKey) -> bool {
    full.as_bytes().starts_with(prefix.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_lookup_by_full_key() {
        let idx = CompositeIndex::new();
        let id = Id::new();
        idx.insert(Value::Array(vec![Value::String("a".into()), Value::Int(1)]), id);
        let found =
            idx.lookup(&Value::Array(vec![Value::String("a".into()), Value::Int(1)]));
        assert_eq!(found, vec![id]);
    }

    #[test]
    fn composite_prefix_scan() {
        let idx = CompositeIndex::new();
        let id1 = Id::new();
        let id2 = Id::new();
        idx.insert(Value::Array(vec![Value::String("a".into()), Value::Int(1)]), id1);
        idx.insert(Value::Array(vec![Value::String("a".into()), Value::Int(2)]), id2);
        let found = idx.prefix(&[Value::String("a".into())]);
        assert_eq!(found.len(), 2);
    }
}
