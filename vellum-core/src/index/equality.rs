//! Equality and unique indexes: `value -> set<id>`.

use crate::document::Id;
use crate::value::{SortKey, Value};
use dashmap::DashMap;
use dashmap::DashSet;

pub struct EqualityIndex {
    unique: bool,
    map: DashMap<SortKey, DashSet<Id>>,
}

impl EqualityIndex {
    pub fn new(unique: bool) -> Self {
        EqualityIndex { unique, map: DashMap::new() }
    }

    /// True if inserting `key -> id` would violate the unique constraint:
    /// the key is already bound to a different, live id.
    pub fn conflicts(&self, key: &Value, id: Id) -> bool {
        if !self.unique {
            return false;
        }
        let sk = SortKey::from_value(key);
        self.map.get(&sk).map(|set| set.iter().any(|e| *e != id)).unwrap_or(false)
    }

    pub fn insert(&self, key: Value, id: Id) {
        let sk = SortKey::from_value(&key);
        self.map.entry(sk).or_insert_with(DashSet::new).insert(id);
    }

    pub fn remove(&self, key: &Value, id: Id) {
        let sk = SortKey::from_value(key);
        if let Some(set) = self.map.get(&sk) {
            set.remove(&id);
        }
    }

    pub fn lookup(&self, key: &Value) -> Vec<Id> {
        let sk = SortKey::from_value(key);
        self.map.get(&sk).map(|set| set.iter().map(|e| *e).collect()).unwrap_or_default()
    }

    pub fn lookup_many(&self, keys: &[Value]) -> Vec<Id> {
        let mut out = Vec::new();
        for key in keys {
            out.extend(self.lookup(key));
        }
        out.sort();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_conflicts_on_second_distinct_id() {
        let idx = EqualityIndex::new(true);
        let id1 = Id::new();
        let id2 = Id::new();
        idx.insert(Value::String("a".into()), id1);
        assert!(!idx.conflicts(&Value::String("a".into()), id1));
        assert!(idx.conflicts(&Value::String("a".into()), id2));
    }

    #[test]
    fn lookup_after_remove() {
        let idx = EqualityIndex::new(false);
        let id = Id::new();
        idx.insert(Value::Int(1), id);
        assert_eq!(idx.lookup(&Value::Int(1)), vec![id]);
        idx.remove(&Value::Int(1), id);
        assert!(idx.lookup(&Value::Int(1)).is_empty());
    }
}
