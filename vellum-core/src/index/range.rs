//! Range index: an ordered map supporting bounded iteration.

use crate::document::Id;
use crate::value::{SortKey, Value};
use crossbeam_skiplist::SkipMap;
use dashmap::DashSet;
use std::ops::Bound;

pub struct RangeIndex {
    map: SkipMap<SortKey, DashSet<Id>>,
}

impl RangeIndex {
    pub fn new() -> Self {
        RangeIndex { map: SkipMap::new() }
    }

    pub fn insert(&self, key: Value, id: Id) {
        let sk = SortKey::from_value(&key);
        let entry = self.map.get_or_insert_with(sk, DashSet::new);
        entry.value().insert(id);
    }

    pub fn remove(&self, key: &Value, id: Id) {
        let sk = SortKey::from_value(key);
        if let Some(entry) = self.map.get(&sk) {
            entry.value().remove(&id);
        }
    }

    pub fn lookup(&self, key: &Value) -> Vec<Id> {
        let sk = SortKey::from_value(key);
        self.map.get(&sk).map(|e| e.value().iter().map(|r| *r).collect()).unwrap_or_default()
    }

    /// Returns ids whose indexed value falls within `(lower, upper)`,
    /// in ascending key order, honoring inclusivity via `Bound`.
    pub fn range(&self, lower: Bound<&Value>, upper: Bound<&Value>) -> Vec<Id> {
        let lower_key = map_bound(lower);
        let upper_key = map_bound(upper);
        let mut out = Vec::new();
        for entry in self.map.range((lower_key, upper_key)) {
            out.extend(entry.value().iter().map(|r| *r));
        }
        out
    }
}

fn map_bound(b: Bound<&Value>) -> Bound<SortKey> {
    match b {
        Bound::Included(v) => Bound::Included(SortKey::from_value(v)),
        Bound::Excluded(v) => Bound::Excluded(SortKey::from_value(v)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_range_scan() {
        let idx = RangeIndex::new();
        let ids: Vec<Id> = (0..5).map(|_| Id::new()).collect();
        for (i, id) in ids.iter().enumerate() {
            idx.insert(Value::Int(i as i64), *id);
        }
        let found = idx.range(Bound::Included(&Value::Int(1)), Bound::Excluded(&Value::Int(4)));
        assert_eq!(found.len(), 3);
    }
}
