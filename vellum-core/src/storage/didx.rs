//! Document index: `_id -> (log_offset, version)`.

use crate::document::Id;
use dashmap::DashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DocPointer {
    pub offset: u64,
    pub version: u64,
}

/// A fine-grained concurrent map: readers never block writers and vice
/// versa (`dashmap` shards internally). Versions are assigned by the
/// transaction manager at commit time; `Didx` only ever records what it's
/// told.
#[derive(Default)]
pub struct Didx {
    map: DashMap<Id, DocPointer>,
}

impl Didx {
    pub fn new() -> Self {
        Didx { map: DashMap::new() }
    }

    pub fn get(&self, id: &Id) -> Option<DocPointer> {
        self.map.get(id).map(|e| *e)
    }

    pub fn put(&self, id: Id, offset: u64, version: u64) {
        self.map.insert(id, DocPointer { offset, version });
    }

    pub fn remove(&self, id: &Id) {
        self.map.remove(id);
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.map.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// A cheap, consistent-enough snapshot of all live ids -- used by full
    /// scans and index builds. Not atomic with concurrent writers in the
    /// same instant, but every entry observed was live at some point
    /// during the call, which is what `create_index`'s build scan needs.
    pub fn snapshot_ids(&self) -> Vec<Id> {
        self.map.iter().map(|e| *e.key()).collect()
    }

    pub fn clear(&self) {
        self.map.clear();
    }
}
