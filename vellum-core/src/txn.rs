//! Transaction manager: snapshot isolation for reads, optimistic
//! concurrency control for commits.

use crate::collection::{WriteEntry, WriteKind};
use crate::document::Id;
use crate::error::{CResult, Error};
use crate::value::Value;
use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnState {
    Open,
    Committed,
    Aborted,
    Conflict,
}

/// A transaction bound to one collection and one client connection. A
/// connection may hold at most one open transaction at a time (enforced
/// by the caller, typically the server's per-connection session state).
pub struct Transaction {
    pub collection: String,
    state: TxnState,
    write_set: HashMap<Id, WriteEntry>,
    read_versions: HashMap<Id, u64>,
    /// Ids inserted by this transaction but not yet committed -- visible
    /// to reads within the same transaction.
    local_inserts: HashMap<Id, Value>,
    local_deletes: HashSet<Id>,
}

impl Transaction {
    pub fn begin(collection: impl Into<String>) -> Self {
        Transaction {
            collection: collection.into(),
            state: TxnState::Open,
            write_set: HashMap::new(),
            read_versions: HashMap::new(),
            local_inserts: HashMap::new(),
            local_deletes: HashSet::new(),
        }
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == TxnState::Open
    }

    /// Records that this transaction observed `id` at `version` -- later
    /// writes to that same id carry this as their OCC `read_version`.
    pub fn record_read(&mut self, id: Id, version: u64) {
        self.read_versions.insert(id, version);
    }

    pub fn stage_insert(&mut self, id: Id, doc: Value) {
        self.local_inserts.insert(id, doc.clone());
        self.local_deletes.remove(&id);
        self.write_set.insert(id, WriteEntry { kind: WriteKind::Insert, new_doc: Some(doc), read_version: None });
    }

    pub fn stage_update(&mut self, id: Id, doc: Value) {
        let read_version = self.read_versions.get(&id).copied();
        self.local_deletes.remove(&id);
        self.write_set.insert(
            id,
            WriteEntry { kind: WriteKind::Update, new_doc: Some(doc), read_version },
        );
    }

    pub fn stage_delete(&mut self, id: Id) {
        let read_version = self.read_versions.get(&id).copied();
        self.local_inserts.remove(&id);
        self.local_deletes.insert(id);
        self.write_set.insert(id, WriteEntry { kind: WriteKind::Delete, new_doc: None, read_version });
    }

    /// Overlay for a read within this transaction: `Some(Some(doc))` if
    /// locally visible and live, `Some(None)` if locally deleted, `None`
    /// if untouched by this transaction (fall through to the snapshot).
    pub fn local_view(&self, id: &Id) -> Option<Option<Value>> {
        if self.local_deletes.contains(id) {
            return Some(None);
        }
        if let Some(entry) = self.write_set.get(id) {
            if entry.kind == WriteKind::Update {
                return Some(entry.new_doc.clone());
            }
        }
        self.local_inserts.get(id).cloned().map(Some)
    }

    pub fn take_write_set(self) -> (String, Vec<(Id, WriteEntry)>) {
        (self.collection, self.write_set.into_iter().collect())
    }

    pub fn mark(&mut self, state: TxnState) {
        self.state = state;
    }
}

/// Runs a single-statement write as an implicit transaction: commit
/// discipline identical to an explicit transaction's commit, but with no
/// connection-visible transaction object ("Non-transactional
/// calls"). Retries transparently on `TransactionConflict` when `retry_on_conflict`
/// is set, which is how `$inc`-style read-modify-write calls get exactly-N
/// semantics under concurrency without surfacing retriable errors to the caller.
pub fn run_implicit<F>(retry_on_conflict: bool, mut attempt: F) -> CResult<Vec<(Id, Option<u64>)>>
where
    F: FnMut() -> CResult<Vec<(Id, Option<u64>)>>,
{
    loop {
        match attempt() {
            Ok(result) => return Ok(result),
            Err(Error::TransactionConflict) if retry_on_conflict => continue,
            Err(e) => return Err(e),
        }
    }
}
