//! Collection lifecycle and the OCC commit path.
//!
//! A `Collection` owns its own `Log`, `Didx`, and `SIDX` structures, plus a
//! structural read-write lock (create/drop/compact) and a commit mutex
//! that serializes commit points within the collection -- concurrent
//! commits across different collections proceed independently.

use crate::codec::LogRecord;
use crate::crypto::EncryptionKey;
use crate::document::{Document, Id};
use crate::error::{CResult, Error};
use crate::index::{Index, IndexDef, SidxDelta};
use crate::storage::{Didx, Log};
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
}

/// One document's pending mutation within a transaction's write set
/// `read_version` is `Some` only if this connection read
/// the document earlier in the same transaction; absent for blind writes,
/// which therefore never participate in OCC validation (see DESIGN.md,
/// Open Question 1).
#[derive(Clone, Debug)]
pub struct WriteEntry {
    pub kind: WriteKind,
    pub new_doc: Option<Value>,
    pub read_version: Option<u64>,
}

pub struct Collection {
    name: String,
    dir: PathBuf,
    log: RwLock<Log>,
    didx: Didx,
    indexes: RwLock<HashMap<String, (IndexDef, Arc<Index>)>>,
    commit_lock: Mutex<()>,
    structural_lock: RwLock<()>,
    encryption_key: Option<Arc<EncryptionKey>>,
}

impl Collection {
    pub fn create(
        name: &str,
        data_dir: &Path,
        encryption_key: Option<Arc<EncryptionKey>>,
    ) -> CResult<Self> {
        let dir = data_dir.join(name);
        std::fs::create_dir_all(&dir)?;
        let log = Log::open(dir.join("data.log"))?;
        let col = Collection {
            name: name.to_string(),
            dir,
            log: RwLock::new(log),
            didx: Didx::new(),
            indexes: RwLock::new(HashMap::new()),
            commit_lock: Mutex::new(()),
            structural_lock: RwLock::new(()),
            encryption_key,
        };
        col.save_index_meta()?;
        Ok(col)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn didx(&self) -> &Didx {
        &self.didx
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.join("indexes.meta")
    }

    fn save_index_meta(&self) -> CResult<()> {
        let indexes = self.indexes.read();
        let defs: Vec<&IndexDef> = indexes.values().map(|(def, _)| def).collect();
        let json = serde_json::to_vec_pretty(&defs)?;
        std::fs::write(self.meta_path(), json)?;
        Ok(())
    }

    pub fn load_index_defs(&self) -> CResult<Vec<IndexDef>> {
        let path = self.meta_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    // -- index management (§4.3 "Index build") --------------------------

    pub fn create_index(&self, def: IndexDef) -> CResult<()> {
        let _guard = self.structural_lock.write();
        {
            let indexes = self.indexes.read();
            if indexes.contains_key(&def.name) {
                return Err(Error::IndexExists(def.name.clone()));
            }
        }
        let index = Index::new(&def)?;
        // Build scan: populate the new index from every live document
        // before it becomes visible to the planner.
        for id in self.didx.snapshot_ids() {
            let Some(ptr) = self.didx.get(&id) else { continue };
            let record = self.log.read().read_at(ptr.offset, self.encryption_key.as_deref())?;
            let body = match record {
                LogRecord::Insert { doc, .. } | LogRecord::Update { doc, .. } => doc,
                _ => continue,
            };
            for field_value in index_keys(&def, &body) {
                index.check_insert(&field_value, id)?;
                index.apply(&SidxDelta::Insert { key: field_value, id });
            }
        }
        self.indexes.write().insert(def.name.clone(), (def, Arc::new(index)));
        self.save_index_meta()
    }

    pub fn drop_index(&self, name: &str) -> CResult<()> {
        let _guard = self.structural_lock.write();
        let removed = self.indexes.write().remove(name);
        if removed.is_none() {
            return Err(Error::IndexNotFound(name.to_string()));
        }
        self.save_index_meta()
    }

    pub fn list_indexes(&self) -> Vec<IndexDef> {
        self.indexes.read().values().map(|(def, _)| def.clone()).collect()
    }

    pub fn index(&self, name: &str) -> Option<(IndexDef, Arc<Index>)> {
        self.indexes.read().get(name).cloned()
    }

    pub fn indexes_snapshot(&self) -> Vec<(IndexDef, Arc<Index>)> {
        self.indexes.read().values().cloned().collect()
    }

    // -- reads -------------------------------------------------------------

    /// Fetches and decodes the current document for `id`, if live.
    pub fn get(&self, id: &Id) -> CResult<Option<Document>> {
        let Some(ptr) = self.didx.get(id) else { return Ok(None) };
        let record = self.log.read().read_at(ptr.offset, self.encryption_key.as_deref())?;
        match record {
            LogRecord::Insert { doc, .. } | LogRecord::Update { doc, .. } => {
                Ok(Some(Document::new(*id, ptr.version, doc)))
            }
            _ => Ok(None),
        }
    }

    pub fn count(&self) -> usize {
        self.didx.len()
    }

    // -- replay (APPLY, §4.7 and recovery, both bypass OCC) ------------------

    /// Writes an insert with an externally-decided id/version, updating
    /// DIDX and SIDX but skipping the OCC validation a local commit does.
    pub fn replay_insert(&self, id: Id, doc: Value, version: u64) -> CResult<()> {
        let record = LogRecord::Insert { id, doc: doc.clone(), version };
        let offset = self.log.read().append_one(&record, self.encryption_key.as_deref())?;
        self.didx.put(id, offset, version);
        let indexes = self.indexes.read();
        for (def, index) in indexes.values() {
            for key in index_keys(def, &doc) {
                index.apply(&SidxDelta::Insert { key, id });
            }
        }
        Ok(())
    }

    pub fn replay_update(&self, id: Id, doc: Value, version: u64) -> CResult<()> {
        let old_doc = self.get(&id)?;
        let record = LogRecord::Update { id, doc: doc.clone(), version };
        let offset = self.log.read().append_one(&record, self.encryption_key.as_deref())?;
        self.didx.put(id, offset, version);
        let indexes = self.indexes.read();
        for (def, index) in indexes.values() {
            if let Some(old) = &old_doc {
                for key in index_keys(def, &old.body) {
                    index.apply(&SidxDelta::Remove { key, id });
                }
            }
            for key in index_keys(def, &doc) {
                index.apply(&SidxDelta::Insert { key, id });
            }
        }
        Ok(())
    }

    pub fn replay_delete(&self, id: Id, version: u64) -> CResult<()> {
        let old_doc = self.get(&id)?;
        let record = LogRecord::Delete { id, version };
        self.log.read().append_one(&record, self.encryption_key.as_deref())?;
        self.didx.remove(&id);
        if let Some(old) = &old_doc {
            let indexes = self.indexes.read();
            for (def, index) in indexes.values() {
                for key in index_keys(def, &old.body) {
                    index.apply(&SidxDelta::Remove { key, id });
                }
            }
        }
        Ok(())
    }

    /// Rebuilds DIDX and SIDX from scratch by replaying `data.log` from
    /// offset 0 (REC, §4.7). Index definitions are reloaded from
    /// `indexes.meta` first so `IndexCreate`-equivalent structures exist
    /// before the scan reaches records that should populate them.
    pub fn recover(&self) -> CResult<()> {
        self.didx.clear();
        let defs = self.load_index_defs()?;
        {
            let mut indexes = self.indexes.write();
            indexes.clear();
            for def in defs {
                let index = Index::new(&def)?;
                indexes.insert(def.name.clone(), (def, Arc::new(index)));
            }
        }

        let mut previous: HashMap<Id, Value> = HashMap::new();
        let indexes = self.indexes.read();
        let mut log = self.log.write();
        log.iterate(self.encryption_key.as_deref(), |offset, record| {
            match record {
                LogRecord::Insert { id, doc, version } => {
                    self.didx.put(id, offset, version);
                    for (def, index) in indexes.values() {
                        for key in index_keys(def, &doc) {
                            index.apply(&SidxDelta::Insert { key, id });
                        }
                    }
                    previous.insert(id, doc);
                }
                LogRecord::Update { id, doc, version } => {
                    self.didx.put(id, offset, version);
                    if let Some(old) = previous.get(&id) {
                        for (def, index) in indexes.values() {
                            for key in index_keys(def, old) {
                                index.apply(&SidxDelta::Remove { key, id });
                            }
                        }
                    }
                    for (def, index) in indexes.values() {
                        for key in index_keys(def, &doc) {
                            index.apply(&SidxDelta::Insert { key, id });
                        }
                    }
                    previous.insert(id, doc);
                }
                LogRecord::Delete { id, .. } => {
                    self.didx.remove(&id);
                    if let Some(old) = previous.remove(&id) {
                        for (def, index) in indexes.values() {
                            for key in index_keys(def, &old) {
                                index.apply(&SidxDelta::Remove { key, id });
                            }
                        }
                    }
                }
                _ => {}
            }
            Ok(())
        })
    }

    /// Rewrites `data.log` to hold exactly one record per live document,
    /// dropping superseded updates and deleted documents. Blocks commits
    /// and structural ops for its duration; existing readers already
    /// holding offsets finish against the old file before the rename
    /// lands, same as any other structural op.
    pub fn compact(&self) -> CResult<()> {
        let _structural = self.structural_lock.write();
        let _commit = self.commit_lock.lock();

        let mut records = Vec::new();
        let mut live = Vec::new();
        for id in self.didx.snapshot_ids() {
            let Some(doc) = self.get(&id)? else { continue };
            records.push(LogRecord::Insert { id, doc: doc.body, version: doc.version });
            live.push((id, doc.version));
        }

        let mut offset = 0u64;
        let mut offsets = Vec::with_capacity(records.len());
        for record in &records {
            offsets.push(offset);
            offset += crate::codec::encode_frame(record, self.encryption_key.as_deref())?.len() as u64;
        }

        self.log.read().rewrite(&records, self.encryption_key.as_deref())?;

        for ((id, version), offset) in live.into_iter().zip(offsets.into_iter()) {
            self.didx.put(id, offset, version);
        }
        Ok(())
    }

    // -- commit (§4.4 steps 1-7) --------------------------------------------

    /// Validates and applies a batch of writes as a single OCC commit.
    /// Returns the new `(id, version)` of every non-delete entry, in
    /// write-set order.
    pub fn commit(&self, writes: Vec<(Id, WriteEntry)>) -> CResult<Vec<(Id, Option<u64>)>> {
        let _lock = self.commit_lock.lock();

        // Step 2: OCC validation against recorded read versions.
        for (id, entry) in &writes {
            if let Some(expected) = entry.read_version {
                let current = self.didx.get(id).map(|p| p.version);
                if current != Some(expected) {
                    return Err(Error::TransactionConflict);
                }
            }
        }

        // Step 3: unique-index pre-check, plus within-batch collisions.
        let indexes = self.indexes.read();
        let mut batch_unique_keys: HashMap<String, HashMap<crate::value::SortKey, Id>> =
            HashMap::new();
        for (id, entry) in &writes {
            if entry.kind == WriteKind::Delete {
                continue;
            }
            let Some(doc) = &entry.new_doc else { continue };
            for (name, (def, index)) in indexes.iter() {
                if def.kind != crate::index::IndexKind::Unique {
                    continue;
                }
                for key in index_keys(def, doc) {
                    if index.check_insert(&key, *id).is_err() {
                        return Err(Error::duplicate_key(name.clone(), &key));
                    }
                    let sort_key = crate::value::SortKey::from_value(&key);
                    let seen = batch_unique_keys.entry(name.clone()).or_default();
                    if let Some(other) = seen.get(&sort_key) {
                        if other != id {
                            return Err(Error::duplicate_key(name.clone(), &key));
                        }
                    }
                    seen.insert(sort_key, *id);
                }
            }
        }

        // Step 4: assign versions and build log records + sidx deltas.
        let mut records = Vec::with_capacity(writes.len());
        let mut results = Vec::with_capacity(writes.len());
        let mut deltas: Vec<(String, SidxDelta)> = Vec::new();

        for (id, entry) in &writes {
            let old_doc = self.get(id).ok().flatten();

            match entry.kind {
                WriteKind::Insert => {
                    let doc = entry.new_doc.clone().unwrap_or(Value::Null);
                    records.push(LogRecord::Insert { id: *id, doc: doc.clone(), version: 1 });
                    for (name, (def, _)) in indexes.iter() {
                        for key in index_keys(def, &doc) {
                            deltas.push((name.clone(), SidxDelta::Insert { key, id: *id }));
                        }
                    }
                    results.push((*id, Some(1)));
                }
                WriteKind::Update => {
                    let old_version = old_doc.as_ref().map(|d| d.version).unwrap_or(0);
                    let new_version = old_version + 1;
                    let doc = entry.new_doc.clone().unwrap_or(Value::Null);
                    records.push(LogRecord::Update { id: *id, doc: doc.clone(), version: new_version });
                    for (name, (def, _)) in indexes.iter() {
                        if let Some(old) = &old_doc {
                            for key in index_keys(def, &old.body) {
                                deltas.push((name.clone(), SidxDelta::Remove { key, id: *id }));
                            }
                        }
                        for key in index_keys(def, &doc) {
                            deltas.push((name.clone(), SidxDelta::Insert { key, id: *id }));
                        }
                    }
                    results.push((*id, Some(new_version)));
                }
                WriteKind::Delete => {
                    let old_version = old_doc.as_ref().map(|d| d.version).unwrap_or(0);
                    records.push(LogRecord::Delete { id: *id, version: old_version });
                    if let Some(old) = &old_doc {
                        for (name, (def, _)) in indexes.iter() {
                            for key in index_keys(def, &old.body) {
                                deltas.push((name.clone(), SidxDelta::Remove { key, id: *id }));
                            }
                        }
                    }
                    results.push((*id, None));
                }
            }
        }

        // Step 5: append + fsync as a single group-commit batch. The log
        // hands back each record's durable offset, in the same order.
        let offsets = {
            let log = self.log.read();
            log.append_batch(&records, self.encryption_key.as_deref())?
        };

        // Step 6: apply DIDX and SIDX deltas in memory.
        for (((id, entry), (_, new_version)), offset) in
            writes.iter().zip(results.iter()).zip(offsets.iter())
        {
            match entry.kind {
                WriteKind::Delete => self.didx.remove(id),
                WriteKind::Insert | WriteKind::Update => {
                    let version = new_version.expect("insert/update always assigns a version");
                    self.didx.put(*id, *offset, version);
                }
            }
        }
        for (name, delta) in &deltas {
            if let Some((_, index)) = indexes.get(name) {
                index.apply(delta);
            }
        }

        Ok(results)
    }
}

fn index_keys(def: &IndexDef, doc: &Value) -> Vec<Value> {
    if def.fields.len() == 1 {
        doc.get_path(&def.fields[0]).cloned().into_iter().collect()
    } else {
        let parts: Option<Vec<Value>> =
            def.fields.iter().map(|f| doc.get_path(f).cloned()).collect();
        match parts {
            Some(parts) => vec![Value::Array(parts)],
            None => Vec::new(),
        }
    }
}
