//! APPLY entry point: replays an already-validated commit
//! batch into a local collection, bypassing OCC (the leader already
//! validated it) but writing to LOG, DIDX, SIDX exactly as a local commit
//! would. `_id` and `_version` are taken verbatim from the batch --
//! nothing here is reassigned or stamped with a server-generated time.

use crate::collection::Collection;
use crate::document::Id;
use crate::error::{CResult, Error};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// One already-decided mutation, as produced by a committing leader.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ApplyOp {
    Insert { id: Id, doc: Value, version: u64 },
    Update { id: Id, doc: Value, version: u64 },
    Delete { id: Id, version: u64 },
}

/// An opaque, deterministic commit batch: a JSON-encoded `Vec<ApplyOp>`.
/// Opaque to transport, not to this function -- `apply` decodes it to
/// drive the same durability and index-maintenance path a local commit
/// uses.
pub fn apply_batch(collection: &Collection, batch: &[u8]) -> CResult<()> {
    let ops: Vec<ApplyOp> =
        serde_json::from_slice(batch).map_err(|e| Error::Corrupt(format!("malformed apply batch: {e}")))?;

    for op in ops {
        match op {
            ApplyOp::Insert { id, doc, version } => {
                collection.replay_insert(id, doc, version)?;
            }
            ApplyOp::Update { id, doc, version } => {
                collection.replay_update(id, doc, version)?;
            }
            ApplyOp::Delete { id, version } => {
                collection.replay_delete(id, version)?;
            }
        }
    }
    Ok(())
}

/// Encodes a set of ops into the wire format `apply_batch` accepts --
/// used by tests and by whatever leader role eventually produces batches.
pub fn encode_batch(ops: &[ApplyOp]) -> CResult<Vec<u8>> {
    serde_json::to_vec(ops).map_err(Error::Serde)
}
