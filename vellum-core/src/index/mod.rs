//! Secondary indexes: equality, range, unique, composite, vector.

mod composite;
mod equality;
mod range;
mod vector;

pub use composite::CompositeIndex;
pub use equality::EqualityIndex;
pub use range::RangeIndex;
pub use vector::{VectorIndex, VectorMetric};

use crate::document::Id;
use crate::error::{CResult, Error};
use crate::value::Value;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    Equality,
    Unique,
    Range,
    Composite,
    Vector,
}

/// Persisted definition of an index, stored in `indexes.meta`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub kind: IndexKind,
    /// Field paths the index is keyed on. A single entry for
    /// equality/unique/range/vector; 2+ for composite.
    pub fields: Vec<String>,
    /// Vector dimensionality, required only for `Vector`.
    pub dimension: Option<usize>,
    pub metric: Option<VectorMetric>,
}

/// A single mutation to apply to one SIDX structure, emitted by the
/// transaction manager's write-set diff.
#[derive(Clone, Debug)]
pub enum SidxDelta {
    Insert { key: Value, id: Id },
    Remove { key: Value, id: Id },
}

/// A live, queryable secondary index.
pub enum Index {
    Equality(EqualityIndex),
    Unique(EqualityIndex),
    Range(RangeIndex),
    Composite(CompositeIndex),
    Vector(VectorIndex),
}

impl Index {
    pub fn new(def: &IndexDef) -> CResult<Self> {
        match def.kind {
            IndexKind::Equality => Ok(Index::Equality(EqualityIndex::new(false))),
            IndexKind::Unique => Ok(Index::Unique(EqualityIndex::new(true))),
            IndexKind::Range => Ok(Index::Range(RangeIndex::new())),
            IndexKind::Composite => Ok(Index::Composite(CompositeIndex::new())),
            IndexKind::Vector => {
                let dim = def.dimension.ok_or_else(|| {
                    Error::InvalidQuery("vector index requires a dimension".into())
                })?;
                let metric = def.metric.unwrap_or(VectorMetric::Cosine);
                Ok(Index::Vector(VectorIndex::new(dim, metric)))
            }
        }
    }

    /// Stages an insertion, returning `DuplicateKey` for unique violations
    /// without mutating the structure.
    pub fn check_insert(&self, key: &Value, id: Id) -> CResult<()> {
        if let Index::Unique(map) = self {
            if map.conflicts(key, id) {
                return Err(Error::duplicate_key("unique index", key));
            }
        }
        Ok(())
    }

    pub fn apply(&self, delta: &SidxDelta) {
        match (self, delta) {
            (Index::Equality(m) | Index::Unique(m), SidxDelta::Insert { key, id }) => {
                m.insert(key.clone(), *id);
            }
            (Index::Equality(m) | Index::Unique(m), SidxDelta::Remove { key, id }) => {
                m.remove(key, *id);
            }
            (Index::Range(r), SidxDelta::Insert { key, id }) => r.insert(key.clone(), *id),
            (Index::Range(r), SidxDelta::Remove { key, id }) => r.remove(key, *id),
            (Index::Composite(c), SidxDelta::Insert { key, id }) => c.insert(key.clone(), *id),
            (Index::Composite(c), SidxDelta::Remove { key, id }) => c.remove(key, *id),
            (Index::Vector(v), SidxDelta::Insert { key, id }) => v.insert(key, *id),
            (Index::Vector(v), SidxDelta::Remove { id, .. }) => v.remove(*id),
        }
    }

    pub fn kind(&self) -> IndexKind {
        match self {
            Index::Equality(_) => IndexKind::Equality,
            Index::Unique(_) => IndexKind::Unique,
            Index::Range(_) => IndexKind::Range,
            Index::Composite(_) => IndexKind::Composite,
            Index::Vector(_) => IndexKind::Vector,
        }
    }
}
