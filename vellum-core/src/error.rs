//! Error taxonomy for the storage engine core.
//!
//! Every variant here is surfaced to clients as `error` strings in the wire
//! protocol (see `vellum-server::command`). `TransactionConflict`'s
//! `Display` must always contain the substring `"conflict"` -- clients
//! discriminate retriable OCC failures on that substring, never on the
//! variant name.

use std::fmt;

pub type CResult<T> = Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("collection already exists: {0}")]
    CollectionExists(String),

    #[error("duplicate key for index {index:?} value {value}")]
    DuplicateKey { index: String, value: String },

    #[error("transaction already active on this connection")]
    TransactionAlreadyActive,

    #[error("no active transaction on this connection")]
    NoActiveTransaction,

    #[error("transaction conflict: a concurrent commit invalidated this transaction's read snapshot")]
    TransactionConflict,

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("index already exists: {0}")]
    IndexExists(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("failed to decrypt record: authentication tag mismatch")]
    DecryptionFailed,

    #[error("corrupt log record: {0}")]
    Corrupt(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a client should retry the whole transaction.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::TransactionConflict)
    }

    pub fn duplicate_key(index: impl Into<String>, value: impl fmt::Display) -> Self {
        Error::DuplicateKey { index: index.into(), value: value.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_contains_conflict_substring() {
        let msg = Error::TransactionConflict.to_string();
        assert!(msg.to_lowercase().contains("conflict"));
    }

    #[test]
    fn other_errors_do_not_accidentally_contain_conflict() {
        let msg = Error::CollectionNotFound("x".into()).to_string();
        assert!(!msg.to_lowercase().contains("conflict"));
    }
}
