//! On-disk append-only log and in-memory document index.

pub mod didx;
pub mod log;

pub use didx::{Didx, DocPointer};
pub use log::Log;
