//! Error types for all StrataDB schema and storage operations.

use std::io;
use thiserror::Error;

use crate::types::Epoch;

/// Top-level error type for StrataDB operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Transaction(#[from] TxnError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("out of memory: requested {requested} bytes, {available} bytes left before the allocation limit")]
    OutOfMemory { requested: usize, available: usize },

    #[error("corrupted node: {0}")]
    CorruptedNode(String),

    #[error("corrupted header: {0}")]
    CorruptedHeader(String),

    #[error("invalid magic bytes")]
    InvalidMagic,

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),

    #[error("database file is locked")]
    FileLocked,

    #[error("ref out of bounds: {offset} >= {len}")]
    RefOutOfBounds { offset: u64, len: u64 },
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unknown column type code: {0}")]
    UnknownColumnType(i64),

    #[error("unknown column attribute bits: {0:#x}")]
    UnknownAttribute(i64),

    #[error("schema invariant violated: {0}")]
    InvariantViolated(String),
}

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("stale accessor: created in epoch {accessor}, store is at epoch {current}")]
    StaleAccessor { accessor: Epoch, current: Epoch },

    #[error("accessor not refreshed after commit: bound to version {accessor}, store is at version {current}")]
    NotRefreshed { accessor: u64, current: u64 },

    #[error("a write transaction is already active")]
    AlreadyActive,
}
