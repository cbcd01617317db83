//! Storage layer error types.

use crate::storage::page::PageId;
use crate::transaction::TransactionId;
use thiserror::Error;

/// Errors that can occur in the storage layer.
///
/// `LockTimeout` is the transaction-abort signal: the only valid response is
/// a full abort of the owning transaction (rollback plus lock release). It
/// is never retried internally.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("transaction {0} aborted: lock acquisition timed out")]
    LockTimeout(TransactionId),

    #[error("transaction {0} is not live")]
    TransactionNotLive(TransactionId),

    #[error("transaction {0} already has a BEGIN record")]
    TransactionAlreadyBegan(TransactionId),

    #[error("page {0} does not exist")]
    PageNotFound(PageId),

    #[error("no table registered with id {0}")]
    UnknownTable(u32),

    #[error("cannot evict: every cached page is dirty")]
    AllPagesDirty,

    #[error("page is full: requires {required} bytes but only {available} available")]
    PageFull { required: usize, available: usize },

    #[error("invalid slot {slot} (page has {count} slots)")]
    InvalidSlot { slot: u16, count: u16 },

    #[error("tuple at slot {0} has been deleted")]
    TupleDeleted(u16),

    #[error("tuple belongs to table {actual}, not table {expected}")]
    WrongTable { expected: u32, actual: u32 },

    #[error("corrupt log: {0}")]
    CorruptLog(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
