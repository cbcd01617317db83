//! minibase: the storage engine of a small relational database.
//!
//! Tables live in heap files of fixed-size pages, cached by a bounded
//! buffer pool. Page-level strict two-phase locking isolates transactions,
//! and a write-ahead log with checkpoints makes committed work survive
//! crashes.

pub mod catalog;
pub mod concurrency;
pub mod database;
pub mod storage;
pub mod transaction;

pub use catalog::Catalog;
pub use database::Database;
pub use storage::{
    BufferPool, HeapFile, LogFile, Page, PageId, Permissions, RecordId, StorageError,
    StorageResult, PAGE_SIZE,
};
pub use transaction::TransactionId;
