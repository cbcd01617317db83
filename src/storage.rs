//! Storage layer implementation for minibase.
//!
//! This module provides the foundation for persistent, recoverable data
//! storage using a page-based architecture. Key components:
//!
//! - **Page**: Fixed-size (4KB) blocks of data, the basic unit of I/O
//! - **HeapFile**: Per-table flat file of pages with slotted tuple storage
//! - **BufferPool**: Bounded in-memory cache of pages, gated by page locks
//! - **LogFile**: Append-only write-ahead log with checkpointing, rollback
//!   and crash recovery
//!
//! Every page access flows BufferPool -> LockManager -> HeapFile, and every
//! durable page mutation flows through the LogFile before it reaches the
//! HeapFile (write-ahead rule).

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;
pub mod wal;

pub use buffer::{BufferPool, Permissions};
pub use disk::HeapFile;
pub use error::{StorageError, StorageResult};
pub use page::{Page, PageId, RecordId, PAGE_SIZE};
pub use wal::LogFile;
