//! Ties the storage engine together: catalog, log, buffer pool, and the
//! transaction lifecycle.

use crate::catalog::Catalog;
use crate::storage::buffer::{BufferPool, DEFAULT_CAPACITY, DEFAULT_LOCK_TIMEOUT};
use crate::storage::disk::HeapFile;
use crate::storage::error::StorageResult;
use crate::storage::wal::LogFile;
use crate::transaction::{TransactionId, TransactionIdGenerator};
use log::info;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub struct Database {
    catalog: Arc<Catalog>,
    log: Arc<LogFile>,
    pool: Arc<BufferPool>,
    tid_gen: TransactionIdGenerator,
}

impl Database {
    /// Opens a database around the log at `log_path`. An existing log is
    /// left as found; call [`Database::recover`] to replay it, or start
    /// transactions directly to discard it.
    pub fn new(log_path: &Path) -> StorageResult<Self> {
        Self::with_options(log_path, DEFAULT_CAPACITY, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_options(
        log_path: &Path,
        capacity: usize,
        lock_timeout: Duration,
    ) -> StorageResult<Self> {
        let catalog = Arc::new(Catalog::new());
        let log = Arc::new(LogFile::open(log_path)?);
        let pool = Arc::new(BufferPool::new(
            Arc::clone(&catalog),
            Arc::clone(&log),
            capacity,
            lock_timeout,
        ));
        Ok(Self {
            catalog,
            log,
            pool,
            tid_gen: TransactionIdGenerator::new(),
        })
    }

    /// Registers the heap file at `path` as table `table_id`.
    pub fn add_table(&self, path: &Path, table_id: u32) -> StorageResult<()> {
        self.catalog
            .register_table(Arc::new(HeapFile::open(path, table_id)?));
        Ok(())
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn log(&self) -> &LogFile {
        &self.log
    }

    /// Starts a transaction: a fresh id with a BEGIN record behind it.
    pub fn begin(&self) -> StorageResult<TransactionId> {
        let tid = self.tid_gen.next_id();
        self.log.log_begin(tid)?;
        Ok(tid)
    }

    /// Commits `tid`. Order matters: flush the transaction's pages (which
    /// logs and forces their updates), make the commit record durable, and
    /// only then release its locks.
    pub fn commit(&self, tid: TransactionId) -> StorageResult<()> {
        self.pool.flush_pages(tid)?;
        self.log.log_commit(tid)?;
        self.pool.transaction_complete(tid, true)
    }

    /// Aborts `tid`: restores before-images on disk, logs the abort, drops
    /// the transaction's cached pages, and releases its locks.
    pub fn abort(&self, tid: TransactionId) -> StorageResult<()> {
        let mut cache = self.pool.lock_cache();
        self.log.log_abort(tid, &self.catalog, &mut cache)?;
        self.pool.complete_locked(&mut cache, tid, false)
    }

    /// Takes a checkpoint: flushes every dirty page (steal), then writes a
    /// checkpoint record and truncates the log behind it. Concurrent
    /// transactions keep running; they are named in the record.
    pub fn checkpoint(&self) -> StorageResult<()> {
        let mut cache = self.pool.lock_cache();
        self.log.force()?;
        self.pool.flush_all_locked(&mut cache)?;
        self.log.write_checkpoint()
    }

    /// Replays the log against the registered tables. Call after
    /// `add_table` for every table the log may reference.
    pub fn recover(&self) -> StorageResult<()> {
        let mut cache = self.pool.lock_cache();
        let max_tid = self.log.recover(&self.catalog, &mut cache)?;
        self.tid_gen.advance_past(max_tid);
        info!("recovery complete, highest logged transaction id {}", max_tid);
        Ok(())
    }
}
