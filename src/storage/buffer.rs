//! The buffer pool: a fixed-capacity page cache fronting the heap files,
//! wired to the lock manager and the write-ahead log.
//!
//! Policies: steal (a dirty page may be flushed before its transaction
//! commits, at checkpoints) and no-force at the page level (commits force
//! the log, and the commit path writes the pages it flushed). Eviction only
//! ever picks clean pages; when every cached page is dirty the access fails
//! instead of breaking the write-ahead rule.
//!
//! Lock order: the cache mutex is acquired before the log's internal mutex,
//! never the other way around. Log operations that need the cache
//! (`log_abort`, `recover`) receive the already-locked cache from here.

use crate::catalog::Catalog;
use crate::concurrency::lock::{LockManager, LockMode};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{Page, PageId, RecordId};
use crate::storage::wal::record::PageImage;
use crate::storage::wal::LogFile;
use crate::transaction::TransactionId;
use log::{debug, trace};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Default number of pages the pool holds.
pub const DEFAULT_CAPACITY: usize = 50;

/// Default lock-acquisition timeout; the jittered deadline is drawn from
/// `[0, this]`.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

/// The cached pages themselves. Everything here runs under the pool's cache
/// mutex; the log's rollback and recovery paths borrow the locked cache to
/// evict pages they rewrite on disk.
pub struct PageCache {
    pages: HashMap<PageId, Arc<Page>>,
    capacity: usize,
}

impl PageCache {
    fn new(capacity: usize) -> Self {
        Self {
            pages: HashMap::new(),
            capacity,
        }
    }

    pub(crate) fn get(&self, pid: PageId) -> Option<Arc<Page>> {
        self.pages.get(&pid).cloned()
    }

    pub(crate) fn remove(&mut self, pid: PageId) -> Option<Arc<Page>> {
        self.pages.remove(&pid)
    }

    fn install(&mut self, page: Arc<Page>) -> StorageResult<()> {
        if !self.pages.contains_key(&page.id()) && self.pages.len() >= self.capacity {
            self.evict_one()?;
        }
        self.pages.insert(page.id(), page);
        Ok(())
    }

    fn page_ids(&self) -> Vec<PageId> {
        self.pages.keys().copied().collect()
    }

    /// Drops one clean page. Dirty pages are never eviction victims: their
    /// log records have not been forced, and flushing them here would write
    /// data ahead of the log.
    fn evict_one(&mut self) -> StorageResult<()> {
        let victim = self
            .pages
            .values()
            .find(|page| !page.is_dirty())
            .map(|page| page.id());
        match victim {
            Some(pid) => {
                trace!("evicting clean page {}", pid);
                self.pages.remove(&pid);
                Ok(())
            }
            None => Err(StorageError::AllPagesDirty),
        }
    }
}

pub struct BufferPool {
    cache: Mutex<PageCache>,
    lock_mgr: LockManager,
    catalog: Arc<Catalog>,
    log: Arc<LogFile>,
    lock_timeout: Duration,
}

impl BufferPool {
    pub fn new(
        catalog: Arc<Catalog>,
        log: Arc<LogFile>,
        capacity: usize,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            cache: Mutex::new(PageCache::new(capacity)),
            lock_mgr: LockManager::new(),
            catalog,
            log,
            lock_timeout,
        }
    }

    /// Fetches a page on behalf of `tid`, taking the page lock implied by
    /// `perm` first. The lock is held until the transaction completes; it
    /// stays held even if the fetch itself fails afterwards, since the
    /// transaction is headed for an abort anyway.
    pub fn get_page(
        &self,
        tid: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> StorageResult<Arc<Page>> {
        let mode = match perm {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        };
        self.lock_mgr.acquire(tid, pid, mode, self.lock_timeout)?;

        let mut cache = self.cache.lock();
        if let Some(page) = cache.get(pid) {
            return Ok(page);
        }
        let table = self.catalog.get_table(pid.table_id())?;
        let page = Arc::new(table.read_page(pid)?);
        cache.install(Arc::clone(&page))?;
        Ok(page)
    }

    /// Inserts a tuple into `table_id` on behalf of `tid`, dirtying the
    /// page it lands on.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        table_id: u32,
        tuple: &[u8],
    ) -> StorageResult<RecordId> {
        let table = self.catalog.get_table(table_id)?;
        let (rid, pages) = table.insert_tuple(self, tid, tuple)?;
        let mut cache = self.cache.lock();
        for page in pages {
            page.mark_dirty(tid);
            cache.install(page)?;
        }
        Ok(rid)
    }

    /// Deletes the tuple at `rid` on behalf of `tid`.
    pub fn delete_tuple(&self, tid: TransactionId, rid: RecordId) -> StorageResult<()> {
        let table = self.catalog.get_table(rid.page_id.table_id())?;
        let page = table.delete_tuple(self, tid, rid)?;
        let mut cache = self.cache.lock();
        page.mark_dirty(tid);
        cache.install(page)?;
        Ok(())
    }

    /// Finishes `tid`: on commit, flushes its dirty pages (logging the
    /// updates first); on abort, discards them. Either way every lock the
    /// transaction holds is released, and only then.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> StorageResult<()> {
        let mut cache = self.cache.lock();
        self.complete_locked(&mut cache, tid, commit)
    }

    pub(crate) fn complete_locked(
        &self,
        cache: &mut PageCache,
        tid: TransactionId,
        commit: bool,
    ) -> StorageResult<()> {
        if commit {
            self.flush_pages_locked(cache, tid)?;
        } else {
            for pid in self.lock_mgr.pages_locked_by(tid) {
                if let Some(page) = cache.get(pid) {
                    if page.dirtier() == Some(tid) {
                        debug!("discarding {}'s uncommitted page {}", tid, pid);
                        cache.remove(pid);
                    }
                }
            }
        }
        self.lock_mgr.release_all(tid);
        Ok(())
    }

    /// Flushes every page `tid` dirtied and refreshes its before-image:
    /// the flushed state is the transaction's durable state.
    pub fn flush_pages(&self, tid: TransactionId) -> StorageResult<()> {
        let mut cache = self.cache.lock();
        self.flush_pages_locked(&mut cache, tid)
    }

    fn flush_pages_locked(&self, cache: &mut PageCache, tid: TransactionId) -> StorageResult<()> {
        for pid in self.lock_mgr.pages_locked_by(tid) {
            if let Some(page) = cache.get(pid) {
                if page.dirtier() == Some(tid) {
                    self.flush_page_locked(&page)?;
                    page.set_before_image();
                }
            }
        }
        Ok(())
    }

    /// Flushes every dirty page in the pool. Before-images are left alone:
    /// a page flushed under a still-running transaction keeps its
    /// pre-transaction image so a later rollback restores the right bytes.
    pub fn flush_all(&self) -> StorageResult<()> {
        let mut cache = self.cache.lock();
        self.flush_all_locked(&mut cache)
    }

    pub(crate) fn flush_all_locked(&self, cache: &mut PageCache) -> StorageResult<()> {
        for pid in cache.page_ids() {
            if let Some(page) = cache.get(pid) {
                if page.is_dirty() {
                    self.flush_page_locked(&page)?;
                }
            }
        }
        Ok(())
    }

    /// Writes one dirty page out: log the update, force the log, then write
    /// the page. The write-ahead rule lives here.
    fn flush_page_locked(&self, page: &Page) -> StorageResult<()> {
        let Some(dirtier) = page.dirtier() else {
            return Ok(());
        };
        let pid = page.id();
        let data = page.snapshot();
        let before = PageImage {
            pid,
            data: page.before_image(),
        };
        let after = PageImage {
            pid,
            data: data.clone(),
        };
        self.log.log_update(dirtier, before, after)?;
        self.log.force()?;
        self.catalog.get_table(pid.table_id())?.write_page(pid, &data)?;
        page.mark_clean();
        trace!("flushed page {} dirtied by {}", pid, dirtier);
        Ok(())
    }

    /// Flushes the page at `pid` if it is cached and dirty. As with
    /// `flush_all`, the before-image stays put until commit.
    pub fn flush_page(&self, pid: PageId) -> StorageResult<()> {
        let cache = self.cache.lock();
        if let Some(page) = cache.get(pid) {
            self.flush_page_locked(&page)?;
        }
        Ok(())
    }

    /// Drops a page from the cache without flushing it, dirty or not.
    pub fn discard_page(&self, pid: PageId) {
        self.cache.lock().remove(pid);
    }

    /// Releases `tid`'s lock on a single page. This breaks two-phase
    /// locking; it is only sound for pages the transaction inspected but
    /// did not modify and will not read again.
    pub fn release_page(&self, tid: TransactionId, pid: PageId) {
        self.lock_mgr.release(tid, pid);
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.lock_mgr.holds(tid, pid)
    }

    /// Locks the cache and hands the guard out, for the completion paths
    /// that interleave cache and log work under one critical section.
    pub(crate) fn lock_cache(&self) -> MutexGuard<'_, PageCache> {
        self.cache.lock()
    }
}
