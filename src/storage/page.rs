//! Page identity and the in-memory representation of a cached page.

pub mod heap_page;

use crate::transaction::TransactionId;
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;

pub use heap_page::HeapPage;

/// Bytes per page, including the slotted-page header.
pub const PAGE_SIZE: usize = 4096;

/// Identifies a page: which table it belongs to and its position in that
/// table's backing file. Used as both the cache key and the lock key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    table_id: u32,
    page_no: u32,
}

impl PageId {
    pub fn new(table_id: u32, page_no: u32) -> Self {
        Self { table_id, page_no }
    }

    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    pub fn page_no(&self) -> u32 {
        self.page_no
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_id, self.page_no)
    }
}

/// Identifies a tuple: the page holding it and its slot within that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: u16,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: u16) -> Self {
        Self { page_id, slot }
    }
}

struct PageState {
    data: Box<[u8; PAGE_SIZE]>,
    /// Snapshot of the page as of the last durable point (load, or the
    /// commit-path flush). Rollback and WAL update records read from here.
    before: Box<[u8; PAGE_SIZE]>,
    /// Transaction that last dirtied this page, if any.
    dirtier: Option<TransactionId>,
}

/// A cached page. The buffer pool is the single owner of the cached copy;
/// callers share it through `Arc` and the interior `RwLock` serializes byte
/// access, while the page-level lock manager serializes logical access.
pub struct Page {
    id: PageId,
    state: RwLock<PageState>,
}

impl Page {
    /// Wraps a page image freshly read from (or appended to) disk. The
    /// before-image starts out identical to the data: the page is clean.
    pub fn new(id: PageId, data: Box<[u8; PAGE_SIZE]>) -> Self {
        let before = data.clone();
        Self {
            id,
            state: RwLock::new(PageState {
                data,
                before,
                dirtier: None,
            }),
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    /// Read access to the raw page bytes.
    pub fn data(&self) -> MappedRwLockReadGuard<'_, [u8; PAGE_SIZE]> {
        RwLockReadGuard::map(self.state.read(), |s| s.data.as_ref())
    }

    /// Write access to the raw page bytes. Callers that mutate through this
    /// guard must also call `mark_dirty`.
    pub fn data_mut(&self) -> MappedRwLockWriteGuard<'_, [u8; PAGE_SIZE]> {
        RwLockWriteGuard::map(self.state.write(), |s| s.data.as_mut())
    }

    /// Copy of the current page bytes.
    pub fn snapshot(&self) -> Box<[u8; PAGE_SIZE]> {
        self.state.read().data.clone()
    }

    /// Copy of the retained before-image.
    pub fn before_image(&self) -> Box<[u8; PAGE_SIZE]> {
        self.state.read().before.clone()
    }

    /// Refreshes the before-image to the current bytes. Called once a
    /// transaction's effects on this page have become durable at commit.
    pub fn set_before_image(&self) {
        let mut state = self.state.write();
        state.before = state.data.clone();
    }

    pub fn mark_dirty(&self, tid: TransactionId) {
        self.state.write().dirtier = Some(tid);
    }

    pub fn mark_clean(&self) {
        self.state.write().dirtier = None;
    }

    pub fn dirtier(&self) -> Option<TransactionId> {
        self.state.read().dirtier
    }

    pub fn is_dirty(&self) -> bool {
        self.state.read().dirtier.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_id_accessors() {
        let pid = PageId::new(7, 3);
        assert_eq!(pid.table_id(), 7);
        assert_eq!(pid.page_no(), 3);
        assert_eq!(format!("{}", pid), "7:3");
    }

    #[test]
    fn test_new_page_is_clean() {
        let page = Page::new(PageId::new(1, 0), Box::new([0u8; PAGE_SIZE]));
        assert!(!page.is_dirty());
        assert_eq!(page.dirtier(), None);
    }

    #[test]
    fn test_before_image_tracks_durable_state() {
        let page = Page::new(PageId::new(1, 0), Box::new([0u8; PAGE_SIZE]));
        let tid = TransactionId::new(1);

        page.data_mut()[0] = 42;
        page.mark_dirty(tid);

        // Before-image still shows the load-time state.
        assert_eq!(page.before_image()[0], 0);
        assert_eq!(page.snapshot()[0], 42);
        assert_eq!(page.dirtier(), Some(tid));

        page.mark_clean();
        page.set_before_image();
        assert_eq!(page.before_image()[0], 42);
        assert!(!page.is_dirty());
    }
}
