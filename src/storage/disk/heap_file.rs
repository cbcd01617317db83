//! Per-table page store backed by a flat file of fixed-size pages.

use crate::storage::buffer::{BufferPool, Permissions};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::heap_page::HeapPage;
use crate::storage::page::{Page, PageId, RecordId, PAGE_SIZE};
use crate::transaction::TransactionId;
use log::debug;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

/// A heap file: page `n` occupies bytes `[n*4096, (n+1)*4096)` of the
/// backing file. Tuple-level operations go through the buffer pool so the
/// pages they touch are locked and cached like any other access.
pub struct HeapFile {
    table_id: u32,
    file: Mutex<File>,
}

impl HeapFile {
    /// Opens the backing file, creating it if it does not exist yet.
    pub fn open(path: &Path, table_id: u32) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self {
            table_id,
            file: Mutex::new(file),
        })
    }

    pub fn table_id(&self) -> u32 {
        self.table_id
    }

    /// Reads a page image from disk. Fails if the page number is at or past
    /// the file's page count.
    pub fn read_page(&self, pid: PageId) -> StorageResult<Page> {
        let mut file = self.file.lock();
        let page_count = Self::page_count_locked(&file)?;
        if pid.page_no() >= page_count {
            return Err(StorageError::PageNotFound(pid));
        }

        let mut data = Box::new([0u8; PAGE_SIZE]);
        file.seek(SeekFrom::Start(Self::page_offset(pid.page_no())))?;
        file.read_exact(data.as_mut())?;
        Ok(Page::new(pid, data))
    }

    /// Random-access overwrite of a page image, synced to disk.
    pub fn write_page(&self, pid: PageId, data: &[u8; PAGE_SIZE]) -> StorageResult<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::page_offset(pid.page_no())))?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    }

    /// Number of pages in the backing file (file length / page size).
    pub fn page_count(&self) -> StorageResult<u32> {
        Self::page_count_locked(&self.file.lock())
    }

    /// Inserts a tuple, scanning existing pages for a free slot and
    /// appending a fresh page when none has room. Returns the new tuple's
    /// record id and the affected pages; the caller (the buffer pool)
    /// marks them dirty and installs them in the cache.
    pub fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &[u8],
    ) -> StorageResult<(RecordId, Vec<Arc<Page>>)> {
        let page_count = self.page_count()?;
        for page_no in 0..page_count {
            let pid = PageId::new(self.table_id, page_no);
            let page = pool.get_page(tid, pid, Permissions::ReadWrite)?;
            let mut data = page.data_mut();
            let mut view = HeapPage::from_bytes(&mut data);
            if view.has_room_for(tuple.len()) {
                let slot = view.insert_tuple(tuple)?;
                drop(data);
                return Ok((RecordId::new(pid, slot), vec![page]));
            }
        }

        // No existing page has room: grow the file by one well-formed empty
        // page, then insert through the cache so the new page is locked and
        // logged like any other.
        let pid = self.append_empty_page()?;
        debug!("heap file {}: appended page {}", self.table_id, pid);
        let page = pool.get_page(tid, pid, Permissions::ReadWrite)?;
        let slot = {
            let mut data = page.data_mut();
            let mut view = HeapPage::from_bytes(&mut data);
            view.insert_tuple(tuple)?
        };
        Ok((RecordId::new(pid, slot), vec![page]))
    }

    /// Deletes the tuple named by `rid`. Returns the affected page.
    pub fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        rid: RecordId,
    ) -> StorageResult<Arc<Page>> {
        if rid.page_id.table_id() != self.table_id {
            return Err(StorageError::WrongTable {
                expected: self.table_id,
                actual: rid.page_id.table_id(),
            });
        }

        let page = pool.get_page(tid, rid.page_id, Permissions::ReadWrite)?;
        {
            let mut data = page.data_mut();
            let mut view = HeapPage::from_bytes(&mut data);
            view.delete_tuple(rid.slot)?;
        }
        Ok(page)
    }

    /// Appends one empty page to the backing file and returns its id. The
    /// write is a full, synced page image; the file never contains a
    /// partially written page.
    fn append_empty_page(&self) -> StorageResult<PageId> {
        let mut file = self.file.lock();
        let page_no = Self::page_count_locked(&file)?;
        let pid = PageId::new(self.table_id, page_no);

        let mut data = Box::new([0u8; PAGE_SIZE]);
        HeapPage::init(&mut data, pid);

        file.seek(SeekFrom::Start(Self::page_offset(page_no)))?;
        file.write_all(data.as_ref())?;
        file.sync_all()?;
        Ok(pid)
    }

    fn page_count_locked(file: &File) -> StorageResult<u32> {
        let len = file.metadata()?.len();
        Ok((len / PAGE_SIZE as u64) as u32)
    }

    fn page_offset(page_no: u32) -> u64 {
        page_no as u64 * PAGE_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_and_page_count() -> StorageResult<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.tbl");

        {
            let hf = HeapFile::open(&path, 1)?;
            assert_eq!(hf.page_count()?, 0);
        }
        {
            // Reopening an existing file must not truncate it.
            let hf = HeapFile::open(&path, 1)?;
            assert_eq!(hf.page_count()?, 0);
        }
        Ok(())
    }

    #[test]
    fn test_write_and_read_page() -> StorageResult<()> {
        let dir = tempdir()?;
        let hf = HeapFile::open(&dir.path().join("t.tbl"), 1)?;

        let pid = hf.append_empty_page()?;
        assert_eq!(pid, PageId::new(1, 0));
        assert_eq!(hf.page_count()?, 1);

        let mut data = Box::new([0u8; PAGE_SIZE]);
        HeapPage::init(&mut data, pid);
        data[PAGE_SIZE - 1] = 24;
        hf.write_page(pid, &data)?;

        let page = hf.read_page(pid)?;
        assert_eq!(page.data()[PAGE_SIZE - 1], 24);
        assert!(!page.is_dirty());
        Ok(())
    }

    #[test]
    fn test_read_nonexistent_page() -> StorageResult<()> {
        let dir = tempdir()?;
        let hf = HeapFile::open(&dir.path().join("t.tbl"), 1)?;

        let result = hf.read_page(PageId::new(1, 10));
        assert!(matches!(result, Err(StorageError::PageNotFound(_))));
        Ok(())
    }

    #[test]
    fn test_appended_page_is_empty() -> StorageResult<()> {
        let dir = tempdir()?;
        let hf = HeapFile::open(&dir.path().join("t.tbl"), 3)?;

        let pid = hf.append_empty_page()?;
        let page = hf.read_page(pid)?;
        let mut data = page.data_mut();
        let view = HeapPage::from_bytes(&mut data);
        assert_eq!(view.page_id(), pid);
        assert_eq!(view.tuple_count(), 0);
        Ok(())
    }

    #[test]
    fn test_page_boundary() -> StorageResult<()> {
        let dir = tempdir()?;
        let hf = HeapFile::open(&dir.path().join("t.tbl"), 1)?;

        let pid0 = hf.append_empty_page()?;
        let pid1 = hf.append_empty_page()?;

        let mut d0 = Box::new([0u8; PAGE_SIZE]);
        HeapPage::init(&mut d0, pid0);
        d0[PAGE_SIZE - 1] = 1;
        let mut d1 = Box::new([0u8; PAGE_SIZE]);
        HeapPage::init(&mut d1, pid1);
        d1[PAGE_SIZE - 1] = 2;

        hf.write_page(pid0, &d0)?;
        hf.write_page(pid1, &d1)?;

        assert_eq!(hf.read_page(pid0)?.data()[PAGE_SIZE - 1], 1);
        assert_eq!(hf.read_page(pid1)?.data()[PAGE_SIZE - 1], 2);
        Ok(())
    }
}
