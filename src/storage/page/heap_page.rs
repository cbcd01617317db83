//! Slotted page codec for heap tuples.
//!
//! Layout: a fixed header, tuple bytes growing forward from the header, and
//! a slot array (offset, length pairs) growing backward from the end of the
//! page. A deleted tuple leaves its slot zeroed; slots are never reused so
//! `RecordId`s stay stable for the lifetime of the page.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{PageId, PAGE_SIZE};

// Header structure (16 bytes)
const HEADER_SIZE: usize = 16;
const TABLE_ID_OFFSET: usize = 0;
const PAGE_NO_OFFSET: usize = 4;
const FREE_SPACE_POINTER_OFFSET: usize = 8;
const TUPLE_COUNT_OFFSET: usize = 10;

// Slot size (4 bytes: 2 for offset, 2 for length)
pub const SLOT_SIZE: usize = 4;

pub struct HeapPage<'a> {
    data: &'a mut [u8; PAGE_SIZE],
}

impl<'a> HeapPage<'a> {
    /// Initializes `data` as an empty page. This is the well-defined "empty"
    /// image a freshly appended page carries before any tuple lands in it.
    pub fn init(data: &'a mut [u8; PAGE_SIZE], page_id: PageId) -> Self {
        data.fill(0);
        data[TABLE_ID_OFFSET..TABLE_ID_OFFSET + 4]
            .copy_from_slice(&page_id.table_id().to_le_bytes());
        data[PAGE_NO_OFFSET..PAGE_NO_OFFSET + 4]
            .copy_from_slice(&page_id.page_no().to_le_bytes());

        let mut page = Self { data };
        page.set_free_space_pointer(HEADER_SIZE as u16);
        page.set_tuple_count(0);
        page
    }

    /// Wraps an existing page image.
    pub fn from_bytes(data: &'a mut [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }

    pub fn insert_tuple(&mut self, tuple: &[u8]) -> StorageResult<u16> {
        let required = tuple.len() + SLOT_SIZE;
        let available = self.free_space();
        if available < required {
            return Err(StorageError::PageFull {
                required,
                available,
            });
        }

        let tuple_count = self.tuple_count();
        let tuple_offset = self.free_space_pointer();
        self.data[tuple_offset as usize..tuple_offset as usize + tuple.len()]
            .copy_from_slice(tuple);
        self.set_free_space_pointer(tuple_offset + tuple.len() as u16);

        let slot_offset = PAGE_SIZE - (tuple_count as usize + 1) * SLOT_SIZE;
        self.data[slot_offset..slot_offset + 2].copy_from_slice(&tuple_offset.to_le_bytes());
        self.data[slot_offset + 2..slot_offset + 4]
            .copy_from_slice(&(tuple.len() as u16).to_le_bytes());

        self.set_tuple_count(tuple_count + 1);
        Ok(tuple_count)
    }

    pub fn tuple(&self, slot: u16) -> StorageResult<&[u8]> {
        let count = self.tuple_count();
        if slot >= count {
            return Err(StorageError::InvalidSlot { slot, count });
        }

        let slot_offset = PAGE_SIZE - (slot as usize + 1) * SLOT_SIZE;
        let offset = u16::from_le_bytes([self.data[slot_offset], self.data[slot_offset + 1]]);
        let length = u16::from_le_bytes([self.data[slot_offset + 2], self.data[slot_offset + 3]]);

        if offset == 0 && length == 0 {
            return Err(StorageError::TupleDeleted(slot));
        }

        Ok(&self.data[offset as usize..(offset + length) as usize])
    }

    pub fn delete_tuple(&mut self, slot: u16) -> StorageResult<()> {
        let count = self.tuple_count();
        if slot >= count {
            return Err(StorageError::InvalidSlot { slot, count });
        }

        // Mark slot as deleted (offset = 0, length = 0). The tuple bytes are
        // reclaimed only when the whole page is rewritten.
        let slot_offset = PAGE_SIZE - (slot as usize + 1) * SLOT_SIZE;
        self.data[slot_offset..slot_offset + 4].fill(0);
        Ok(())
    }

    pub fn has_room_for(&self, tuple_len: usize) -> bool {
        self.free_space() >= tuple_len + SLOT_SIZE
    }

    pub fn free_space(&self) -> usize {
        let slot_array_start = PAGE_SIZE - self.tuple_count() as usize * SLOT_SIZE;
        slot_array_start.saturating_sub(self.free_space_pointer() as usize)
    }

    pub fn page_id(&self) -> PageId {
        let table_id = u32::from_le_bytes(
            self.data[TABLE_ID_OFFSET..TABLE_ID_OFFSET + 4]
                .try_into()
                .unwrap(),
        );
        let page_no = u32::from_le_bytes(
            self.data[PAGE_NO_OFFSET..PAGE_NO_OFFSET + 4]
                .try_into()
                .unwrap(),
        );
        PageId::new(table_id, page_no)
    }

    pub fn tuple_count(&self) -> u16 {
        u16::from_le_bytes([
            self.data[TUPLE_COUNT_OFFSET],
            self.data[TUPLE_COUNT_OFFSET + 1],
        ])
    }

    fn free_space_pointer(&self) -> u16 {
        u16::from_le_bytes([
            self.data[FREE_SPACE_POINTER_OFFSET],
            self.data[FREE_SPACE_POINTER_OFFSET + 1],
        ])
    }

    fn set_free_space_pointer(&mut self, pointer: u16) {
        self.data[FREE_SPACE_POINTER_OFFSET..FREE_SPACE_POINTER_OFFSET + 2]
            .copy_from_slice(&pointer.to_le_bytes());
    }

    fn set_tuple_count(&mut self, count: u16) {
        self.data[TUPLE_COUNT_OFFSET..TUPLE_COUNT_OFFSET + 2]
            .copy_from_slice(&count.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_empty_page() {
        let mut data = Box::new([0xFFu8; PAGE_SIZE]);
        let pid = PageId::new(9, 4);
        let page = HeapPage::init(&mut data, pid);

        assert_eq!(page.page_id(), pid);
        assert_eq!(page.tuple_count(), 0);
        assert_eq!(page.free_space(), PAGE_SIZE - HEADER_SIZE);
    }

    #[test]
    fn test_insert_and_get_tuple() -> StorageResult<()> {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        let mut page = HeapPage::init(&mut data, PageId::new(1, 0));

        let slot0 = page.insert_tuple(b"Hello, World!")?;
        let slot1 = page.insert_tuple(b"Second tuple")?;
        assert_eq!(slot0, 0);
        assert_eq!(slot1, 1);

        assert_eq!(page.tuple(slot0)?, b"Hello, World!");
        assert_eq!(page.tuple(slot1)?, b"Second tuple");
        assert_eq!(page.tuple_count(), 2);
        Ok(())
    }

    #[test]
    fn test_delete_tuple() -> StorageResult<()> {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        let mut page = HeapPage::init(&mut data, PageId::new(1, 0));

        let slot = page.insert_tuple(b"doomed")?;
        page.delete_tuple(slot)?;

        assert!(matches!(
            page.tuple(slot),
            Err(StorageError::TupleDeleted(_))
        ));
        Ok(())
    }

    #[test]
    fn test_page_full() -> StorageResult<()> {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        let mut page = HeapPage::init(&mut data, PageId::new(1, 0));

        let tuple = vec![0xAA; 1000];
        let mut count = 0;
        while page.has_room_for(tuple.len()) {
            page.insert_tuple(&tuple)?;
            count += 1;
        }
        assert!(count > 0);

        assert!(matches!(
            page.insert_tuple(&tuple),
            Err(StorageError::PageFull { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_invalid_slot() {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        let page = HeapPage::init(&mut data, PageId::new(1, 0));

        assert!(matches!(
            page.tuple(0),
            Err(StorageError::InvalidSlot { .. })
        ));
    }

    #[test]
    fn test_from_existing_bytes() -> StorageResult<()> {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        {
            let mut page = HeapPage::init(&mut data, PageId::new(5, 2));
            page.insert_tuple(b"persistent")?;
        }
        {
            let page = HeapPage::from_bytes(&mut data);
            assert_eq!(page.page_id(), PageId::new(5, 2));
            assert_eq!(page.tuple_count(), 1);
            assert_eq!(page.tuple(0)?, b"persistent");
        }
        Ok(())
    }
}
