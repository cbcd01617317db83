//! Wire format of write-ahead log records.
//!
//! Every record is laid out as `[i32 type] [i64 tid] [payload] [i64 start]`
//! where `start` is the file offset the record begins at. The trailing start
//! offset is what makes the log walkable backward: seek to the end, read the
//! last 8 bytes, and jump to the record head. All integers are
//! little-endian.
//!
//! An UPDATE payload carries the full before- and after-image of one page.
//! Page images are self-describing: a page-type tag and a page-id-type tag
//! name the codecs that wrote them, so a reader can reject a log written by
//! an incompatible build instead of misinterpreting it. New page or id
//! kinds get a tag and a match arm here.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{PageId, PAGE_SIZE};
use crate::transaction::TransactionId;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

pub const ABORT_RECORD: i32 = 1;
pub const COMMIT_RECORD: i32 = 2;
pub const UPDATE_RECORD: i32 = 3;
pub const BEGIN_RECORD: i32 = 4;
pub const CHECKPOINT_RECORD: i32 = 5;

/// Value of the checkpoint pointer at byte 0 when no checkpoint exists.
pub const NO_CHECKPOINT: i64 = -1;

/// The checkpoint pointer occupies the first 8 bytes of the log file;
/// records start right after it.
pub const LOG_HEADER_SIZE: u64 = 8;

/// Checkpoint records carry no transaction of their own.
const CHECKPOINT_TID: i64 = -1;

// Registered page codecs.
const HEAP_PAGE_TAG: u32 = 1;
const HEAP_PAGE_ID_TAG: u32 = 1;
const HEAP_PAGE_ID_FIELDS: u32 = 2;

/// A full page image as serialized into UPDATE records.
#[derive(Clone)]
pub struct PageImage {
    pub pid: PageId,
    pub data: Box<[u8; PAGE_SIZE]>,
}

impl PageImage {
    pub fn write_to<W: Write>(&self, w: &mut W) -> StorageResult<()> {
        w.write_u32::<LittleEndian>(HEAP_PAGE_TAG)?;
        w.write_u32::<LittleEndian>(HEAP_PAGE_ID_TAG)?;
        w.write_u32::<LittleEndian>(HEAP_PAGE_ID_FIELDS)?;
        w.write_i32::<LittleEndian>(self.pid.table_id() as i32)?;
        w.write_i32::<LittleEndian>(self.pid.page_no() as i32)?;
        w.write_u32::<LittleEndian>(PAGE_SIZE as u32)?;
        w.write_all(self.data.as_ref())?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> StorageResult<Self> {
        let page_tag = r.read_u32::<LittleEndian>()?;
        if page_tag != HEAP_PAGE_TAG {
            return Err(StorageError::CorruptLog(format!(
                "unknown page type tag {}",
                page_tag
            )));
        }
        let id_tag = r.read_u32::<LittleEndian>()?;
        if id_tag != HEAP_PAGE_ID_TAG {
            return Err(StorageError::CorruptLog(format!(
                "unknown page id type tag {}",
                id_tag
            )));
        }
        let fields = r.read_u32::<LittleEndian>()?;
        if fields != HEAP_PAGE_ID_FIELDS {
            return Err(StorageError::CorruptLog(format!(
                "heap page id has {} fields, expected {}",
                fields, HEAP_PAGE_ID_FIELDS
            )));
        }
        let table_id = r.read_i32::<LittleEndian>()? as u32;
        let page_no = r.read_i32::<LittleEndian>()? as u32;
        let len = r.read_u32::<LittleEndian>()? as usize;
        if len != PAGE_SIZE {
            return Err(StorageError::CorruptLog(format!(
                "page image is {} bytes, expected {}",
                len, PAGE_SIZE
            )));
        }
        let mut data = Box::new([0u8; PAGE_SIZE]);
        r.read_exact(data.as_mut())?;
        Ok(Self {
            pid: PageId::new(table_id, page_no),
            data,
        })
    }

    /// Serialized size of one page image.
    pub fn encoded_len() -> u64 {
        4 + 4 + 4 + 4 + 4 + 4 + PAGE_SIZE as u64
    }
}

pub enum LogRecord {
    Begin {
        tid: TransactionId,
    },
    Commit {
        tid: TransactionId,
    },
    Abort {
        tid: TransactionId,
    },
    Update {
        tid: TransactionId,
        before: PageImage,
        after: PageImage,
    },
    /// Active-transaction table at the time the checkpoint was taken: each
    /// entry pairs a live transaction with the offset of its BEGIN record.
    Checkpoint {
        active: Vec<(TransactionId, u64)>,
    },
}

impl LogRecord {
    /// Writes `[type][tid][payload]`. The caller appends the trailing start
    /// offset, which only it knows.
    pub fn write_body<W: Write>(&self, w: &mut W) -> StorageResult<()> {
        match self {
            LogRecord::Begin { tid } => {
                w.write_i32::<LittleEndian>(BEGIN_RECORD)?;
                w.write_i64::<LittleEndian>(tid.value() as i64)?;
            }
            LogRecord::Commit { tid } => {
                w.write_i32::<LittleEndian>(COMMIT_RECORD)?;
                w.write_i64::<LittleEndian>(tid.value() as i64)?;
            }
            LogRecord::Abort { tid } => {
                w.write_i32::<LittleEndian>(ABORT_RECORD)?;
                w.write_i64::<LittleEndian>(tid.value() as i64)?;
            }
            LogRecord::Update { tid, before, after } => {
                w.write_i32::<LittleEndian>(UPDATE_RECORD)?;
                w.write_i64::<LittleEndian>(tid.value() as i64)?;
                before.write_to(w)?;
                after.write_to(w)?;
            }
            LogRecord::Checkpoint { active } => {
                w.write_i32::<LittleEndian>(CHECKPOINT_RECORD)?;
                w.write_i64::<LittleEndian>(CHECKPOINT_TID)?;
                w.write_i32::<LittleEndian>(active.len() as i32)?;
                for (tid, first) in active {
                    w.write_i64::<LittleEndian>(tid.value() as i64)?;
                    w.write_i64::<LittleEndian>(*first as i64)?;
                }
            }
        }
        Ok(())
    }

    /// Reads `[type][tid][payload][start]` with the reader positioned at the
    /// record head, returning the record and its trailing start offset.
    pub fn read_from<R: Read>(r: &mut R) -> StorageResult<(Self, u64)> {
        let record_type = r.read_i32::<LittleEndian>()?;
        let tid_raw = r.read_i64::<LittleEndian>()?;
        let record = match record_type {
            BEGIN_RECORD => LogRecord::Begin {
                tid: TransactionId::new(tid_raw as u64),
            },
            COMMIT_RECORD => LogRecord::Commit {
                tid: TransactionId::new(tid_raw as u64),
            },
            ABORT_RECORD => LogRecord::Abort {
                tid: TransactionId::new(tid_raw as u64),
            },
            UPDATE_RECORD => {
                let before = PageImage::read_from(r)?;
                let after = PageImage::read_from(r)?;
                LogRecord::Update {
                    tid: TransactionId::new(tid_raw as u64),
                    before,
                    after,
                }
            }
            CHECKPOINT_RECORD => {
                let count = r.read_i32::<LittleEndian>()?;
                if count < 0 {
                    return Err(StorageError::CorruptLog(format!(
                        "checkpoint claims {} active transactions",
                        count
                    )));
                }
                let mut active = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let tid = TransactionId::new(r.read_i64::<LittleEndian>()? as u64);
                    let first = r.read_i64::<LittleEndian>()? as u64;
                    active.push((tid, first));
                }
                LogRecord::Checkpoint { active }
            }
            other => {
                return Err(StorageError::CorruptLog(format!(
                    "unknown record type {}",
                    other
                )));
            }
        };
        let start = r.read_i64::<LittleEndian>()? as u64;
        Ok((record, start))
    }

    /// Serialized size, trailing start offset included.
    pub fn encoded_len(&self) -> u64 {
        let payload = match self {
            LogRecord::Begin { .. } | LogRecord::Commit { .. } | LogRecord::Abort { .. } => 0,
            LogRecord::Update { .. } => 2 * PageImage::encoded_len(),
            LogRecord::Checkpoint { active } => 4 + 16 * active.len() as u64,
        };
        // type + tid + payload + start offset
        4 + 8 + payload + 8
    }

    pub fn tid(&self) -> Option<TransactionId> {
        match self {
            LogRecord::Begin { tid }
            | LogRecord::Commit { tid }
            | LogRecord::Abort { tid }
            | LogRecord::Update { tid, .. } => Some(*tid),
            LogRecord::Checkpoint { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn image(table_id: u32, page_no: u32, fill: u8) -> PageImage {
        PageImage {
            pid: PageId::new(table_id, page_no),
            data: Box::new([fill; PAGE_SIZE]),
        }
    }

    fn encode(record: &LogRecord, start: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        record.write_body(&mut buf).unwrap();
        buf.extend_from_slice(&(start as i64).to_le_bytes());
        buf
    }

    #[test]
    fn test_update_round_trip() -> StorageResult<()> {
        let record = LogRecord::Update {
            tid: TransactionId::new(3),
            before: image(1, 0, 0x00),
            after: image(1, 0, 0xAB),
        };
        let buf = encode(&record, 8);
        assert_eq!(buf.len() as u64, record.encoded_len());

        let (decoded, start) = LogRecord::read_from(&mut Cursor::new(buf))?;
        assert_eq!(start, 8);
        match decoded {
            LogRecord::Update { tid, before, after } => {
                assert_eq!(tid, TransactionId::new(3));
                assert_eq!(before.pid, PageId::new(1, 0));
                assert_eq!(before.data[100], 0x00);
                assert_eq!(after.data[100], 0xAB);
            }
            _ => panic!("decoded wrong record type"),
        }
        Ok(())
    }

    #[test]
    fn test_checkpoint_round_trip() -> StorageResult<()> {
        let record = LogRecord::Checkpoint {
            active: vec![
                (TransactionId::new(1), 8),
                (TransactionId::new(4), 4200),
            ],
        };
        let buf = encode(&record, 9000);
        assert_eq!(buf.len() as u64, record.encoded_len());

        let (decoded, start) = LogRecord::read_from(&mut Cursor::new(buf))?;
        assert_eq!(start, 9000);
        match decoded {
            LogRecord::Checkpoint { active } => {
                assert_eq!(active.len(), 2);
                assert_eq!(active[1], (TransactionId::new(4), 4200));
            }
            _ => panic!("decoded wrong record type"),
        }
        Ok(())
    }

    #[test]
    fn test_unknown_record_type() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&99i32.to_le_bytes());
        buf.extend_from_slice(&1i64.to_le_bytes());
        buf.extend_from_slice(&8i64.to_le_bytes());

        let result = LogRecord::read_from(&mut Cursor::new(buf));
        assert!(matches!(result, Err(StorageError::CorruptLog(_))));
    }

    #[test]
    fn test_unknown_page_tag() {
        let record = LogRecord::Update {
            tid: TransactionId::new(1),
            before: image(1, 0, 0),
            after: image(1, 0, 1),
        };
        let mut buf = encode(&record, 8);
        // Corrupt the before-image's page type tag.
        buf[12..16].copy_from_slice(&7u32.to_le_bytes());

        let result = LogRecord::read_from(&mut Cursor::new(buf));
        assert!(matches!(result, Err(StorageError::CorruptLog(_))));
    }
}
