//! The write-ahead log file: append paths, rollback, checkpointing with
//! truncation, and crash recovery.
//!
//! File layout: bytes `0..8` hold the offset of the most recent checkpoint
//! record (`-1` when none exists), and records follow back to back from
//! byte 8. Each record's trailing start offset links the log backward.
//!
//! Locking: the log's own mutex is the innermost lock in the system. The
//! operations that touch the page cache (`log_abort`, `recover`) take an
//! already-locked cache handle from the buffer pool, so the cache mutex is
//! always acquired first and a log-then-cache cycle cannot form.

use crate::catalog::Catalog;
use crate::storage::buffer::PageCache;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::wal::record::{LogRecord, PageImage, LOG_HEADER_SIZE, NO_CHECKPOINT};
use crate::transaction::TransactionId;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

struct LogInner {
    file: File,
    path: PathBuf,
    /// Offset appends go to; always the end of the last complete record.
    current_offset: u64,
    /// Offset of the BEGIN record for every live transaction.
    first_record: HashMap<TransactionId, u64>,
    /// True when the file was opened with existing content and neither
    /// `recover` nor an append has run yet. The first append without a
    /// recovery resets the log: the caller has declared the old log moot.
    recovery_undecided: bool,
}

pub struct LogFile {
    inner: Mutex<LogInner>,
}

impl LogFile {
    /// Opens (or creates) the log at `path`. Existing content is left
    /// untouched so the caller can still run recovery over it.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();

        let (current_offset, recovery_undecided) = if len == 0 {
            file.write_i64::<LittleEndian>(NO_CHECKPOINT)?;
            file.sync_all()?;
            (LOG_HEADER_SIZE, false)
        } else {
            (len, true)
        };

        Ok(Self {
            inner: Mutex::new(LogInner {
                file,
                path: path.to_path_buf(),
                current_offset,
                first_record: HashMap::new(),
                recovery_undecided,
            }),
        })
    }

    /// Appends a BEGIN record. Fails if `tid` already has one.
    pub fn log_begin(&self, tid: TransactionId) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        Self::pre_append(&mut inner)?;
        if inner.first_record.contains_key(&tid) {
            return Err(StorageError::TransactionAlreadyBegan(tid));
        }
        let start = Self::append(&mut inner, &LogRecord::Begin { tid })?;
        inner.first_record.insert(tid, start);
        debug!("{} began at log offset {}", tid, start);
        Ok(())
    }

    /// Appends an UPDATE record carrying `before` and `after` page images.
    /// Not forced; the flush path forces before any page write.
    pub fn log_update(
        &self,
        tid: TransactionId,
        before: PageImage,
        after: PageImage,
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        Self::pre_append(&mut inner)?;
        Self::append(&mut inner, &LogRecord::Update { tid, before, after })?;
        Ok(())
    }

    /// Appends and forces a COMMIT record, then forgets the transaction.
    /// Committing a transaction with no BEGIN record is a no-op apart from
    /// the record itself.
    pub fn log_commit(&self, tid: TransactionId) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        Self::pre_append(&mut inner)?;
        Self::append(&mut inner, &LogRecord::Commit { tid })?;
        inner.file.sync_all()?;
        inner.first_record.remove(&tid);
        debug!("{} committed", tid);
        Ok(())
    }

    /// Rolls `tid` back (restoring before-images on disk and dropping the
    /// affected pages from `cache`), then appends and forces an ABORT
    /// record. The transaction must be live.
    pub fn log_abort(
        &self,
        tid: TransactionId,
        catalog: &Catalog,
        cache: &mut PageCache,
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        Self::pre_append(&mut inner)?;
        let begin = *inner
            .first_record
            .get(&tid)
            .ok_or(StorageError::TransactionNotLive(tid))?;
        let end = inner.current_offset;
        Self::undo_between(&mut inner.file, catalog, cache, tid, begin, end)?;
        Self::append(&mut inner, &LogRecord::Abort { tid })?;
        inner.file.sync_all()?;
        inner.first_record.remove(&tid);
        debug!("{} aborted", tid);
        Ok(())
    }

    /// Forces all appended records to stable storage.
    pub fn force(&self) -> StorageResult<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    /// Appends a checkpoint record naming the live transactions, points the
    /// file header at it, and truncates the now-unreachable prefix. The
    /// caller must have flushed all dirty pages first; records before the
    /// minimum of the checkpoint and the live transactions' BEGIN offsets
    /// are dropped.
    pub fn write_checkpoint(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        Self::pre_append(&mut inner)?;

        let active: Vec<(TransactionId, u64)> =
            inner.first_record.iter().map(|(t, o)| (*t, *o)).collect();
        let cp = Self::append(&mut inner, &LogRecord::Checkpoint { active })?;
        inner.file.sync_all()?;

        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_i64::<LittleEndian>(cp as i64)?;
        inner.file.sync_all()?;
        info!(
            "checkpoint at offset {}, {} live transaction(s)",
            cp,
            inner.first_record.len()
        );

        Self::truncate(&mut inner, cp)
    }

    /// Replays the log against the heap files: redo every update since the
    /// last checkpoint, then undo the transactions that never committed.
    /// Safe to call on a fresh or empty log. Returns the highest transaction
    /// id seen so the caller can keep new ids from colliding with logged
    /// ones.
    pub fn recover(&self, catalog: &Catalog, cache: &mut PageCache) -> StorageResult<u64> {
        let mut inner = self.inner.lock();
        inner.recovery_undecided = false;
        inner.first_record.clear();
        let mut max_tid = 0u64;

        let len = inner.file.metadata()?.len();
        if len < LOG_HEADER_SIZE {
            // Torn header; start over with an empty log.
            inner.file.set_len(0)?;
            inner.file.seek(SeekFrom::Start(0))?;
            inner.file.write_i64::<LittleEndian>(NO_CHECKPOINT)?;
            inner.file.sync_all()?;
            inner.current_offset = LOG_HEADER_SIZE;
            return Ok(max_tid);
        }
        inner.current_offset = len;

        inner.file.seek(SeekFrom::Start(0))?;
        let cp = inner.file.read_i64::<LittleEndian>()?;

        // Active transaction table: tid -> offset of its BEGIN record.
        let mut active: HashMap<TransactionId, u64> = HashMap::new();

        let mut pos = if cp == NO_CHECKPOINT {
            LOG_HEADER_SIZE
        } else {
            let cp = cp as u64;
            inner.file.seek(SeekFrom::Start(cp))?;
            let (record, start) = LogRecord::read_from(&mut inner.file)?;
            if start != cp {
                return Err(StorageError::CorruptLog(format!(
                    "checkpoint at {} carries start offset {}",
                    cp, start
                )));
            }
            let next = cp + record.encoded_len();
            match record {
                LogRecord::Checkpoint { active: list } => {
                    for (tid, first) in list {
                        max_tid = max_tid.max(tid.value());
                        active.insert(tid, first);
                    }
                }
                _ => {
                    return Err(StorageError::CorruptLog(format!(
                        "header points at offset {} but no checkpoint record lives there",
                        cp
                    )));
                }
            }
            next
        };

        // Redo: reapply every update since the checkpoint, tracking which
        // transactions are still unresolved. An ABORT is folded in on the
        // spot by rolling its transaction back.
        while pos < len {
            inner.file.seek(SeekFrom::Start(pos))?;
            let (record, start) = LogRecord::read_from(&mut inner.file)?;
            if start != pos {
                return Err(StorageError::CorruptLog(format!(
                    "record at {} carries start offset {}",
                    pos, start
                )));
            }
            let next = pos + record.encoded_len();
            if let Some(tid) = record.tid() {
                max_tid = max_tid.max(tid.value());
            }
            match record {
                LogRecord::Begin { tid } => {
                    active.insert(tid, pos);
                }
                LogRecord::Update { after, .. } => {
                    let table = catalog.get_table(after.pid.table_id())?;
                    table.write_page(after.pid, &after.data)?;
                    cache.remove(after.pid);
                }
                LogRecord::Commit { tid } => {
                    active.remove(&tid);
                }
                LogRecord::Abort { tid } => {
                    let begin = active.remove(&tid).ok_or_else(|| {
                        StorageError::CorruptLog(format!("abort for unknown transaction {}", tid))
                    })?;
                    Self::undo_between(&mut inner.file, catalog, cache, tid, begin, pos)?;
                }
                LogRecord::Checkpoint { .. } => {}
            }
            pos = next;
        }

        // Undo: roll back everything that never resolved.
        for (tid, begin) in active {
            info!("recovery rolling back {}", tid);
            Self::undo_between(&mut inner.file, catalog, cache, tid, begin, len)?;
        }
        Ok(max_tid)
    }

    /// Wipes the log if it was opened over stale content and no recovery
    /// was requested before the first append.
    fn pre_append(inner: &mut LogInner) -> StorageResult<()> {
        if inner.recovery_undecided {
            inner.recovery_undecided = false;
            inner.file.set_len(0)?;
            inner.file.seek(SeekFrom::Start(0))?;
            inner.file.write_i64::<LittleEndian>(NO_CHECKPOINT)?;
            inner.file.sync_all()?;
            inner.current_offset = LOG_HEADER_SIZE;
            inner.first_record.clear();
        }
        Ok(())
    }

    /// Appends one record (body plus trailing start offset) at the current
    /// end of the log. Returns the record's start offset. Does not force.
    fn append(inner: &mut LogInner, record: &LogRecord) -> StorageResult<u64> {
        let start = inner.current_offset;
        inner.file.seek(SeekFrom::Start(start))?;
        record.write_body(&mut inner.file)?;
        inner.file.write_i64::<LittleEndian>(start as i64)?;
        inner.current_offset = start + record.encoded_len();
        Ok(start)
    }

    /// Walks the log backward from `end` to `begin` via the trailing start
    /// offsets, restoring the before-image of every page `tid` updated and
    /// evicting it from the cache.
    fn undo_between(
        file: &mut File,
        catalog: &Catalog,
        cache: &mut PageCache,
        tid: TransactionId,
        begin: u64,
        end: u64,
    ) -> StorageResult<()> {
        let mut pos = end;
        while pos > begin {
            file.seek(SeekFrom::Start(pos - 8))?;
            let start = file.read_i64::<LittleEndian>()? as u64;
            if start >= pos || start < LOG_HEADER_SIZE {
                return Err(StorageError::CorruptLog(format!(
                    "backward link at {} points to {}",
                    pos, start
                )));
            }
            file.seek(SeekFrom::Start(start))?;
            let (record, _) = LogRecord::read_from(file)?;
            if let LogRecord::Update {
                tid: rec_tid,
                before,
                ..
            } = record
            {
                if rec_tid == tid {
                    let table = catalog.get_table(before.pid.table_id())?;
                    table.write_page(before.pid, &before.data)?;
                    cache.remove(before.pid);
                }
            }
            pos = start;
        }
        Ok(())
    }

    /// Drops the log prefix that recovery can never reach: everything
    /// before the older of the checkpoint at `cp` and the earliest live
    /// BEGIN record. Surviving records are rewritten into a temporary file
    /// with their offsets shifted, which then replaces the log atomically.
    fn truncate(inner: &mut LogInner, cp: u64) -> StorageResult<()> {
        let min = inner
            .first_record
            .values()
            .copied()
            .fold(cp, u64::min);
        if min == LOG_HEADER_SIZE {
            return Ok(());
        }
        let delta = min - LOG_HEADER_SIZE;
        let end = inner.current_offset;

        let tmp_path = {
            let mut name = inner.path.as_os_str().to_owned();
            name.push(".tmp");
            PathBuf::from(name)
        };
        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_i64::<LittleEndian>((cp - delta) as i64)?;

        let mut pos = min;
        inner.file.seek(SeekFrom::Start(min))?;
        while pos < end {
            let (record, start) = LogRecord::read_from(&mut inner.file)?;
            if start != pos {
                return Err(StorageError::CorruptLog(format!(
                    "record at {} carries start offset {}",
                    pos, start
                )));
            }
            let rewritten = match record {
                // Offsets inside a checkpoint's active list shift with the
                // records they point at. An entry pointing into the dropped
                // prefix belongs to a transaction that has since resolved;
                // recovery only ever reads the newest checkpoint, so the
                // stale offset is left as is.
                LogRecord::Checkpoint { active } => LogRecord::Checkpoint {
                    active: active
                        .into_iter()
                        .map(|(tid, first)| {
                            if first >= min {
                                (tid, first - delta)
                            } else {
                                (tid, first)
                            }
                        })
                        .collect(),
                },
                other => other,
            };
            rewritten.write_body(&mut tmp)?;
            tmp.write_i64::<LittleEndian>((pos - delta) as i64)?;
            pos += rewritten.encoded_len();
        }
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &inner.path)?;
        inner.file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&inner.path)?;
        inner.file.sync_all()?;
        inner.current_offset = end - delta;
        for first in inner.first_record.values_mut() {
            *first -= delta;
        }
        debug!("log truncated: dropped {} byte(s)", delta);
        Ok(())
    }
}
