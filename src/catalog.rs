//! Table registry: maps table ids to their heap files.

use crate::storage::disk::HeapFile;
use crate::storage::error::{StorageError, StorageResult};
use dashmap::DashMap;
use std::sync::Arc;

/// Maps table ids to the heap files that store them. The buffer pool and
/// the log go through the catalog whenever a page id has to be resolved
/// back to the file it lives in.
pub struct Catalog {
    tables: DashMap<u32, Arc<HeapFile>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
        }
    }

    /// Registers a heap file under its table id, replacing any previous
    /// registration for that id.
    pub fn register_table(&self, file: Arc<HeapFile>) {
        self.tables.insert(file.table_id(), file);
    }

    pub fn get_table(&self, table_id: u32) -> StorageResult<Arc<HeapFile>> {
        self.tables
            .get(&table_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(StorageError::UnknownTable(table_id))
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_register_and_get() -> StorageResult<()> {
        let dir = tempdir()?;
        let catalog = Catalog::new();
        let file = Arc::new(HeapFile::open(&dir.path().join("t.tbl"), 42)?);
        catalog.register_table(Arc::clone(&file));

        let found = catalog.get_table(42)?;
        assert_eq!(found.table_id(), 42);
        Ok(())
    }

    #[test]
    fn test_unknown_table() {
        let catalog = Catalog::new();
        assert!(matches!(
            catalog.get_table(9),
            Err(StorageError::UnknownTable(9))
        ));
    }
}
