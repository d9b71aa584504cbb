//! Redb backend for the persistent L2 tier.
//!
//! ```yaml
//! cache:
//!   backend: "redb"
//!   path: "/var/lib/hybrid-embed/cache.redb"
//! ```

use crate::{CacheBackend, CacheError};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;
use std::sync::Arc;

const EMBEDDING_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("embedding_cache");

/// Persistent key-value store. Redb handles its own locking and MVCC, so the
/// handle is shared freely across blocking tasks.
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open or create the database at `path` and make sure the table exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(CacheError::backend)?;
            }
        }
        let db = Database::create(path).map_err(CacheError::backend)?;

        let write_txn = db.begin_write().map_err(CacheError::backend)?;
        {
            let _table = write_txn
                .open_table(EMBEDDING_TABLE)
                .map_err(CacheError::backend)?;
        }
        write_txn.commit().map_err(CacheError::backend)?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl CacheBackend for RedbBackend {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        let write_txn = self.db.begin_write().map_err(CacheError::backend)?;
        {
            let mut table = write_txn
                .open_table(EMBEDDING_TABLE)
                .map_err(CacheError::backend)?;
            table.insert(key, value).map_err(CacheError::backend)?;
        }
        write_txn.commit().map_err(CacheError::backend)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let read_txn = self.db.begin_read().map_err(CacheError::backend)?;
        let table = read_txn
            .open_table(EMBEDDING_TABLE)
            .map_err(CacheError::backend)?;
        Ok(table
            .get(key)
            .map_err(CacheError::backend)?
            .map(|value| value.value().to_vec()))
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        let write_txn = self.db.begin_write().map_err(CacheError::backend)?;
        {
            let mut table = write_txn
                .open_table(EMBEDDING_TABLE)
                .map_err(CacheError::backend)?;
            table.remove(key).map_err(CacheError::backend)?;
        }
        write_txn.commit().map_err(CacheError::backend)
    }

    fn scan(
        &self,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), CacheError>,
    ) -> Result<(), CacheError> {
        let read_txn = self.db.begin_read().map_err(CacheError::backend)?;
        let table = read_txn
            .open_table(EMBEDDING_TABLE)
            .map_err(CacheError::backend)?;
        for item in table.iter().map_err(CacheError::backend)? {
            let (key, value) = item.map_err(CacheError::backend)?;
            visitor(key.value(), value.value())?;
        }
        Ok(())
    }

    fn len(&self) -> Result<usize, CacheError> {
        let read_txn = self.db.begin_read().map_err(CacheError::backend)?;
        let table = read_txn
            .open_table(EMBEDDING_TABLE)
            .map_err(CacheError::backend)?;
        Ok(table.len().map_err(CacheError::backend)? as usize)
    }

    fn clear(&self) -> Result<(), CacheError> {
        let write_txn = self.db.begin_write().map_err(CacheError::backend)?;
        {
            let mut table = write_txn
                .open_table(EMBEDDING_TABLE)
                .map_err(CacheError::backend)?;
            table.retain(|_, _| false).map_err(CacheError::backend)?;
        }
        write_txn.commit().map_err(CacheError::backend)
    }
}
