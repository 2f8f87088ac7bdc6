//! ACID-durable database handle backed by redb.
//!
//! All writes go through transactions. Reads use MVCC snapshots. The handle
//! is shared between the pattern and graph stores, which define their own
//! tables and open them per operation.

use std::path::Path;
use std::sync::Arc;

use redb::backends::InMemoryBackend;
use redb::{Database, ReadTransaction, WriteTransaction};

use crate::error::StoreError;
use crate::store::{StoreResult, redb_error};

/// Shared ACID-durable store using redb.
#[derive(Clone)]
pub struct DurableStore {
    db: Arc<Database>,
}

impl DurableStore {
    /// Open or create a durable store in the given directory.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db_path = data_dir.join("sia.redb");
        let db = Database::create(&db_path)
            .map_err(|e| redb_error(&format!("open {}", db_path.display()), e))?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Create a store with no persistence. State is lost on drop.
    pub fn in_memory() -> StoreResult<Self> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(|e| redb_error("open in-memory backend", e))?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Begin a write transaction. Dropping it without commit rolls back.
    pub fn begin_write(&self) -> StoreResult<WriteTransaction> {
        self.db.begin_write().map_err(|e| redb_error("begin_write", e))
    }

    /// Begin a read transaction (MVCC snapshot).
    pub fn begin_read(&self) -> StoreResult<ReadTransaction> {
        self.db.begin_read().map_err(|e| redb_error("begin_read", e))
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redb::TableDefinition;
    use tempfile::TempDir;

    const TEST_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("test");

    fn put(store: &DurableStore, key: &str, value: &[u8]) {
        let txn = store.begin_write().unwrap();
        {
            let mut table = txn.open_table(TEST_TABLE).unwrap();
            table.insert(key, value).unwrap();
        }
        txn.commit().unwrap();
    }

    fn get(store: &DurableStore, key: &str) -> Option<Vec<u8>> {
        let txn = store.begin_read().unwrap();
        let table = txn.open_table(TEST_TABLE).unwrap();
        table.get(key).unwrap().map(|g| g.value().to_vec())
    }

    #[test]
    fn put_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = DurableStore::open(dir.path()).unwrap();
        put(&store, "hello", b"world");
        assert_eq!(get(&store, "hello"), Some(b"world".to_vec()));
        assert_eq!(get(&store, "missing"), None);
    }

    #[test]
    fn persistence_across_reopens() {
        let dir = TempDir::new().unwrap();
        {
            let store = DurableStore::open(dir.path()).unwrap();
            put(&store, "persist", b"val");
        }
        let store = DurableStore::open(dir.path()).unwrap();
        assert_eq!(get(&store, "persist"), Some(b"val".to_vec()));
    }

    #[test]
    fn in_memory_backend_works() {
        let store = DurableStore::in_memory().unwrap();
        put(&store, "key", b"val");
        assert_eq!(get(&store, "key"), Some(b"val".to_vec()));
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let store = DurableStore::in_memory().unwrap();
        {
            let txn = store.begin_write().unwrap();
            {
                let mut table = txn.open_table(TEST_TABLE).unwrap();
                table.insert("abandoned", b"value".as_slice()).unwrap();
            }
            // txn dropped without commit
        }
        let txn = store.begin_read().unwrap();
        // Table may not even exist yet; either way the key must be gone.
        match txn.open_table(TEST_TABLE) {
            Ok(table) => assert!(table.get("abandoned").unwrap().is_none()),
            Err(_) => {}
        }
    }
}
