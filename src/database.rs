use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::info;

use crate::buffer_pool::BufferPool;
use crate::concurrency::{LockManager, Transaction, TransactionManager, Undoable};
use crate::disk::DiskManager;
use crate::error::Result;
use crate::index::BTreeIndexHandle;
use crate::record::RecordFileHandle;
use crate::types::FileId;

/// Wires together the four core subsystems and keeps the table/index
/// registries a running transaction's abort path needs to find the right
/// `Undoable` for each write-set entry. Pool size and disk directory are
/// constructor parameters rather than a lazily-initialized global, so
/// tests can stand up as many independent instances as they like.
pub struct Database {
    pub buffer_pool: Arc<BufferPool>,
    pub lock_manager: Arc<LockManager>,
    pub transaction_manager: TransactionManager,
    tables: Mutex<HashMap<FileId, Arc<RecordFileHandle>>>,
    indexes: Mutex<HashMap<FileId, Arc<BTreeIndexHandle>>>,
}

impl Database {
    pub fn new<P: AsRef<std::path::Path>>(dir: P, pool_size: usize) -> Self {
        let buffer_pool = Arc::new(BufferPool::new(pool_size, DiskManager::new(dir)));
        let lock_manager = Arc::new(LockManager::new());
        let transaction_manager = TransactionManager::new(lock_manager.clone());
        Database {
            buffer_pool,
            lock_manager,
            transaction_manager,
            tables: Mutex::new(HashMap::new()),
            indexes: Mutex::new(HashMap::new()),
        }
    }

    pub fn begin(&self) -> Transaction {
        self.transaction_manager.begin()
    }

    /// Commits `txn`, then reclaims any index pages it queued for deletion
    /// during coalesce/adjust-root now that the transaction can no longer
    /// be aborted.
    pub fn commit(&self, txn: &Transaction) -> Result<()> {
        let deleted_pages = self.transaction_manager.commit(txn);
        for (file_id, page_no) in deleted_pages {
            self.buffer_pool.delete(crate::types::PageId::new(file_id, page_no))?;
        }
        Ok(())
    }

    /// Undoes `txn`'s write-set against whichever table or index each entry
    /// names, then releases its locks.
    pub fn abort(&self, txn: &Transaction) -> Result<()> {
        self.transaction_manager.abort(
            txn,
            &|file_id| {
                self.tables
                    .lock()
                    .unwrap()
                    .get(&file_id)
                    .cloned()
                    .map(|t| t as Arc<dyn Undoable>)
            },
            &|file_id| {
                self.indexes
                    .lock()
                    .unwrap()
                    .get(&file_id)
                    .cloned()
                    .map(|i| i as Arc<dyn Undoable>)
            },
        )
    }

    pub fn create_table(&self, file_id: FileId, record_size: usize) -> Result<Arc<RecordFileHandle>> {
        let table = Arc::new(RecordFileHandle::create(file_id, record_size, self.buffer_pool.clone(), self.lock_manager.clone())?);
        self.tables.lock().unwrap().insert(file_id, table.clone());
        info!("created table {}", file_id);
        Ok(table)
    }

    pub fn open_table(&self, file_id: FileId) -> Result<Arc<RecordFileHandle>> {
        let table = Arc::new(RecordFileHandle::open(file_id, self.buffer_pool.clone(), self.lock_manager.clone())?);
        self.tables.lock().unwrap().insert(file_id, table.clone());
        Ok(table)
    }

    pub fn table(&self, file_id: FileId) -> Option<Arc<RecordFileHandle>> {
        self.tables.lock().unwrap().get(&file_id).cloned()
    }

    pub fn create_index(&self, file_id: FileId, max_n: usize) -> Result<Arc<BTreeIndexHandle>> {
        let index = Arc::new(BTreeIndexHandle::create(file_id, max_n, self.buffer_pool.clone())?);
        self.indexes.lock().unwrap().insert(file_id, index.clone());
        info!("created index {} (max_n={})", file_id, max_n);
        Ok(index)
    }

    pub fn open_index(&self, file_id: FileId) -> Result<Arc<BTreeIndexHandle>> {
        let index = Arc::new(BTreeIndexHandle::open(file_id, self.buffer_pool.clone())?);
        self.indexes.lock().unwrap().insert(file_id, index.clone());
        Ok(index)
    }

    pub fn index(&self, file_id: FileId) -> Option<Arc<BTreeIndexHandle>> {
        self.indexes.lock().unwrap().get(&file_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn scratch_db(tag: &str) -> Database {
        let dir = env::temp_dir().join(format!("rucbase-core-db-{}-{}", tag, std::process::id()));
        Database::new(dir, 32)
    }

    #[test]
    fn create_table_insert_commit_round_trip() {
        let db = scratch_db("commit");
        let table = db.create_table(1, 8).unwrap();
        let txn = db.begin();
        let rid = table.insert(&42u64.to_le_bytes(), &txn).unwrap();
        db.commit(&txn).unwrap();
        let txn2 = db.begin();
        assert_eq!(table.get(rid, &txn2).unwrap(), 42u64.to_le_bytes());
    }

    #[test]
    fn abort_rolls_back_insert_through_database_registry() {
        let db = scratch_db("abort");
        let table = db.create_table(1, 8).unwrap();
        let txn = db.begin();
        let rid = table.insert(&7u64.to_le_bytes(), &txn).unwrap();
        db.abort(&txn).unwrap();

        let txn2 = db.begin();
        assert!(table.get(rid, &txn2).is_err());
    }

    #[test]
    fn create_index_insert_and_lookup() {
        let db = scratch_db("index");
        let index = db.create_index(2, 4).unwrap();
        let txn = db.begin();
        assert!(index.insert_entry(9, crate::types::Rid::new(1, 9), &txn).unwrap());
        assert_eq!(db.index(2).unwrap().get_value(9, &txn).unwrap(), vec![crate::types::Rid::new(1, 9)]);
        db.commit(&txn).unwrap();
    }

    #[test]
    fn abort_rolls_back_index_insert_through_database_registry() {
        let db = scratch_db("index-abort");
        let index = db.create_index(3, 4).unwrap();
        let txn = db.begin();
        assert!(index.insert_entry(5, crate::types::Rid::new(1, 5), &txn).unwrap());
        db.abort(&txn).unwrap();

        let txn2 = db.begin();
        assert!(db.index(3).unwrap().get_value(5, &txn2).unwrap().is_empty());
    }

    #[test]
    fn abort_rolls_back_index_delete_through_database_registry() {
        let db = scratch_db("index-abort-delete");
        let index = db.create_index(4, 4).unwrap();
        let setup = db.begin();
        assert!(index.insert_entry(6, crate::types::Rid::new(1, 6), &setup).unwrap());
        db.commit(&setup).unwrap();

        let txn = db.begin();
        assert!(index.delete_entry(6, &txn).unwrap());
        db.abort(&txn).unwrap();

        let txn2 = db.begin();
        assert_eq!(db.index(4).unwrap().get_value(6, &txn2).unwrap(), vec![crate::types::Rid::new(1, 6)]);
    }
}
