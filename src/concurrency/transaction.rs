use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use log::info;

use crate::concurrency::lock_manager::{LockId, LockManager};
use crate::error::Result;
use crate::types::{FileId, Rid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Default,
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// A reversible action recorded in a transaction's write-set, carrying
/// enough pre-image data to undo itself on abort.
#[derive(Debug, Clone)]
pub enum WriteRecord {
    Insert { file_id: FileId, rid: Rid },
    Update { file_id: FileId, rid: Rid, before: Vec<u8> },
    Delete { file_id: FileId, rid: Rid, before: Vec<u8> },
    IndexInsert { file_id: FileId, key: i32 },
    IndexDelete { file_id: FileId, key: i32, rid: Rid },
}

static NEXT_TXN_ID: AtomicU32 = AtomicU32::new(1);

/// Per-transaction state: lifecycle, lock-set and write-set. Cheaply
/// shared (no data is ever mutated except through its own `Mutex`-guarded
/// fields), so callers typically hold it behind an `Arc`.
pub struct Transaction {
    id: u32,
    state: Mutex<TxnState>,
    lock_set: Mutex<HashSet<LockId>>,
    write_set: Mutex<Vec<WriteRecord>>,
    /// Page numbers currently latched by this transaction's B+-tree
    /// descent, innermost last. Pushed on latch acquisition and popped on
    /// release; used to track how deep a crabbing descent has gone.
    page_set: Mutex<Vec<i32>>,
    /// Index pages freed by a coalesce/adjust-root during this
    /// transaction's lifetime, not yet handed to the buffer pool. Draining
    /// happens at commit, not at the moment of removal, so an abort can
    /// still undo an index delete against a page that was never actually
    /// reclaimed.
    deleted_page_set: Mutex<Vec<(FileId, i32)>>,
}

impl Transaction {
    pub fn new(id: u32) -> Self {
        Transaction {
            id,
            state: Mutex::new(TxnState::Default),
            lock_set: Mutex::new(HashSet::new()),
            write_set: Mutex::new(Vec::new()),
            page_set: Mutex::new(Vec::new()),
            deleted_page_set: Mutex::new(Vec::new()),
        }
    }

    /// Allocates the next process-wide transaction id.
    pub fn next() -> Self {
        let id = NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst);
        Transaction::new(id)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> TxnState {
        *self.state.lock().unwrap()
    }

    pub fn is_aborted(&self) -> bool {
        self.state() == TxnState::Aborted
    }

    pub(crate) fn set_growing(&self) {
        let mut s = self.state.lock().unwrap();
        if *s == TxnState::Default {
            *s = TxnState::Growing;
        }
    }

    pub(crate) fn set_shrinking(&self) {
        let mut s = self.state.lock().unwrap();
        if *s == TxnState::Growing || *s == TxnState::Default {
            *s = TxnState::Shrinking;
        }
    }

    fn set_state(&self, new_state: TxnState) {
        *self.state.lock().unwrap() = new_state;
    }

    pub(crate) fn lock_set_insert(&self, lock_id: LockId) {
        self.lock_set.lock().unwrap().insert(lock_id);
    }

    pub(crate) fn lock_set_remove(&self, lock_id: &LockId) {
        self.lock_set.lock().unwrap().remove(lock_id);
    }

    pub fn lock_set(&self) -> HashSet<LockId> {
        self.lock_set.lock().unwrap().clone()
    }

    pub fn push_write(&self, record: WriteRecord) {
        self.write_set.lock().unwrap().push(record);
    }

    pub fn write_set(&self) -> Vec<WriteRecord> {
        self.write_set.lock().unwrap().clone()
    }

    pub(crate) fn page_set_push(&self, page_no: i32) {
        self.page_set.lock().unwrap().push(page_no);
    }

    pub(crate) fn page_set_pop(&self) {
        self.page_set.lock().unwrap().pop();
    }

    pub fn page_set(&self) -> Vec<i32> {
        self.page_set.lock().unwrap().clone()
    }

    pub(crate) fn push_deleted_page(&self, file_id: FileId, page_no: i32) {
        self.deleted_page_set.lock().unwrap().push((file_id, page_no));
    }

    fn drain_deleted_pages(&self) -> Vec<(FileId, i32)> {
        std::mem::take(&mut *self.deleted_page_set.lock().unwrap())
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn_{}", self.id)
    }
}

/// An undo surface implemented by whatever owns the write-set entries the
/// transaction manager replays in reverse on abort. Kept as a trait so the
/// transaction manager depends only on the undo contract, not on the
/// concrete record-file or index type. [`crate::record::RecordFileHandle`]
/// implements the `rid`-keyed methods; [`crate::index::BTreeIndexHandle`]
/// implements the `key`-keyed ones. Each side only overrides the methods
/// that apply to it — the rest keep their no-op default, since a given
/// `WriteRecord` variant is only ever dispatched to the registry (tables or
/// indexes) that matches it.
pub trait Undoable {
    fn undo_insert(&self, _rid: Rid) -> Result<()> {
        Ok(())
    }
    fn undo_update(&self, _rid: Rid, _before: &[u8]) -> Result<()> {
        Ok(())
    }
    fn undo_delete(&self, _rid: Rid, _before: &[u8]) -> Result<()> {
        Ok(())
    }
    fn undo_index_insert(&self, _key: i32) -> Result<()> {
        Ok(())
    }
    fn undo_index_delete(&self, _key: i32, _rid: Rid) -> Result<()> {
        Ok(())
    }
}

/// Orchestrates lifecycle, write-set rollback and lock release. Does not
/// own transactions itself beyond the registry used for `begin`; callers
/// keep their own `Arc<Transaction>` for the duration of their work.
pub struct TransactionManager {
    lock_manager: std::sync::Arc<LockManager>,
}

impl TransactionManager {
    pub fn new(lock_manager: std::sync::Arc<LockManager>) -> Self {
        TransactionManager { lock_manager }
    }

    pub fn begin(&self) -> Transaction {
        let txn = Transaction::next();
        info!("begin {}", txn);
        txn
    }

    fn release_all_locks(&self, txn: &Transaction) {
        for lock_id in txn.lock_set() {
            self.lock_manager.unlock(txn, lock_id);
        }
    }

    /// Releases locks and clears the write-set. Returns the transaction's
    /// deferred index-page deletions so the caller (which owns the buffer
    /// pool) can actually reclaim them now that commit has made the delete
    /// durable against any future abort.
    pub fn commit(&self, txn: &Transaction) -> Vec<(FileId, i32)> {
        info!("commit {}", txn);
        self.release_all_locks(txn);
        txn.write_set.lock().unwrap().clear();
        txn.set_state(TxnState::Committed);
        txn.drain_deleted_pages()
    }

    /// Undoes `txn`'s write-set in reverse, dispatching record-oriented
    /// entries (`Insert`/`Update`/`Delete`) to `tables` and index-oriented
    /// entries (`IndexInsert`/`IndexDelete`) to `indexes` — each a lookup
    /// from file id to the owner of that id in the respective registry —
    /// then releases locks. A transaction's deferred index-page deletions
    /// are simply dropped: since they were never handed to the buffer
    /// pool, the pages they reference are still live for the undo above to
    /// operate against.
    pub fn abort(
        &self,
        txn: &Transaction,
        tables: &dyn Fn(FileId) -> Option<std::sync::Arc<dyn Undoable>>,
        indexes: &dyn Fn(FileId) -> Option<std::sync::Arc<dyn Undoable>>,
    ) -> Result<()> {
        info!("abort {}", txn);
        let write_set = txn.write_set();
        for record in write_set.into_iter().rev() {
            match record {
                WriteRecord::Insert { file_id, rid } => {
                    if let Some(t) = tables(file_id) {
                        t.undo_insert(rid)?;
                    }
                }
                WriteRecord::Update { file_id, rid, before } => {
                    if let Some(t) = tables(file_id) {
                        t.undo_update(rid, &before)?;
                    }
                }
                WriteRecord::Delete { file_id, rid, before } => {
                    if let Some(t) = tables(file_id) {
                        t.undo_delete(rid, &before)?;
                    }
                }
                WriteRecord::IndexInsert { file_id, key } => {
                    if let Some(i) = indexes(file_id) {
                        i.undo_index_insert(key)?;
                    }
                }
                WriteRecord::IndexDelete { file_id, key, rid } => {
                    if let Some(i) = indexes(file_id) {
                        i.undo_index_delete(key, rid)?;
                    }
                }
            }
        }
        txn.write_set.lock().unwrap().clear();
        txn.drain_deleted_pages();
        self.release_all_locks(txn);
        txn.set_state(TxnState::Aborted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn begin_sets_default_state() {
        let tm = TransactionManager::new(Arc::new(LockManager::new()));
        let txn = tm.begin();
        assert_eq!(txn.state(), TxnState::Default);
    }

    #[test]
    fn lock_then_unlock_moves_growing_to_shrinking() {
        let lm = Arc::new(LockManager::new());
        let tm = TransactionManager::new(lm.clone());
        let txn = tm.begin();
        lm.lock_s_table(&txn, 1).unwrap();
        assert_eq!(txn.state(), TxnState::Growing);
        tm.commit(&txn);
        assert_eq!(txn.state(), TxnState::Committed);
    }

    #[test]
    fn aborted_txn_refuses_new_locks() {
        let lm = Arc::new(LockManager::new());
        let tm = TransactionManager::new(lm.clone());
        let txn = tm.begin();
        tm.abort(&txn, &|_| None, &|_| None).unwrap();
        assert!(lm.lock_s_table(&txn, 1).is_err());
    }
}
