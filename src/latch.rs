use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::PageId;
use crate::util::HandyRwLock;

/// Physical, non-transactional page latches: short-lived, acquired
/// strictly nested within one operation, distinct from the lock manager's
/// transactional locks (§5). Used both by the record file (to serialise
/// the read-slot-then-write-slot sequence against concurrent inserts to
/// the same page) and by the B+-tree index (for latch-crabbing descents).
pub struct PageLatchTable {
    latches: Mutex<HashMap<PageId, Arc<RwLock<()>>>>,
}

impl PageLatchTable {
    pub fn new() -> Self {
        PageLatchTable {
            latches: Mutex::new(HashMap::new()),
        }
    }

    fn latch_for(&self, page_id: PageId) -> Arc<RwLock<()>> {
        let mut table = self.latches.lock().unwrap();
        table.entry(page_id).or_insert_with(|| Arc::new(RwLock::new(()))).clone()
    }

    /// Acquires a shared latch on `page_id`. The returned guard owns a
    /// clone of the `Arc<RwLock<_>>`, so it stays valid even if another
    /// thread races to insert a fresh entry for the same page id.
    pub fn acquire_shared(&self, page_id: PageId) -> OwnedReadGuard {
        let arc = self.latch_for(page_id);
        OwnedReadGuard::new(arc)
    }

    pub fn acquire_exclusive(&self, page_id: PageId) -> OwnedWriteGuard {
        let arc = self.latch_for(page_id);
        OwnedWriteGuard::new(arc)
    }
}

impl Default for PageLatchTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A read-guard that owns the `Arc` it locked, avoiding a self-referential
/// borrow back into [`PageLatchTable`].
pub struct OwnedReadGuard {
    _arc: Arc<RwLock<()>>,
    guard: Option<RwLockReadGuard<'static, ()>>,
}

impl OwnedReadGuard {
    fn new(arc: Arc<RwLock<()>>) -> Self {
        let ptr: *const RwLock<()> = &*arc;
        // SAFETY: `_arc` keeps the RwLock alive for as long as `guard`
        // exists; the guard is dropped before `_arc` per field order.
        let guard = unsafe { (*ptr).rl() };
        let guard: RwLockReadGuard<'static, ()> = unsafe { std::mem::transmute(guard) };
        OwnedReadGuard { _arc: arc, guard: Some(guard) }
    }
}

impl Drop for OwnedReadGuard {
    fn drop(&mut self) {
        self.guard.take();
    }
}

pub struct OwnedWriteGuard {
    _arc: Arc<RwLock<()>>,
    guard: Option<RwLockWriteGuard<'static, ()>>,
}

impl OwnedWriteGuard {
    fn new(arc: Arc<RwLock<()>>) -> Self {
        let ptr: *const RwLock<()> = &*arc;
        let guard = unsafe { (*ptr).wl() };
        let guard: RwLockWriteGuard<'static, ()> = unsafe { std::mem::transmute(guard) };
        OwnedWriteGuard { _arc: arc, guard: Some(guard) }
    }
}

impl Drop for OwnedWriteGuard {
    fn drop(&mut self) {
        self.guard.take();
    }
}
