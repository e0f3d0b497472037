use std::collections::HashMap;
use std::fmt;
use std::sync::{Condvar, Mutex};

use log::debug;

use crate::concurrency::transaction::Transaction;
use crate::error::{Error, Result};
use crate::types::{FileId, Rid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IS,
    IX,
    S,
    SIX,
    X,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockId {
    Table(FileId),
    Record(FileId, Rid),
}

/// Least-upper-bound of two granted modes under the multi-granularity
/// lattice (NL < IS < IX < SIX < X, and IS < S < SIX).
fn join(a: LockMode, b: LockMode) -> LockMode {
    use LockMode::*;
    if a == b {
        return a;
    }
    match (a, b) {
        (IS, other) | (other, IS) => other,
        (X, _) | (_, X) => X,
        (IX, S) | (S, IX) => SIX,
        (IX, SIX) | (SIX, IX) => SIX,
        (S, SIX) | (SIX, S) => SIX,
        _ => unreachable!("exhaustive over {{IS,IX,S,SIX,X}}"),
    }
}

/// `have` already satisfies a request for `want` without needing to wait
/// or upgrade, i.e. `want` is dominated by `have` in the lattice.
fn covers(have: LockMode, want: LockMode) -> bool {
    join(have, want) == have
}

fn compatible(held: LockMode, requested: LockMode) -> bool {
    use LockMode::*;
    match (held, requested) {
        (IS, X) | (X, IS) => false,
        (IS, _) | (_, IS) => true,
        (IX, IX) => true,
        (IX, _) | (_, IX) => false,
        (S, S) => true,
        (S, _) | (_, S) => false,
        (SIX, SIX) => false,
        (SIX, X) | (X, SIX) => false,
        (X, X) => false,
    }
}

struct Request {
    txn_id: u32,
    mode: LockMode,
    granted: bool,
}

#[derive(Default)]
struct LockEntry {
    queue: Vec<Request>,
    group_mode: Option<LockMode>,
}

struct Inner {
    table: HashMap<LockId, LockEntry>,
}

/// Multi-granularity two-phase lock table, one entry per `lock_id`, under
/// a single mutex. Waiters block on a shared condition variable and
/// re-check their own predicate on every wake (spurious-wake-safe).
pub struct LockManager {
    inner: Mutex<Inner>,
    cv: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        LockManager {
            inner: Mutex::new(Inner { table: HashMap::new() }),
            cv: Condvar::new(),
        }
    }

    fn recompute_group_mode(queue: &[Request]) -> Option<LockMode> {
        queue
            .iter()
            .filter(|r| r.granted)
            .fold(None, |acc, r| match acc {
                None => Some(r.mode),
                Some(m) => Some(join(m, r.mode)),
            })
    }

    /// Acquires `mode` on `lock_id` for `txn`, blocking until granted.
    pub fn acquire(&self, txn: &Transaction, lock_id: LockId, mode: LockMode) -> Result<()> {
        if txn.is_aborted() {
            return Err(Error::TxnAborted);
        }
        let mut guard = self.inner.lock().unwrap();
        loop {
            if txn.is_aborted() {
                return Err(Error::TxnAborted);
            }
            let entry = guard.table.entry(lock_id).or_insert_with(LockEntry::default);

            if let Some(idx) = entry.queue.iter().position(|r| r.txn_id == txn.id() && r.granted) {
                let current_mode = entry.queue[idx].mode;
                if covers(current_mode, mode) {
                    txn.lock_set_insert(lock_id);
                    return Ok(());
                }
                // Upgrade: mutate this txn's own granted request in place
                // (never a copy) and re-check compatibility with every
                // other granted holder.
                let compatible_with_others = entry
                    .queue
                    .iter()
                    .enumerate()
                    .all(|(i, r)| i == idx || !r.granted || compatible(r.mode, mode));
                if compatible_with_others {
                    entry.queue[idx].mode = mode;
                    entry.group_mode = Self::recompute_group_mode(&entry.queue);
                    txn.set_growing();
                    txn.lock_set_insert(lock_id);
                    debug!("txn {} upgraded {:?} to {:?}", txn.id(), lock_id, mode);
                    self.cv.notify_all();
                    return Ok(());
                }
                guard = self.cv.wait(guard).unwrap();
                continue;
            }

            if !entry.queue.iter().any(|r| r.txn_id == txn.id()) {
                entry.queue.push(Request {
                    txn_id: txn.id(),
                    mode,
                    granted: false,
                });
            }

            let compatible_with_group = entry.queue.iter().filter(|r| r.granted).all(|r| compatible(r.mode, mode));

            if compatible_with_group {
                if let Some(req) = entry.queue.iter_mut().find(|r| r.txn_id == txn.id() && !r.granted) {
                    req.granted = true;
                }
                entry.group_mode = Self::recompute_group_mode(&entry.queue);
                txn.set_growing();
                txn.lock_set_insert(lock_id);
                debug!("txn {} granted {:?} on {:?}", txn.id(), mode, lock_id);
                self.cv.notify_all();
                return Ok(());
            }

            guard = self.cv.wait(guard).unwrap();
        }
    }

    /// Releases `txn`'s request on `lock_id`, recomputing `group_mode` as
    /// the join of every remaining granted holder (not a blind reset to
    /// NON_LOCK, which would wrongly grant incompatible waiters).
    pub fn unlock(&self, txn: &Transaction, lock_id: LockId) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(entry) = guard.table.get_mut(&lock_id) {
            entry.queue.retain(|r| r.txn_id != txn.id());
            entry.group_mode = Self::recompute_group_mode(&entry.queue);
            if entry.queue.is_empty() {
                guard.table.remove(&lock_id);
            }
        }
        txn.lock_set_remove(&lock_id);
        txn.set_shrinking();
        debug!("txn {} released {:?}", txn.id(), lock_id);
        self.cv.notify_all();
    }

    pub fn lock_s_record(&self, txn: &Transaction, file_id: FileId, rid: Rid) -> Result<()> {
        self.acquire(txn, LockId::Record(file_id, rid), LockMode::S)
    }

    pub fn lock_x_record(&self, txn: &Transaction, file_id: FileId, rid: Rid) -> Result<()> {
        self.acquire(txn, LockId::Record(file_id, rid), LockMode::X)
    }

    pub fn lock_s_table(&self, txn: &Transaction, file_id: FileId) -> Result<()> {
        self.acquire(txn, LockId::Table(file_id), LockMode::S)
    }

    pub fn lock_x_table(&self, txn: &Transaction, file_id: FileId) -> Result<()> {
        self.acquire(txn, LockId::Table(file_id), LockMode::X)
    }

    pub fn lock_is_table(&self, txn: &Transaction, file_id: FileId) -> Result<()> {
        self.acquire(txn, LockId::Table(file_id), LockMode::IS)
    }

    pub fn lock_ix_table(&self, txn: &Transaction, file_id: FileId) -> Result<()> {
        self.acquire(txn, LockId::Table(file_id), LockMode::IX)
    }

    /// Current group mode for `lock_id`, for diagnostics and tests.
    pub fn group_mode(&self, lock_id: LockId) -> Option<LockMode> {
        let guard = self.inner.lock().unwrap();
        guard.table.get(&lock_id).and_then(|e| e.group_mode)
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.inner.lock().unwrap();
        writeln!(f, "LockManager {{")?;
        for (lock_id, entry) in guard.table.iter() {
            writeln!(f, "  {:?} group_mode={:?}", lock_id, entry.group_mode)?;
            for r in &entry.queue {
                writeln!(f, "    txn={} mode={:?} granted={}", r.txn_id, r.mode, r.granted)?;
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatible_matrix_matches_spec() {
        use LockMode::*;
        assert!(compatible(IS, IS));
        assert!(compatible(IS, IX));
        assert!(compatible(IS, S));
        assert!(compatible(IS, SIX));
        assert!(!compatible(IS, X));
        assert!(compatible(IX, IX));
        assert!(!compatible(IX, S));
        assert!(!compatible(IX, SIX));
        assert!(!compatible(IX, X));
        assert!(compatible(S, S));
        assert!(!compatible(S, SIX));
        assert!(!compatible(SIX, SIX));
        assert!(!compatible(SIX, X));
        assert!(!compatible(X, SIX));
        assert!(!compatible(X, X));
    }

    #[test]
    fn join_lattice_matches_expected() {
        use LockMode::*;
        assert_eq!(join(IX, S), SIX);
        assert_eq!(join(IS, X), X);
        assert_eq!(join(IS, IX), IX);
        assert_eq!(join(SIX, IX), SIX);
    }

    #[test]
    fn second_shared_request_granted_immediately() {
        let lm = LockManager::new();
        let t1 = Transaction::new(1);
        let t2 = Transaction::new(2);
        lm.lock_s_record(&t1, 1, Rid::new(0, 0)).unwrap();
        lm.lock_s_record(&t2, 1, Rid::new(0, 0)).unwrap();
        assert_eq!(lm.group_mode(LockId::Record(1, Rid::new(0, 0))), Some(LockMode::S));
    }

    #[test]
    fn unlock_recomputes_group_mode_from_remaining_holders() {
        let lm = LockManager::new();
        let t1 = Transaction::new(1);
        let t2 = Transaction::new(2);
        let lock_id = LockId::Table(1);
        lm.acquire(&t1, lock_id, LockMode::IX).unwrap();
        lm.acquire(&t2, lock_id, LockMode::IS).unwrap();
        assert_eq!(lm.group_mode(lock_id), Some(LockMode::IX));
        lm.unlock(&t1, lock_id);
        // t2's IS grant remains; group_mode must reflect it, not NON_LOCK.
        assert_eq!(lm.group_mode(lock_id), Some(LockMode::IS));
    }

    #[test]
    fn ix_then_is_is_compatible_group_mode_unchanged() {
        let lm = LockManager::new();
        let t1 = Transaction::new(1);
        let t2 = Transaction::new(2);
        let lock_id = LockId::Table(7);
        lm.lock_ix_table(&t1, 7).unwrap();
        lm.lock_is_table(&t2, 7).unwrap();
        assert_eq!(lm.group_mode(lock_id), Some(LockMode::IX));
    }
}
