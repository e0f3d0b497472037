use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shorthand for `RwLock` accessors, matching the reference lineage's
/// naming (`.rl()` / `.wl()`) so call sites read the same either way.
pub trait HandyRwLock<T> {
    fn rl(&self) -> RwLockReadGuard<'_, T>;
    fn wl(&self) -> RwLockWriteGuard<'_, T>;
}

impl<T> HandyRwLock<T> for RwLock<T> {
    fn rl(&self) -> RwLockReadGuard<'_, T> {
        self.read().unwrap()
    }

    fn wl(&self) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap()
    }
}
