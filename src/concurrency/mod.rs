pub mod lock_manager;
pub mod transaction;

pub use lock_manager::{LockId, LockManager, LockMode};
pub use transaction::{Transaction, TransactionManager, TxnState, Undoable, WriteRecord};
