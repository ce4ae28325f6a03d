pub mod deadlock;
pub mod error;
pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;
pub mod wal;

pub use deadlock::DeadlockDetector;
pub use error::{AbortReason, TransactionAbort};
pub use lock_manager::{LockManager, LockManagerConfig, LockMode};
pub use transaction::{IsolationLevel, Transaction, TransactionState};
pub use transaction_manager::TransactionManager;
