// Export public modules
pub mod catalog;
pub mod common;
pub mod index;
pub mod query;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use index::btree::BPlusTree;
pub use storage::buffer::{BufferPoolError, BufferPoolManager};
pub use storage::disk::DiskManager;
pub use transaction::{
    DeadlockDetector, IsolationLevel, LockManager, LockManagerConfig, LockMode, Transaction,
    TransactionManager,
};
