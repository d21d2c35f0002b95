// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use common::config::{BTreeConfig, BufferPoolConfig, LockManagerConfig};
pub use index::btree::{BTreeError, BTreeIndex, BTreeIterator, IndexKey};
pub use storage::buffer::{BufferPoolError, BufferPoolManager, LruKReplacer};
pub use transaction::{
    IsolationLevel, LockManager, LockMode, Transaction, TransactionError, TransactionManager,
};
