// Transaction concurrency module exports

pub mod deadlock;
pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;

// Public exports
pub use deadlock::WaitsForGraph;
pub use lock_manager::{LockManager, LockMode};
pub use transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionError, TransactionState,
};
pub use transaction_manager::TransactionManager;
