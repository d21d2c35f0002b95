use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::concurrency::lock_manager::{LockManager, LockMode};
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState,
};

/// Transaction manager - issues transaction ids, tracks live transactions,
/// and drives the SS2PL release phase on commit/abort.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    active: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Begin a new transaction
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active.lock().insert(txn_id, Arc::clone(&txn));
        log::debug!("txn {} started ({:?})", txn_id, isolation_level);
        txn
    }

    /// Commit: release every lock (rows before tables), then retire the
    /// transaction. Committing an already-aborted transaction fails after
    /// its cleanup runs.
    pub fn commit(&self, txn_id: TxnId) -> Result<(), TransactionError> {
        let txn = self
            .active
            .lock()
            .remove(&txn_id)
            .ok_or(TransactionError::NotFound(txn_id))?;

        self.lock_manager.release_all(&txn);
        if txn.state() == TransactionState::Aborted {
            return Err(TransactionError::NotActive(txn_id));
        }
        txn.set_state(TransactionState::Committed);
        log::debug!("txn {} committed", txn_id);
        Ok(())
    }

    /// Abort: release every lock and retire the transaction
    pub fn abort(&self, txn_id: TxnId) -> Result<(), TransactionError> {
        let txn = self
            .active
            .lock()
            .remove(&txn_id)
            .ok_or(TransactionError::NotFound(txn_id))?;

        txn.set_state(TransactionState::Aborted);
        self.lock_manager.release_all(&txn);
        log::debug!("txn {} aborted", txn_id);
        Ok(())
    }

    pub fn get(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active.lock().get(&txn_id).cloned()
    }

    /// Executor-facing wrappers: lock violations abort the transaction
    /// inside the lock manager and surface here as a plain `false`.
    pub fn lock_table(&self, txn: &Arc<Transaction>, mode: LockMode, oid: TableOid) -> bool {
        self.lock_manager
            .lock_table(txn, mode, oid)
            .unwrap_or_else(|e| {
                log::debug!("lock_table failed: {}", e);
                false
            })
    }

    pub fn unlock_table(&self, txn: &Arc<Transaction>, oid: TableOid) -> bool {
        self.lock_manager
            .unlock_table(txn, oid)
            .unwrap_or_else(|e| {
                log::debug!("unlock_table failed: {}", e);
                false
            })
    }

    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> bool {
        self.lock_manager
            .lock_row(txn, mode, oid, rid)
            .unwrap_or_else(|e| {
                log::debug!("lock_row failed: {}", e);
                false
            })
    }

    pub fn unlock_row(&self, txn: &Arc<Transaction>, oid: TableOid, rid: Rid) -> bool {
        self.lock_manager
            .unlock_row(txn, oid, rid)
            .unwrap_or_else(|e| {
                log::debug!("unlock_row failed: {}", e);
                false
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::LockManagerConfig;

    fn manager() -> TransactionManager {
        TransactionManager::new(LockManager::new(LockManagerConfig::default()))
    }

    #[test]
    fn test_begin_assigns_increasing_ids() {
        let tm = manager();
        let t1 = tm.begin(IsolationLevel::RepeatableRead);
        let t2 = tm.begin(IsolationLevel::ReadCommitted);
        assert_eq!(t1.id(), 1);
        assert_eq!(t2.id(), 2);
        assert!(tm.get(1).is_some());
        assert!(tm.get(2).is_some());
    }

    #[test]
    fn test_commit_releases_locks_and_retires() {
        let tm = manager();
        let txn = tm.begin(IsolationLevel::RepeatableRead);

        assert!(tm.lock_table(&txn, LockMode::Exclusive, 1));
        tm.commit(txn.id()).unwrap();

        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(txn.table_lock_mode(1), None);
        assert!(tm.get(txn.id()).is_none());
        assert!(matches!(
            tm.commit(txn.id()),
            Err(TransactionError::NotFound(_))
        ));
    }

    #[test]
    fn test_abort_releases_locks() {
        let tm = manager();
        let txn = tm.begin(IsolationLevel::RepeatableRead);

        assert!(tm.lock_table(&txn, LockMode::IntentionExclusive, 3));
        assert!(tm.lock_row(&txn, LockMode::Exclusive, 3, Rid::new(1, 0)));
        tm.abort(txn.id()).unwrap();

        assert_eq!(txn.state(), TransactionState::Aborted);
        assert_eq!(txn.table_lock_mode(3), None);
        assert_eq!(txn.row_lock_mode(3, Rid::new(1, 0)), None);
    }

    #[test]
    fn test_wrappers_translate_aborts_to_false() {
        let tm = manager();
        let txn = tm.begin(IsolationLevel::ReadUncommitted);

        // Shared locks are illegal under read-uncommitted
        assert!(!tm.lock_table(&txn, LockMode::Shared, 1));
        assert_eq!(txn.state(), TransactionState::Aborted);
    }
}
