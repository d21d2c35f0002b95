use std::collections::{HashMap, HashSet};
use std::fmt;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::concurrency::lock_manager::LockMode;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Typed reasons a lock-manager rule violation aborts a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockSharedOnReadUncommitted,
    LockOnShrinking,
    AttemptedIntentionLockOnRow,
    TableLockNotPresent,
    IncompatibleUpgrade,
    UpgradeConflict,
    AttemptedUnlockButNoLockHeld,
    TableUnlockedBeforeUnlockingRows,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::LockSharedOnReadUncommitted => {
                "shared locks are not allowed under read-uncommitted"
            }
            Self::LockOnShrinking => "lock requested while shrinking",
            Self::AttemptedIntentionLockOnRow => "intention locks are not allowed on rows",
            Self::TableLockNotPresent => "row lock requires a table lock",
            Self::IncompatibleUpgrade => "incompatible lock upgrade",
            Self::UpgradeConflict => "another transaction is already upgrading",
            Self::AttemptedUnlockButNoLockHeld => "unlock attempted with no lock held",
            Self::TableUnlockedBeforeUnlockingRows => "table unlocked before its row locks",
        };
        f.write_str(message)
    }
}

/// Errors that can occur during transaction processing
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {txn_id} aborted: {reason}")]
    Aborted { txn_id: TxnId, reason: AbortReason },

    #[error("Transaction {0} not found")]
    NotFound(TxnId),

    #[error("Transaction {0} is no longer active")]
    NotActive(TxnId),
}

/// Per-mode lock bookkeeping, mutated by the lock manager under the
/// transaction's own latch so readers always observe a consistent view.
#[derive(Default)]
struct LockSets {
    shared_tables: HashSet<TableOid>,
    exclusive_tables: HashSet<TableOid>,
    intention_shared_tables: HashSet<TableOid>,
    intention_exclusive_tables: HashSet<TableOid>,
    shared_intention_exclusive_tables: HashSet<TableOid>,
    shared_rows: HashMap<TableOid, HashSet<Rid>>,
    exclusive_rows: HashMap<TableOid, HashSet<Rid>>,
}

impl LockSets {
    fn table_set(&mut self, mode: LockMode) -> &mut HashSet<TableOid> {
        match mode {
            LockMode::Shared => &mut self.shared_tables,
            LockMode::Exclusive => &mut self.exclusive_tables,
            LockMode::IntentionShared => &mut self.intention_shared_tables,
            LockMode::IntentionExclusive => &mut self.intention_exclusive_tables,
            LockMode::SharedIntentionExclusive => &mut self.shared_intention_exclusive_tables,
        }
    }
}

/// Transaction - identity, 2PL state, isolation level and held locks
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
    locks: Mutex<LockSets>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            locks: Mutex::new(LockSets::default()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// Mode of the table lock held on `oid`, if any
    pub fn table_lock_mode(&self, oid: TableOid) -> Option<LockMode> {
        let locks = self.locks.lock();
        if locks.exclusive_tables.contains(&oid) {
            Some(LockMode::Exclusive)
        } else if locks.shared_intention_exclusive_tables.contains(&oid) {
            Some(LockMode::SharedIntentionExclusive)
        } else if locks.intention_exclusive_tables.contains(&oid) {
            Some(LockMode::IntentionExclusive)
        } else if locks.shared_tables.contains(&oid) {
            Some(LockMode::Shared)
        } else if locks.intention_shared_tables.contains(&oid) {
            Some(LockMode::IntentionShared)
        } else {
            None
        }
    }

    /// Mode of the row lock held on `rid`, if any
    pub fn row_lock_mode(&self, oid: TableOid, rid: Rid) -> Option<LockMode> {
        let locks = self.locks.lock();
        if locks
            .exclusive_rows
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
        {
            Some(LockMode::Exclusive)
        } else if locks
            .shared_rows
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
        {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    /// Whether any row of `oid` is still locked by this transaction
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        let locks = self.locks.lock();
        locks
            .shared_rows
            .get(&oid)
            .is_some_and(|rows| !rows.is_empty())
            || locks
                .exclusive_rows
                .get(&oid)
                .is_some_and(|rows| !rows.is_empty())
    }

    pub(crate) fn add_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.locks.lock().table_set(mode).insert(oid);
    }

    pub(crate) fn remove_table_lock(&self, mode: LockMode, oid: TableOid) {
        self.locks.lock().table_set(mode).remove(&oid);
    }

    pub(crate) fn add_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) {
        let mut locks = self.locks.lock();
        let rows = match mode {
            LockMode::Shared => &mut locks.shared_rows,
            LockMode::Exclusive => &mut locks.exclusive_rows,
            _ => unreachable!("row locks are only S or X"),
        };
        rows.entry(oid).or_default().insert(rid);
    }

    pub(crate) fn remove_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) {
        let mut locks = self.locks.lock();
        let rows = match mode {
            LockMode::Shared => &mut locks.shared_rows,
            LockMode::Exclusive => &mut locks.exclusive_rows,
            _ => unreachable!("row locks are only S or X"),
        };
        if let Some(set) = rows.get_mut(&oid) {
            set.remove(&rid);
        }
    }

    /// Snapshot of all held table locks as (oid, mode)
    pub(crate) fn table_locks_snapshot(&self) -> Vec<(TableOid, LockMode)> {
        let locks = self.locks.lock();
        let mut out = Vec::new();
        for &oid in &locks.intention_shared_tables {
            out.push((oid, LockMode::IntentionShared));
        }
        for &oid in &locks.intention_exclusive_tables {
            out.push((oid, LockMode::IntentionExclusive));
        }
        for &oid in &locks.shared_tables {
            out.push((oid, LockMode::Shared));
        }
        for &oid in &locks.shared_intention_exclusive_tables {
            out.push((oid, LockMode::SharedIntentionExclusive));
        }
        for &oid in &locks.exclusive_tables {
            out.push((oid, LockMode::Exclusive));
        }
        out
    }

    /// Snapshot of all held row locks as (oid, rid, mode)
    pub(crate) fn row_locks_snapshot(&self) -> Vec<(TableOid, Rid, LockMode)> {
        let locks = self.locks.lock();
        let mut out = Vec::new();
        for (&oid, rows) in &locks.shared_rows {
            for &rid in rows {
                out.push((oid, rid, LockMode::Shared));
            }
        }
        for (&oid, rows) in &locks.exclusive_rows {
            for &rid in rows {
                out.push((oid, rid, LockMode::Exclusive));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction_is_growing() {
        let txn = Transaction::new(1, IsolationLevel::RepeatableRead);
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.isolation_level(), IsolationLevel::RepeatableRead);
    }

    #[test]
    fn test_table_lock_bookkeeping() {
        let txn = Transaction::new(2, IsolationLevel::ReadCommitted);

        assert_eq!(txn.table_lock_mode(7), None);
        txn.add_table_lock(LockMode::IntentionShared, 7);
        assert_eq!(txn.table_lock_mode(7), Some(LockMode::IntentionShared));

        txn.remove_table_lock(LockMode::IntentionShared, 7);
        txn.add_table_lock(LockMode::Exclusive, 7);
        assert_eq!(txn.table_lock_mode(7), Some(LockMode::Exclusive));

        txn.remove_table_lock(LockMode::Exclusive, 7);
        assert_eq!(txn.table_lock_mode(7), None);
    }

    #[test]
    fn test_row_lock_bookkeeping() {
        let txn = Transaction::new(3, IsolationLevel::RepeatableRead);
        let rid = Rid::new(4, 2);

        assert!(!txn.holds_row_locks_on(1));
        txn.add_row_lock(LockMode::Shared, 1, rid);
        assert_eq!(txn.row_lock_mode(1, rid), Some(LockMode::Shared));
        assert!(txn.holds_row_locks_on(1));
        assert!(!txn.holds_row_locks_on(2));

        txn.remove_row_lock(LockMode::Shared, 1, rid);
        assert_eq!(txn.row_lock_mode(1, rid), None);
        assert!(!txn.holds_row_locks_on(1));
    }
}
