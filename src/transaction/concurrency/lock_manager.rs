use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use parking_lot::{Condvar, Mutex};

use crate::common::config::LockManagerConfig;
use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::concurrency::deadlock;
use crate::transaction::concurrency::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionError, TransactionState,
};

/// Multi-granularity lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    /// Standard multi-granularity compatibility matrix
    pub fn compatible_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (IntentionShared, Exclusive) | (Exclusive, IntentionShared) => false,
            (IntentionShared, _) | (_, IntentionShared) => true,
            (IntentionExclusive, IntentionExclusive) => true,
            (Shared, Shared) => true,
            _ => false,
        }
    }

    /// Allowed upgrade lattice: IS -> {S, X, IX, SIX}; S -> {X, SIX};
    /// IX -> {X, SIX}; SIX -> {X}
    pub fn can_upgrade_to(self, target: LockMode) -> bool {
        use LockMode::*;
        matches!(
            (self, target),
            (IntentionShared, Shared)
                | (IntentionShared, Exclusive)
                | (IntentionShared, IntentionExclusive)
                | (IntentionShared, SharedIntentionExclusive)
                | (Shared, Exclusive)
                | (Shared, SharedIntentionExclusive)
                | (IntentionExclusive, Exclusive)
                | (IntentionExclusive, SharedIntentionExclusive)
                | (SharedIntentionExclusive, Exclusive)
        )
    }
}

/// A single lock request, granted or waiting, in a resource's queue
pub(super) struct LockRequest {
    pub txn: Arc<Transaction>,
    pub mode: LockMode,
    pub oid: TableOid,
    pub rid: Option<Rid>,
    pub granted: bool,
}

/// Queue contents; all granted requests precede all waiting requests
pub(super) struct QueueState {
    pub requests: VecDeque<LockRequest>,
    /// Transaction currently upgrading its lock on this resource, if any
    pub upgrading: Option<TxnId>,
}

/// Per-resource request queue with its condition variable. Queues are
/// created lazily and never removed.
pub(super) struct LockRequestQueue {
    pub state: Mutex<QueueState>,
    pub cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                requests: VecDeque::new(),
                upgrading: None,
            }),
            cv: Condvar::new(),
        }
    }
}

/// Coordination for the background deadlock detector
pub(super) struct ShutdownSignal {
    flag: Mutex<bool>,
    cv: Condvar,
}

impl ShutdownSignal {
    fn new() -> Self {
        Self {
            flag: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn signal(&self) {
        *self.flag.lock() = true;
        self.cv.notify_all();
    }

    /// Sleep up to `timeout`; returns true once shutdown was signalled
    pub(super) fn wait_timeout(&self, timeout: std::time::Duration) -> bool {
        let mut flag = self.flag.lock();
        if *flag {
            return true;
        }
        self.cv.wait_for(&mut flag, timeout);
        *flag
    }
}

/// Hierarchical lock manager enforcing strict two-phase locking with
/// intention locks, FIFO queues, lock upgrades and background deadlock
/// detection.
///
/// Lock ordering inside the manager: lock map -> queue latch -> transaction
/// latch. The detector takes both lock-map mutexes before any queue latch.
pub struct LockManager {
    pub(super) table_locks: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    pub(super) row_locks: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    pub(super) shutdown: Arc<ShutdownSignal>,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    /// Create the lock manager and start its deadlock-detection worker
    pub fn new(config: LockManagerConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            table_locks: Mutex::new(HashMap::new()),
            row_locks: Mutex::new(HashMap::new()),
            shutdown: Arc::new(ShutdownSignal::new()),
            detector: Mutex::new(None),
        });

        let weak = Arc::downgrade(&manager);
        let shutdown = Arc::clone(&manager.shutdown);
        let interval = config.cycle_detection_interval;
        let handle = std::thread::Builder::new()
            .name("deadlock-detector".to_string())
            .spawn(move || deadlock::run_detector(weak, shutdown, interval))
            .expect("failed to spawn the deadlock detector");
        *manager.detector.lock() = Some(handle);

        manager
    }

    /// Acquire (or upgrade to) `mode` on a table. Blocks until granted.
    /// Returns `Ok(false)` when the transaction was aborted while waiting.
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, TransactionError> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        self.check_acquire_rules(txn, mode, oid, None)?;

        let held = txn.table_lock_mode(oid);
        if let Some(current) = held {
            if current == mode {
                return Ok(true);
            }
            if !current.can_upgrade_to(mode) {
                return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
            }
        }

        let queue = self.table_queue(oid);
        self.acquire(txn, &queue, mode, oid, None, held)
    }

    /// Release the table lock held by `txn` on `oid`
    pub fn unlock_table(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
    ) -> Result<bool, TransactionError> {
        let mode = match txn.table_lock_mode(oid) {
            Some(mode) => mode,
            None => return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld)),
        };
        if txn.holds_row_locks_on(oid) {
            return Err(self.abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let queue = self.table_queue(oid);
        {
            let mut state = queue.state.lock();
            state.requests.retain(|r| r.txn.id() != txn.id());
            queue.cv.notify_all();
        }
        txn.remove_table_lock(mode, oid);
        self.transition_on_unlock(txn, mode);
        log::trace!("txn {} released {:?} on table {}", txn.id(), mode, oid);
        Ok(true)
    }

    /// Acquire (or upgrade to) `mode` on a row. Row locks are restricted to
    /// S and X and require an appropriate table lock.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        if txn.state() == TransactionState::Aborted {
            return Ok(false);
        }
        self.check_acquire_rules(txn, mode, oid, Some(rid))?;

        let held = txn.row_lock_mode(oid, rid);
        if let Some(current) = held {
            if current == mode {
                return Ok(true);
            }
            if !current.can_upgrade_to(mode) {
                return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
            }
        }

        let queue = self.row_queue(rid);
        self.acquire(txn, &queue, mode, oid, Some(rid), held)
    }

    /// Release the row lock held by `txn` on `rid`
    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionError> {
        let mode = match txn.row_lock_mode(oid, rid) {
            Some(mode) => mode,
            None => return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld)),
        };

        let queue = self.row_queue(rid);
        {
            let mut state = queue.state.lock();
            state.requests.retain(|r| r.txn.id() != txn.id());
            queue.cv.notify_all();
        }
        txn.remove_row_lock(mode, oid, rid);
        self.transition_on_unlock(txn, mode);
        log::trace!("txn {} released {:?} on row {:?}", txn.id(), mode, rid);
        Ok(true)
    }

    /// Strip every lock and queued request of `txn` without enforcing unlock
    /// rules or changing 2PL state: the commit/abort release path. Rows are
    /// released before tables.
    pub fn release_all(&self, txn: &Arc<Transaction>) {
        for (oid, rid, mode) in txn.row_locks_snapshot() {
            let queue = self.row_queue(rid);
            let mut state = queue.state.lock();
            state.requests.retain(|r| r.txn.id() != txn.id());
            if state.upgrading == Some(txn.id()) {
                state.upgrading = None;
            }
            queue.cv.notify_all();
            drop(state);
            txn.remove_row_lock(mode, oid, rid);
        }
        for (oid, mode) in txn.table_locks_snapshot() {
            let queue = self.table_queue(oid);
            let mut state = queue.state.lock();
            state.requests.retain(|r| r.txn.id() != txn.id());
            if state.upgrading == Some(txn.id()) {
                state.upgrading = None;
            }
            queue.cv.notify_all();
            drop(state);
            txn.remove_table_lock(mode, oid);
        }
    }

    /// Isolation-level and granularity preconditions, checked before any
    /// queueing. Violations abort the transaction.
    fn check_acquire_rules(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Option<Rid>,
    ) -> Result<(), TransactionError> {
        use LockMode::*;

        // Read-uncommitted takes no read locks at all
        if txn.isolation_level() == IsolationLevel::ReadUncommitted
            && matches!(mode, Shared | IntentionShared | SharedIntentionExclusive)
        {
            return Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted));
        }

        // Rows only ever carry S or X
        if rid.is_some() && !matches!(mode, Shared | Exclusive) {
            return Err(self.abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }

        if txn.state() == TransactionState::Shrinking {
            // Repeatable-read: no locks at all once shrinking
            if txn.isolation_level() == IsolationLevel::RepeatableRead {
                return Err(self.abort(txn, AbortReason::LockOnShrinking));
            }
            // Read-committed (and read-uncommitted): no write locks while
            // shrinking; IS/S remain allowed
            if matches!(mode, Exclusive | IntentionExclusive | SharedIntentionExclusive) {
                return Err(self.abort(txn, AbortReason::LockOnShrinking));
            }
        }

        // A row lock presupposes the right table lock
        if rid.is_some() {
            let table_mode = txn.table_lock_mode(oid);
            let satisfied = match mode {
                Exclusive => matches!(
                    table_mode,
                    Some(Exclusive) | Some(IntentionExclusive) | Some(SharedIntentionExclusive)
                ),
                Shared => table_mode.is_some(),
                _ => unreachable!("row locks are only S or X"),
            };
            if !satisfied {
                return Err(self.abort(txn, AbortReason::TableLockNotPresent));
            }
        }

        Ok(())
    }

    /// Queue a request (possibly replacing an upgraded one) and block until
    /// it is granted or the transaction is aborted.
    fn acquire(
        &self,
        txn: &Arc<Transaction>,
        queue: &Arc<LockRequestQueue>,
        mode: LockMode,
        oid: TableOid,
        rid: Option<Rid>,
        upgrade_from: Option<LockMode>,
    ) -> Result<bool, TransactionError> {
        let mut state = queue.state.lock();

        if let Some(old_mode) = upgrade_from {
            // Only one transaction may upgrade on a resource at a time
            if state.upgrading.is_some() {
                drop(state);
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            state.upgrading = Some(txn.id());

            // Drop the old request and bookkeeping, then queue the new
            // request at the first ungranted position so the upgrader keeps
            // priority over newer waiters
            state.requests.retain(|r| r.txn.id() != txn.id());
            match rid {
                Some(rid) => txn.remove_row_lock(old_mode, oid, rid),
                None => txn.remove_table_lock(old_mode, oid),
            }
            let pos = state
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(state.requests.len());
            state.requests.insert(
                pos,
                LockRequest {
                    txn: Arc::clone(txn),
                    mode,
                    oid,
                    rid,
                    granted: false,
                },
            );
        } else {
            state.requests.push_back(LockRequest {
                txn: Arc::clone(txn),
                mode,
                oid,
                rid,
                granted: false,
            });
        }

        loop {
            if txn.state() == TransactionState::Aborted {
                // Aborted while waiting (deadlock victim or rule violation
                // elsewhere): withdraw and let others proceed
                state.requests.retain(|r| r.txn.id() != txn.id());
                if state.upgrading == Some(txn.id()) {
                    state.upgrading = None;
                }
                queue.cv.notify_all();
                return Ok(false);
            }
            if Self::grantable(&state, txn.id()) {
                if let Some(request) = state
                    .requests
                    .iter_mut()
                    .find(|r| r.txn.id() == txn.id())
                {
                    request.granted = true;
                }
                break;
            }
            queue.cv.wait(&mut state);
        }

        if state.upgrading == Some(txn.id()) {
            state.upgrading = None;
        }
        drop(state);

        match rid {
            Some(rid) => txn.add_row_lock(mode, oid, rid),
            None => txn.add_table_lock(mode, oid),
        }
        log::trace!(
            "txn {} granted {:?} on table {} row {:?}",
            txn.id(),
            mode,
            oid,
            rid
        );
        Ok(true)
    }

    /// A request may be granted when every earlier live request in the queue
    /// is compatible with it; this holds FIFO even across grant waves.
    fn grantable(state: &QueueState, txn_id: TxnId) -> bool {
        let mut mode = None;
        for request in &state.requests {
            if request.txn.id() == txn_id {
                mode = Some(request.mode);
                break;
            }
        }
        let Some(mode) = mode else {
            return false;
        };

        for request in &state.requests {
            if request.txn.id() == txn_id {
                return true;
            }
            if request.txn.state() == TransactionState::Aborted {
                continue;
            }
            if !request.mode.compatible_with(mode) {
                return false;
            }
        }
        true
    }

    /// SS2PL state transition on release: dropping X moves the transaction
    /// to shrinking at every isolation level; dropping S does so only under
    /// repeatable-read. Other modes leave the state untouched.
    fn transition_on_unlock(&self, txn: &Arc<Transaction>, mode: LockMode) {
        if txn.state() != TransactionState::Growing {
            return;
        }
        match mode {
            LockMode::Exclusive => txn.set_state(TransactionState::Shrinking),
            LockMode::Shared => {
                if txn.isolation_level() == IsolationLevel::RepeatableRead {
                    txn.set_state(TransactionState::Shrinking);
                }
            }
            _ => {}
        }
    }

    /// Set the transaction aborted and build the matching error
    fn abort(&self, txn: &Arc<Transaction>, reason: AbortReason) -> TransactionError {
        txn.set_state(TransactionState::Aborted);
        log::debug!("txn {} aborted: {}", txn.id(), reason);
        TransactionError::Aborted {
            txn_id: txn.id(),
            reason,
        }
    }

    pub(super) fn table_queue(&self, oid: TableOid) -> Arc<LockRequestQueue> {
        let mut map = self.table_locks.lock();
        Arc::clone(map.entry(oid).or_insert_with(|| Arc::new(LockRequestQueue::new())))
    }

    pub(super) fn row_queue(&self, rid: Rid) -> Arc<LockRequestQueue> {
        let mut map = self.row_locks.lock();
        Arc::clone(map.entry(rid).or_insert_with(|| Arc::new(LockRequestQueue::new())))
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.shutdown.signal();
        if let Some(handle) = self.detector.get_mut().take() {
            // The detector briefly upgrades its weak reference each pass; if
            // it holds the final strong reference this drop runs on the
            // detector thread itself, which must not join itself
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}
