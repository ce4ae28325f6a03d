use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TableId, TxnId};
use crate::transaction::error::{AbortReason, TransactionAbort};
use crate::transaction::transaction::{IsolationLevel, Transaction, TransactionState};

/// Lock modes for multi-granularity locking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

/// Lock manager configuration
#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    /// Deadlock detection interval
    pub detection_interval: Duration,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            detection_interval: Duration::from_millis(50),
        }
    }
}

/// Whether a `requested` lock can coexist with an already `held` lock
pub fn compatible(held: LockMode, requested: LockMode) -> bool {
    use LockMode::*;
    match (held, requested) {
        (IntentionShared, Exclusive) => false,
        (IntentionShared, _) => true,
        (IntentionExclusive, IntentionShared) | (IntentionExclusive, IntentionExclusive) => true,
        (IntentionExclusive, _) => false,
        (Shared, IntentionShared) | (Shared, Shared) => true,
        (Shared, _) => false,
        (SharedIntentionExclusive, IntentionShared) => true,
        (SharedIntentionExclusive, _) => false,
        (Exclusive, _) => false,
    }
}

/// Whether a held lock may be upgraded in place to the target mode
pub fn upgrade_allowed(held: LockMode, requested: LockMode) -> bool {
    use LockMode::*;
    matches!(
        (held, requested),
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

/// One lock request on a resource
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub txn_id: TxnId,
    pub mode: LockMode,
    pub table_id: TableId,
    pub rid: Option<Rid>,
    pub granted: bool,
}

impl LockRequest {
    fn table(txn_id: TxnId, mode: LockMode, table_id: TableId) -> Self {
        Self {
            txn_id,
            mode,
            table_id,
            rid: None,
            granted: false,
        }
    }

    fn row(txn_id: TxnId, mode: LockMode, table_id: TableId, rid: Rid) -> Self {
        Self {
            txn_id,
            mode,
            table_id,
            rid: Some(rid),
            granted: false,
        }
    }
}

pub(crate) struct QueueState {
    pub(crate) requests: VecDeque<LockRequest>,
    pub(crate) upgrading: Option<TxnId>,
}

/// FIFO request queue for one resource (a table or a row)
pub(crate) struct LockRequestQueue {
    pub(crate) state: Mutex<QueueState>,
    pub(crate) cv: Condvar,
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

/// Multi-granularity transactional lock manager: hierarchical intention
/// locks, in-place upgrades, strict two-phase locking under three isolation
/// levels, and cycle-based deadlock detection.
pub struct LockManager {
    pub(crate) table_locks: Mutex<HashMap<TableId, Arc<LockRequestQueue>>>,
    pub(crate) row_locks: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    pub(crate) active_txns: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            table_locks: Mutex::new(HashMap::new()),
            row_locks: Mutex::new(HashMap::new()),
            active_txns: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a table lock, blocking until granted. Returns Ok(false) if
    /// the transaction was aborted while waiting (e.g. chosen as a deadlock
    /// victim); admission violations return the typed abort.
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        table_id: TableId,
    ) -> Result<bool, TransactionAbort> {
        let mut table_map = self.table_locks.lock();
        self.check_table_admission(txn, mode)?;

        let queue = table_map
            .entry(table_id)
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone();
        self.active_txns.lock().insert(txn.id(), txn.clone());

        let mut state = queue.state.lock();
        drop(table_map);

        let mut upgrading = false;
        if let Some(pos) = state.requests.iter().position(|r| r.txn_id == txn.id()) {
            let held_mode = state.requests[pos].mode;
            if held_mode == mode {
                return Ok(true);
            }
            if state.upgrading.is_some() {
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            if !upgrade_allowed(held_mode, mode) {
                return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
            }
            Self::remove_table_entry(txn, held_mode, table_id);
            state.requests.remove(pos);
            state
                .requests
                .push_front(LockRequest::table(txn.id(), mode, table_id));
            state.upgrading = Some(txn.id());
            upgrading = true;
        } else {
            state
                .requests
                .push_back(LockRequest::table(txn.id(), mode, table_id));
        }

        while !Self::can_grant(&state, txn, mode) {
            queue.cv.wait(&mut state);
        }

        if upgrading {
            state.upgrading = None;
        }
        if txn.state() == TransactionState::Aborted {
            state.requests.retain(|r| r.txn_id != txn.id());
            queue.cv.notify_all();
            return Ok(false);
        }

        if let Some(request) = state.requests.iter_mut().find(|r| r.txn_id == txn.id()) {
            request.granted = true;
        }
        Self::insert_table_entry(txn, mode, table_id);
        log::debug!("txn {} locked table {} in {:?}", txn.id(), table_id, mode);
        Ok(true)
    }

    /// Release a table lock. All row locks on the table must already have
    /// been released.
    pub fn unlock_table(
        &self,
        txn: &Arc<Transaction>,
        table_id: TableId,
    ) -> Result<(), TransactionAbort> {
        let table_map = self.table_locks.lock();
        let queue = match table_map.get(&table_id) {
            Some(queue) => queue.clone(),
            None => return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld)),
        };
        let mut state = queue.state.lock();
        drop(table_map);

        let pos = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted);
        let pos = match pos {
            Some(pos) => pos,
            None => return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld)),
        };

        if txn.locks().holds_rows_on(table_id) {
            return Err(self.abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let mode = state.requests[pos].mode;
        state.requests.remove(pos);

        Self::apply_unlock_transition(txn, mode);
        Self::remove_table_entry(txn, mode, table_id);
        queue.cv.notify_all();
        log::debug!("txn {} unlocked table {}", txn.id(), table_id);
        Ok(())
    }

    /// Acquire a row lock (S or X only). An exclusive row lock requires a
    /// granted X, IX or SIX lock on the parent table.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        table_id: TableId,
        rid: Rid,
    ) -> Result<bool, TransactionAbort> {
        let mut row_map = self.row_locks.lock();

        if !matches!(mode, LockMode::Shared | LockMode::Exclusive) {
            return Err(self.abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }
        self.check_row_admission(txn, mode)?;

        if mode == LockMode::Exclusive {
            let table_map = self.table_locks.lock();
            let table_locked = table_map.get(&table_id).map_or(false, |queue| {
                queue.state.lock().requests.iter().any(|r| {
                    r.granted
                        && r.txn_id == txn.id()
                        && matches!(
                            r.mode,
                            LockMode::Exclusive
                                | LockMode::IntentionExclusive
                                | LockMode::SharedIntentionExclusive
                        )
                })
            });
            if !table_locked {
                return Err(self.abort(txn, AbortReason::TableLockNotPresent));
            }
        }

        let queue = row_map
            .entry(rid)
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone();
        self.active_txns.lock().insert(txn.id(), txn.clone());

        let mut state = queue.state.lock();
        drop(row_map);

        let mut upgrading = false;
        if let Some(pos) = state.requests.iter().position(|r| r.txn_id == txn.id()) {
            let held_mode = state.requests[pos].mode;
            if held_mode == mode {
                return Ok(true);
            }
            if state.upgrading.is_some() {
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            if !upgrade_allowed(held_mode, mode) {
                return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
            }
            Self::remove_row_entry(txn, held_mode, table_id, rid);
            state.requests.remove(pos);
            state
                .requests
                .push_front(LockRequest::row(txn.id(), mode, table_id, rid));
            state.upgrading = Some(txn.id());
            upgrading = true;
        } else {
            state
                .requests
                .push_back(LockRequest::row(txn.id(), mode, table_id, rid));
        }

        while !Self::can_grant(&state, txn, mode) {
            queue.cv.wait(&mut state);
        }

        if upgrading {
            state.upgrading = None;
        }
        if txn.state() == TransactionState::Aborted {
            state.requests.retain(|r| r.txn_id != txn.id());
            queue.cv.notify_all();
            return Ok(false);
        }

        if let Some(request) = state.requests.iter_mut().find(|r| r.txn_id == txn.id()) {
            request.granted = true;
        }
        Self::insert_row_entry(txn, mode, table_id, rid);
        log::debug!("txn {} locked row {:?} in {:?}", txn.id(), rid, mode);
        Ok(true)
    }

    /// Release a row lock.
    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        table_id: TableId,
        rid: Rid,
    ) -> Result<(), TransactionAbort> {
        let row_map = self.row_locks.lock();
        let queue = match row_map.get(&rid) {
            Some(queue) => queue.clone(),
            None => return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld)),
        };
        let mut state = queue.state.lock();
        drop(row_map);

        let pos = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted);
        let pos = match pos {
            Some(pos) => pos,
            None => return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld)),
        };

        let mode = state.requests[pos].mode;
        state.requests.remove(pos);

        Self::apply_unlock_transition(txn, mode);
        Self::remove_row_entry(txn, mode, table_id, rid);
        queue.cv.notify_all();
        Ok(())
    }

    /// Remove every request of the transaction from every queue, waking the
    /// affected waiters, and clear its lock sets. Used on commit, abort, and
    /// deadlock victim cleanup.
    pub fn release_all(&self, txn: &Arc<Transaction>) {
        let txn_id = txn.id();
        {
            let table_map = self.table_locks.lock();
            for queue in table_map.values() {
                Self::purge_queue(queue, txn_id);
            }
        }
        {
            let row_map = self.row_locks.lock();
            for queue in row_map.values() {
                Self::purge_queue(queue, txn_id);
            }
        }
        txn.locks().clear();
        self.active_txns.lock().remove(&txn_id);
    }

    fn purge_queue(queue: &LockRequestQueue, txn_id: TxnId) {
        let mut state = queue.state.lock();
        let before = state.requests.len();
        state.requests.retain(|r| r.txn_id != txn_id);
        if state.upgrading == Some(txn_id) {
            state.upgrading = None;
        }
        if state.requests.len() != before {
            queue.cv.notify_all();
        }
    }

    /// A request is grantable when every request queued before it is
    /// compatible and every already-granted request after it remains
    /// compatible. An aborted waiter is released from the wait loop.
    fn can_grant(state: &QueueState, txn: &Transaction, mode: LockMode) -> bool {
        if txn.state() == TransactionState::Aborted {
            return true;
        }
        let mut reached_self = false;
        for request in &state.requests {
            if request.txn_id == txn.id() {
                reached_self = true;
                continue;
            }
            if !reached_self {
                if !compatible(request.mode, mode) {
                    return false;
                }
            } else if request.granted && !compatible(request.mode, mode) {
                return false;
            }
        }
        true
    }

    fn check_table_admission(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
    ) -> Result<(), TransactionAbort> {
        let shrinking = txn.state() == TransactionState::Shrinking;
        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                if shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                if shrinking
                    && !matches!(mode, LockMode::Shared | LockMode::IntentionShared)
                {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadUncommitted => {
                if matches!(
                    mode,
                    LockMode::Shared
                        | LockMode::IntentionShared
                        | LockMode::SharedIntentionExclusive
                ) {
                    return Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted));
                }
                if shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
        }
        Ok(())
    }

    fn check_row_admission(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
    ) -> Result<(), TransactionAbort> {
        let shrinking = txn.state() == TransactionState::Shrinking;
        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                if shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                if shrinking && mode != LockMode::Shared {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadUncommitted => {
                if mode == LockMode::Shared {
                    return Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted));
                }
                if shrinking {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
            }
        }
        Ok(())
    }

    /// Under strict 2PL a release of a read-protecting lock ends the growing
    /// phase. REPEATABLE_READ transitions on S or X release; the weaker
    /// levels transition only on X release.
    fn apply_unlock_transition(txn: &Transaction, mode: LockMode) {
        if txn.state() != TransactionState::Growing {
            return;
        }
        let transition = match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                matches!(mode, LockMode::Shared | LockMode::Exclusive)
            }
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                mode == LockMode::Exclusive
            }
        };
        if transition {
            txn.set_state(TransactionState::Shrinking);
        }
    }

    fn insert_table_entry(txn: &Transaction, mode: LockMode, table_id: TableId) {
        let mut locks = txn.locks();
        match mode {
            LockMode::IntentionShared => locks.intention_shared_tables.insert(table_id),
            LockMode::IntentionExclusive => locks.intention_exclusive_tables.insert(table_id),
            LockMode::Shared => locks.shared_tables.insert(table_id),
            LockMode::SharedIntentionExclusive => {
                locks.shared_intention_exclusive_tables.insert(table_id)
            }
            LockMode::Exclusive => locks.exclusive_tables.insert(table_id),
        };
    }

    fn remove_table_entry(txn: &Transaction, mode: LockMode, table_id: TableId) {
        let mut locks = txn.locks();
        match mode {
            LockMode::IntentionShared => locks.intention_shared_tables.remove(&table_id),
            LockMode::IntentionExclusive => locks.intention_exclusive_tables.remove(&table_id),
            LockMode::Shared => locks.shared_tables.remove(&table_id),
            LockMode::SharedIntentionExclusive => {
                locks.shared_intention_exclusive_tables.remove(&table_id)
            }
            LockMode::Exclusive => locks.exclusive_tables.remove(&table_id),
        };
    }

    fn insert_row_entry(txn: &Transaction, mode: LockMode, table_id: TableId, rid: Rid) {
        let mut locks = txn.locks();
        match mode {
            LockMode::Shared => {
                locks.shared_rows.entry(table_id).or_default().insert(rid);
            }
            LockMode::Exclusive => {
                locks.exclusive_rows.entry(table_id).or_default().insert(rid);
            }
            _ => {}
        }
    }

    fn remove_row_entry(txn: &Transaction, mode: LockMode, table_id: TableId, rid: Rid) {
        let mut locks = txn.locks();
        let rows = match mode {
            LockMode::Shared => locks.shared_rows.get_mut(&table_id),
            LockMode::Exclusive => locks.exclusive_rows.get_mut(&table_id),
            _ => None,
        };
        if let Some(rows) = rows {
            rows.remove(&rid);
        }
    }

    fn abort(&self, txn: &Arc<Transaction>, reason: AbortReason) -> TransactionAbort {
        txn.set_state(TransactionState::Aborted);
        log::debug!("txn {} aborted: {}", txn.id(), reason);
        TransactionAbort::new(txn.id(), reason)
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatibility_matrix() {
        use LockMode::*;
        let modes = [
            IntentionShared,
            IntentionExclusive,
            Shared,
            SharedIntentionExclusive,
            Exclusive,
        ];
        // granted (row) x requested (column)
        let expected = [
            [true, true, true, true, false],
            [true, true, false, false, false],
            [true, false, true, false, false],
            [true, false, false, false, false],
            [false, false, false, false, false],
        ];
        for (i, &held) in modes.iter().enumerate() {
            for (j, &requested) in modes.iter().enumerate() {
                assert_eq!(
                    compatible(held, requested),
                    expected[i][j],
                    "held {:?} requested {:?}",
                    held,
                    requested
                );
            }
        }
    }

    #[test]
    fn test_upgrade_paths() {
        use LockMode::*;
        assert!(upgrade_allowed(IntentionShared, Shared));
        assert!(upgrade_allowed(IntentionShared, Exclusive));
        assert!(upgrade_allowed(IntentionShared, IntentionExclusive));
        assert!(upgrade_allowed(IntentionShared, SharedIntentionExclusive));
        assert!(upgrade_allowed(Shared, Exclusive));
        assert!(upgrade_allowed(Shared, SharedIntentionExclusive));
        assert!(upgrade_allowed(IntentionExclusive, Exclusive));
        assert!(upgrade_allowed(IntentionExclusive, SharedIntentionExclusive));
        assert!(upgrade_allowed(SharedIntentionExclusive, Exclusive));

        assert!(!upgrade_allowed(Shared, IntentionShared));
        assert!(!upgrade_allowed(Exclusive, Shared));
        assert!(!upgrade_allowed(SharedIntentionExclusive, Shared));
        assert!(!upgrade_allowed(IntentionExclusive, Shared));
    }
}
