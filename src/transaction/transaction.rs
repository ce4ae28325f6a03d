use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, MutexGuard};

use crate::common::types::{Rid, TableId, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Transaction states under strict two-phase locking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Locks held by a transaction, maintained by the lock manager.
#[derive(Debug, Default)]
pub struct LockSets {
    pub shared_tables: HashSet<TableId>,
    pub exclusive_tables: HashSet<TableId>,
    pub intention_shared_tables: HashSet<TableId>,
    pub intention_exclusive_tables: HashSet<TableId>,
    pub shared_intention_exclusive_tables: HashSet<TableId>,
    pub shared_rows: HashMap<TableId, HashSet<Rid>>,
    pub exclusive_rows: HashMap<TableId, HashSet<Rid>>,
}

impl LockSets {
    pub fn clear(&mut self) {
        self.shared_tables.clear();
        self.exclusive_tables.clear();
        self.intention_shared_tables.clear();
        self.intention_exclusive_tables.clear();
        self.shared_intention_exclusive_tables.clear();
        self.shared_rows.clear();
        self.exclusive_rows.clear();
    }

    /// Whether any row lock on the table is still held
    pub fn holds_rows_on(&self, table_id: TableId) -> bool {
        self.shared_rows
            .get(&table_id)
            .map_or(false, |rows| !rows.is_empty())
            || self
                .exclusive_rows
                .get(&table_id)
                .map_or(false, |rows| !rows.is_empty())
    }
}

/// An active database transaction: identifier, isolation level, 2PL state,
/// and the lock sets the lock manager maintains on its behalf.
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

    pub fn locks(&self) -> MutexGuard<'_, LockSets> {
        self.locks.lock()
    }
}
