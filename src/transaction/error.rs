use std::fmt;

use thiserror::Error;

use crate::common::types::TxnId;

/// Why a transaction was aborted by the lock manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    UpgradeConflict,
    IncompatibleUpgrade,
    LockSharedOnReadUncommitted,
    AttemptedUnlockButNoLockHeld,
    TableUnlockedBeforeUnlockingRows,
    AttemptedIntentionLockOnRow,
    TableLockNotPresent,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AbortReason::LockOnShrinking => "lock requested while shrinking",
            AbortReason::UpgradeConflict => "another upgrade is in progress on the resource",
            AbortReason::IncompatibleUpgrade => "requested lock upgrade is incompatible",
            AbortReason::LockSharedOnReadUncommitted => {
                "shared lock requested under READ UNCOMMITTED"
            }
            AbortReason::AttemptedUnlockButNoLockHeld => "unlock requested but no lock held",
            AbortReason::TableUnlockedBeforeUnlockingRows => {
                "table unlocked before unlocking its rows"
            }
            AbortReason::AttemptedIntentionLockOnRow => "intention lock requested on a row",
            AbortReason::TableLockNotPresent => "required table lock not present",
        };
        write!(f, "{}", text)
    }
}

/// Typed abort surfaced to the executor boundary; the transaction's state
/// has already been set to ABORTED when this is raised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbort {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

impl TransactionAbort {
    pub fn new(txn_id: TxnId, reason: AbortReason) -> Self {
        Self { txn_id, reason }
    }
}
