//! Transaction id and timestamp allocation.
//!
//! Transaction ids and catalog read timestamps are drawn from one monotonic
//! sequence, so a timestamp taken after a transaction begins always orders
//! after that transaction's id. The manager also tracks the status of every
//! transaction it handed out.

use mtree_types::{Timestamp, TxnId};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Sentinel for "no transaction".
pub const TXN_ID_NONE: TxnId = TxnId::MAX;

/// First value handed out by a fresh manager.
pub const TXN_ID_MIN: TxnId = 1;

#[derive(Debug)]
struct Sequence {
    next: AtomicU64,
    /// Highest committed id; `0` before the first commit.
    high_water: AtomicU64,
    statuses: Mutex<FxHashMap<TxnId, TxnStatus>>,
}

impl Sequence {
    fn statuses(&self) -> MutexGuard<'_, FxHashMap<TxnId, TxnStatus>> {
        // Plain values only; a panic mid-insert leaves nothing torn.
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, txn_id: TxnId, status: TxnStatus) {
        self.statuses().insert(txn_id, status);
    }
}

/// Hands out transaction ids and timestamps and tracks commit status.
#[derive(Clone, Debug)]
pub struct TxnIdManager {
    seq: Arc<Sequence>,
}

impl TxnIdManager {
    pub fn new() -> Self {
        Self::starting_at(TXN_ID_MIN)
    }

    /// A manager whose sequence resumes at `next`, e.g. after reloading a
    /// catalog that already holds committed parts.
    pub fn starting_at(next: TxnId) -> Self {
        Self {
            seq: Arc::new(Sequence {
                next: AtomicU64::new(next.max(TXN_ID_MIN)),
                high_water: AtomicU64::new(0),
                statuses: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    pub fn begin_transaction(&self) -> TxnId {
        let txn_id = self.seq.next.fetch_add(1, Ordering::SeqCst);
        self.seq.set(txn_id, TxnStatus::Active);
        tracing::trace!(txn_id, "[TXN] begin");
        txn_id
    }

    /// A read timestamp ordered after every id and timestamp handed out so far.
    pub fn next_timestamp(&self) -> Timestamp {
        self.seq.next.fetch_add(1, Ordering::SeqCst)
    }

    pub fn status(&self, txn_id: TxnId) -> TxnStatus {
        if txn_id == TXN_ID_NONE {
            return TxnStatus::None;
        }
        self.seq
            .statuses()
            .get(&txn_id)
            .copied()
            .unwrap_or(TxnStatus::None)
    }

    pub fn mark_committed(&self, txn_id: TxnId) {
        self.seq.set(txn_id, TxnStatus::Committed);
        self.seq.high_water.fetch_max(txn_id, Ordering::SeqCst);
    }

    pub fn mark_aborted(&self, txn_id: TxnId) {
        self.seq.set(txn_id, TxnStatus::Aborted);
    }

    /// Highest committed id, `0` before the first commit.
    pub fn last_committed(&self) -> TxnId {
        self.seq.high_water.load(Ordering::SeqCst)
    }
}

impl Default for TxnIdManager {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Active,
    Committed,
    Aborted,
    None,
}

impl TxnStatus {
    pub fn is_committed(self) -> bool {
        matches!(self, TxnStatus::Committed)
    }

    pub fn is_active(self) -> bool {
        matches!(self, TxnStatus::Active)
    }

    pub fn is_aborted(self) -> bool {
        matches!(self, TxnStatus::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_txn_id_manager_allocates_monotonic_ids() {
        let manager = TxnIdManager::new();
        let t1 = manager.begin_transaction();
        let ts = manager.next_timestamp();
        let t2 = manager.begin_transaction();
        assert!(t1 < ts && ts < t2);
    }

    #[test]
    fn test_status_transitions() {
        let manager = TxnIdManager::new();
        let committed = manager.begin_transaction();
        let aborted = manager.begin_transaction();
        assert!(manager.status(committed).is_active());

        manager.mark_committed(committed);
        manager.mark_aborted(aborted);
        assert!(manager.status(committed).is_committed());
        assert!(manager.status(aborted).is_aborted());
        assert_eq!(manager.last_committed(), committed);
        assert_eq!(manager.status(TXN_ID_NONE), TxnStatus::None);
    }

    #[test]
    fn test_resumed_sequence() {
        let manager = TxnIdManager::starting_at(500);
        assert_eq!(manager.begin_transaction(), 500);
        assert!(manager.next_timestamp() > 500);
        assert_eq!(TxnIdManager::starting_at(0).begin_transaction(), TXN_ID_MIN);
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let manager = TxnIdManager::new();
        let mut ids: Vec<TxnId> = (0..256)
            .into_par_iter()
            .map(|i| {
                if i % 2 == 0 {
                    manager.begin_transaction()
                } else {
                    manager.next_timestamp()
                }
            })
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 256);
    }
}
