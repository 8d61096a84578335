//! Dedup-scope locks.

use mtree_result::{Error, Result};
use mtree_types::{LockRequest, TxnId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub type LockId = u64;

/// Exclusive locks over [`LockRequest`] key spaces.
pub trait LockService: Send + Sync {
    /// Acquire every request or none of them, waiting at most `timeout`.
    ///
    /// Fails with [`Error::LockAcquireFailed`] on timeout.
    fn acquire(
        &self,
        txn_id: TxnId,
        requests: Vec<LockRequest>,
        timeout: Duration,
    ) -> Result<LockHolder>;

    fn release(&self, txn_id: TxnId, ids: &[LockId]) -> Result<()>;
}

/// Locks held by one transaction. Released by [`LockHolder::unlock`] or on
/// drop.
pub struct LockHolder {
    txn_id: TxnId,
    requests: Vec<LockRequest>,
    ids: Vec<LockId>,
    service: Option<Arc<dyn LockService>>,
    acquired_at: Instant,
}

impl LockHolder {
    pub fn new(
        txn_id: TxnId,
        requests: Vec<LockRequest>,
        ids: Vec<LockId>,
        service: Arc<dyn LockService>,
    ) -> Self {
        Self {
            txn_id,
            requests,
            ids,
            service: Some(service),
            acquired_at: Instant::now(),
        }
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    pub fn requests(&self) -> &[LockRequest] {
        &self.requests
    }

    pub fn is_held(&self) -> bool {
        self.service.is_some()
    }

    /// Release the locks. Later calls are no-ops.
    pub fn unlock(&mut self) -> Result<()> {
        let Some(service) = self.service.take() else {
            return Ok(());
        };
        tracing::debug!(
            txn_id = self.txn_id,
            locks = self.ids.len(),
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "[LOCK] release"
        );
        service.release(self.txn_id, &self.ids)
    }
}

impl Drop for LockHolder {
    fn drop(&mut self) {
        if let Err(err) = self.unlock() {
            tracing::warn!(txn_id = self.txn_id, "[LOCK] release on drop failed: {}", err);
        }
    }
}

impl std::fmt::Debug for LockHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHolder")
            .field("txn_id", &self.txn_id)
            .field("requests", &self.requests)
            .field("held", &self.is_held())
            .finish()
    }
}

#[derive(Debug)]
struct HeldLock {
    id: LockId,
    txn_id: TxnId,
    request: LockRequest,
}

#[derive(Debug, Default)]
struct LockTable {
    held: Vec<HeldLock>,
}

impl LockTable {
    fn blocked(&self, txn_id: TxnId, requests: &[LockRequest]) -> bool {
        requests.iter().any(|request| {
            self.held
                .iter()
                .any(|h| h.txn_id != txn_id && h.request.conflicts_with(request))
        })
    }
}

#[derive(Debug, Default)]
struct MemLockInner {
    next_id: AtomicU64,
    table: Mutex<LockTable>,
    released: Condvar,
}

/// Process-local lock service.
///
/// A call either takes all of its requests at once or waits on a condition
/// variable until released locks let it, up to its timeout.
#[derive(Debug, Clone, Default)]
pub struct MemLockService {
    inner: Arc<MemLockInner>,
}

impl MemLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of locks currently held, across all transactions.
    pub fn held_count(&self) -> Result<usize> {
        Ok(self.lock_table()?.held.len())
    }

    fn lock_table(&self) -> Result<MutexGuard<'_, LockTable>> {
        self.inner
            .table
            .lock()
            .map_err(|_| Error::Internal("lock table poisoned".into()))
    }
}

impl LockService for MemLockService {
    fn acquire(
        &self,
        txn_id: TxnId,
        requests: Vec<LockRequest>,
        timeout: Duration,
    ) -> Result<LockHolder> {
        let deadline = Instant::now() + timeout;
        let mut table = self.lock_table()?;

        while table.blocked(txn_id, &requests) {
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(txn_id, ?requests, "[LOCK] acquire timed out");
                return Err(Error::LockAcquireFailed { txn_id });
            }
            let (guard, _) = self
                .inner
                .released
                .wait_timeout(table, deadline - now)
                .map_err(|_| Error::Internal("lock table poisoned".into()))?;
            table = guard;
        }

        let ids: Vec<LockId> = requests
            .iter()
            .map(|request| {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                table.held.push(HeldLock {
                    id,
                    txn_id,
                    request: request.clone(),
                });
                id
            })
            .collect();
        drop(table);

        tracing::debug!(txn_id, locks = ids.len(), "[LOCK] acquired");
        Ok(LockHolder::new(txn_id, requests, ids, Arc::new(self.clone())))
    }

    fn release(&self, txn_id: TxnId, ids: &[LockId]) -> Result<()> {
        let mut table = self.lock_table()?;
        table
            .held
            .retain(|h| !(h.txn_id == txn_id && ids.contains(&h.id)));
        drop(table);
        self.inner.released.notify_all();
        Ok(())
    }
}
