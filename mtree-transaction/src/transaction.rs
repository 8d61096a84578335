//! The transaction a write is bound to.

use crate::kind::TransactionKind;
use crate::mvcc::{TxnIdManager, TxnStatus};
use mtree_result::{Error, Result};
use mtree_types::{Part, PartState, TableId, Timestamp, TxnId};
use std::time::Instant;

/// Result of committing a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Parts and bitmaps were applied atomically.
    Committed,
    /// Parts are written but the transaction awaits its owner's commit.
    Pending,
    /// The insertion label was already committed; nothing was applied.
    SoftConflict,
}

impl CommitOutcome {
    /// Whether this write's parts and bitmaps were applied.
    pub fn is_applied(self) -> bool {
        matches!(self, CommitOutcome::Committed)
    }
}

/// Everything a commit makes observable at once.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub txn_id: TxnId,
    pub table_id: TableId,
    pub label: Option<String>,
    pub parts: Vec<Part>,
    /// [`PartState::Visible`] or [`PartState::Staged`].
    pub destination: PartState,
}

/// Applies a commit atomically.
///
/// Delete bitmaps published for `txn_id` beforehand are applied in the same
/// step as the parts of the request.
pub trait CommitSink: Send + Sync {
    /// Returns the commit timestamp. Fails with
    /// [`Error::InsertionLabelExists`] when the label was committed before.
    fn commit(&self, request: CommitRequest) -> Result<Timestamp>;

    /// Forget anything published for `txn_id`.
    fn abort(&self, txn_id: TxnId) -> Result<()>;
}

/// A write transaction: `Pending` until a single transition to committed or
/// aborted.
#[derive(Debug)]
pub struct WriteTransaction {
    id: TxnId,
    primary_id: Option<TxnId>,
    kind: TransactionKind,
    label: Option<String>,
    status: TxnStatus,
    manager: TxnIdManager,
}

impl WriteTransaction {
    pub fn begin(manager: &TxnIdManager, kind: TransactionKind) -> Self {
        Self {
            id: manager.begin_transaction(),
            primary_id: None,
            kind,
            label: None,
            status: TxnStatus::Active,
            manager: manager.clone(),
        }
    }

    /// Begin a secondary transaction whose parts belong to `primary_id`.
    pub fn begin_secondary(
        manager: &TxnIdManager,
        kind: TransactionKind,
        primary_id: TxnId,
    ) -> Self {
        let mut txn = Self::begin(manager, kind);
        txn.primary_id = Some(primary_id);
        txn
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[inline]
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Id stamped on parts as their primary transaction.
    #[inline]
    pub fn primary_id(&self) -> TxnId {
        self.primary_id.unwrap_or(self.id)
    }

    #[inline]
    pub fn is_secondary(&self) -> bool {
        self.primary_id.is_some()
    }

    /// Id stamped on parts as their secondary transaction, if any.
    pub fn secondary_id(&self) -> Option<TxnId> {
        self.primary_id.map(|_| self.id)
    }

    pub fn kind(&self) -> &TransactionKind {
        &self.kind
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn status(&self) -> TxnStatus {
        self.status
    }

    pub fn is_pending(&self) -> bool {
        self.status.is_active()
    }

    pub fn manager(&self) -> &TxnIdManager {
        &self.manager
    }

    /// Commit `parts` to `destination` through `sink`.
    ///
    /// A label conflict is reported as [`CommitOutcome::SoftConflict`] and
    /// closes the transaction without applying anything.
    pub fn commit(
        &mut self,
        sink: &dyn CommitSink,
        table_id: TableId,
        parts: Vec<Part>,
        destination: PartState,
    ) -> Result<CommitOutcome> {
        self.ensure_pending("commit")?;
        let started = Instant::now();
        let request = CommitRequest {
            txn_id: self.id,
            table_id,
            label: self.label.clone(),
            parts,
            destination,
        };

        match sink.commit(request) {
            Ok(commit_ts) => {
                self.manager.mark_committed(self.id);
                self.status = TxnStatus::Committed;
                tracing::debug!(
                    txn_id = self.id,
                    commit_ts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "[TXN] committed"
                );
                Ok(CommitOutcome::Committed)
            }
            Err(err) if err.is_soft_conflict() => {
                tracing::info!(txn_id = self.id, "[TXN] {}, treated as success", err);
                self.manager.mark_aborted(self.id);
                self.status = TxnStatus::Aborted;
                Ok(CommitOutcome::SoftConflict)
            }
            Err(err) => Err(err),
        }
    }

    /// Abort the transaction. Aborting twice is a no-op.
    pub fn abort(&mut self, sink: &dyn CommitSink) -> Result<()> {
        match self.status {
            TxnStatus::Aborted => Ok(()),
            TxnStatus::Committed => Err(Error::TransactionContextError(format!(
                "transaction {} is already committed",
                self.id
            ))),
            _ => {
                self.manager.mark_aborted(self.id);
                self.status = TxnStatus::Aborted;
                tracing::debug!(txn_id = self.id, "[TXN] aborted");
                sink.abort(self.id)
            }
        }
    }

    fn ensure_pending(&self, op: &str) -> Result<()> {
        if self.status.is_active() {
            Ok(())
        } else {
            Err(Error::TransactionContextError(format!(
                "cannot {} transaction {} in state {:?}",
                op, self.id, self.status
            )))
        }
    }
}
