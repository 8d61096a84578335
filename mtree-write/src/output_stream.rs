//! The write stream a table insert feeds batches into.

use crate::committer::{CommitProtocol, CommitResult, TransactionCommitter};
use crate::part_builder::PartBuilder;
use crate::services::WriteServices;
use arrow::record_batch::RecordBatch;
use mtree_result::{Error, Result};
use mtree_transaction::{CommitOutcome, WriteTransaction};
use mtree_types::{Part, TableMetadata};

/// Lifecycle of a [`BlockOutputStream`].
///
/// `Building` moves to one of the three commit states when the suffix runs,
/// and from there to `Committed`. `Aborted` is reachable from every
/// non-terminal state. A deferred plain or staged insert stays in its commit
/// state until [`BlockOutputStream::commit_pending`] or
/// [`BlockOutputStream::abort`]; dropping the stream before either aborts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Building,
    PlainCommit,
    StagedCommit,
    LockedUpsertCommit,
    Committed,
    Aborted,
}

impl WriteState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WriteState::Committed | WriteState::Aborted)
    }

    fn committing(protocol: CommitProtocol) -> Self {
        match protocol {
            CommitProtocol::PlainInsert => WriteState::PlainCommit,
            CommitProtocol::StagedInsert => WriteState::StagedCommit,
            CommitProtocol::LockedUpsert => WriteState::LockedUpsertCommit,
        }
    }
}

/// Accepts batches for one table under one transaction and commits them
/// together.
///
/// ```ignore
/// let mut stream = BlockOutputStream::try_new(table, txn, services, false)?;
/// stream.write(&batch)?;
/// let result = stream.write_suffix()?;
/// ```
pub struct BlockOutputStream {
    table: TableMetadata,
    txn: WriteTransaction,
    services: WriteServices,
    builder: PartBuilder,
    committer: TransactionCommitter,
    parts: Vec<Part>,
    state: WriteState,
}

impl BlockOutputStream {
    /// Fails if `to_staging_area` is set for a table without a unique key:
    /// the staging area only exists to defer unique-key dedup.
    pub fn try_new(
        table: TableMetadata,
        txn: WriteTransaction,
        services: WriteServices,
        to_staging_area: bool,
    ) -> Result<Self> {
        if to_staging_area && !table.has_unique_key() {
            return Err(Error::InvalidArgumentError(format!(
                "table '{}' has no unique key, it cannot be written to the staging area",
                table.name
            )));
        }
        tracing::debug!(
            txn_id = txn.id(),
            table = %table.name,
            to_staging_area,
            "[TXN] write stream opened"
        );
        Ok(Self {
            builder: PartBuilder::new(&services),
            committer: TransactionCommitter::new(services.clone(), to_staging_area),
            table,
            txn,
            services,
            parts: Vec::new(),
            state: WriteState::Building,
        })
    }

    pub fn state(&self) -> WriteState {
        self.state
    }

    pub fn transaction(&self) -> &WriteTransaction {
        &self.txn
    }

    pub fn table(&self) -> &TableMetadata {
        &self.table
    }

    /// Temporary parts written so far and not yet committed.
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Build and persist the parts of `batch`. A failure aborts the stream.
    pub fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        self.ensure_state(WriteState::Building, "write to")?;
        match self.builder.build_parts(batch, &self.table, &self.txn) {
            Ok(parts) => {
                self.parts.extend(parts);
                Ok(())
            }
            Err(err) => {
                self.abort_quietly();
                Err(err)
            }
        }
    }

    /// Commit every part written so far.
    ///
    /// A repeated insertion label is not an error: the result carries
    /// [`CommitOutcome::SoftConflict`] and this write's parts are dropped.
    pub fn write_suffix(&mut self) -> Result<CommitResult> {
        self.ensure_state(WriteState::Building, "finish")?;
        self.state = WriteState::committing(self.committer.protocol(&self.table));

        let parts = self.parts.clone();
        match self.committer.commit_write(parts, &self.table, &mut self.txn) {
            Ok(result) => {
                match result.outcome {
                    CommitOutcome::Committed => {
                        self.parts.clear();
                        self.state = WriteState::Committed;
                    }
                    CommitOutcome::SoftConflict => {
                        self.discard_parts();
                        self.state = WriteState::Committed;
                    }
                    CommitOutcome::Pending => {}
                }
                Ok(result)
            }
            Err(err) => {
                self.discard_parts();
                self.state = WriteState::Aborted;
                Err(err)
            }
        }
    }

    /// Commit a write whose suffix left the transaction pending.
    pub fn commit_pending(&mut self) -> Result<CommitResult> {
        if !matches!(
            self.state,
            WriteState::PlainCommit | WriteState::StagedCommit
        ) || !self.txn.is_pending()
        {
            return Err(Error::TransactionContextError(format!(
                "transaction {} has no pending write to commit (state {:?})",
                self.txn.id(),
                self.state
            )));
        }

        let parts = self.parts.clone();
        match self.committer.commit_deferred(parts, &self.table, &mut self.txn) {
            Ok(result) => {
                if result.outcome == CommitOutcome::SoftConflict {
                    self.discard_parts();
                }
                self.parts.clear();
                self.state = WriteState::Committed;
                Ok(result)
            }
            Err(err) => {
                self.abort_quietly();
                Err(err)
            }
        }
    }

    /// Abort the transaction and drop every temporary part.
    pub fn abort(&mut self) -> Result<()> {
        if self.state == WriteState::Aborted {
            return Ok(());
        }
        if self.state == WriteState::Committed {
            return Err(Error::TransactionContextError(format!(
                "transaction {} is already committed",
                self.txn.id()
            )));
        }
        self.discard_parts();
        self.state = WriteState::Aborted;
        if self.txn.is_pending() {
            self.txn.abort(self.services.commit_sink.as_ref())?;
        }
        Ok(())
    }

    fn abort_quietly(&mut self) {
        if let Err(err) = self.abort() {
            tracing::warn!(txn_id = self.txn.id(), "[TXN] abort failed: {}", err);
        }
    }

    fn discard_parts(&mut self) {
        let parts = std::mem::take(&mut self.parts);
        if let Err(err) = self.services.writer.discard(&parts) {
            tracing::warn!(
                txn_id = self.txn.id(),
                parts = parts.len(),
                "[PART_STORE] discard failed: {}",
                err
            );
        }
    }

    fn ensure_state(&self, expected: WriteState, op: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::TransactionContextError(format!(
                "cannot {} write stream of transaction {} in state {:?}",
                op,
                self.txn.id(),
                self.state
            )))
        }
    }
}

impl Drop for BlockOutputStream {
    fn drop(&mut self) {
        // A pending commit can only be finished through this stream.
        if !self.state.is_terminal() {
            self.abort_quietly();
        }
    }
}
