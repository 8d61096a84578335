//! Committing the parts of a write.
//!
//! Three protocols, picked from the table and the write target:
//!
//! - plain insert: tables without a unique key; parts become visible on commit
//! - staged insert: parts land in the staging area, where an asynchronous
//!   worker deduplicates them later
//! - locked upsert: lock the dedup scope, dedup against every existing part,
//!   then publish bitmaps and parts in one commit

use crate::dedup::DedupCoordinator;
use crate::services::WriteServices;
use mtree_result::{Error, Result};
use mtree_transaction::{CommitOutcome, PlainCommitMode, WriteTransaction};
use mtree_types::{
    DedupScope, LocalDeleteBitmap, Part, PartInfo, PartState, TableMetadata, TxnId,
};
use std::fmt;
use std::time::Instant;

/// How a write's parts are committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitProtocol {
    PlainInsert,
    StagedInsert,
    LockedUpsert,
}

impl CommitProtocol {
    pub fn for_table(table: &TableMetadata, to_staging_area: bool) -> Self {
        if to_staging_area {
            CommitProtocol::StagedInsert
        } else if table.has_unique_key() {
            CommitProtocol::LockedUpsert
        } else {
            CommitProtocol::PlainInsert
        }
    }

    /// Part state on commit.
    pub fn destination(self) -> PartState {
        match self {
            CommitProtocol::StagedInsert => PartState::Staged,
            CommitProtocol::PlainInsert | CommitProtocol::LockedUpsert => PartState::Visible,
        }
    }
}

impl fmt::Display for CommitProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitProtocol::PlainInsert => write!(f, "plain insert"),
            CommitProtocol::StagedInsert => write!(f, "staged insert"),
            CommitProtocol::LockedUpsert => write!(f, "locked upsert"),
        }
    }
}

/// What a commit did.
#[derive(Debug, Clone)]
pub struct CommitResult {
    pub txn_id: TxnId,
    pub outcome: CommitOutcome,
    pub destination: PartState,
    pub parts: Vec<PartInfo>,
    /// Scope the upsert deduplicated under, if it took locks.
    pub scope: Option<DedupScope>,
}

pub struct TransactionCommitter {
    services: WriteServices,
    to_staging_area: bool,
}

impl TransactionCommitter {
    pub fn new(services: WriteServices, to_staging_area: bool) -> Self {
        Self {
            services,
            to_staging_area,
        }
    }

    pub fn protocol(&self, table: &TableMetadata) -> CommitProtocol {
        CommitProtocol::for_table(table, self.to_staging_area)
    }

    /// Commit `parts` under `txn`.
    ///
    /// A failure other than the insertion-label conflict aborts `txn`; none
    /// of the parts become visible.
    pub fn commit_write(
        &self,
        parts: Vec<Part>,
        table: &TableMetadata,
        txn: &mut WriteTransaction,
    ) -> Result<CommitResult> {
        let protocol = self.protocol(table);
        let started = Instant::now();
        let result = match protocol {
            CommitProtocol::PlainInsert | CommitProtocol::StagedInsert => {
                self.commit_insert(parts, table, txn, protocol.destination())
            }
            CommitProtocol::LockedUpsert => self.commit_upsert(parts, table, txn),
        };

        match result {
            Ok(result) => {
                tracing::debug!(
                    txn_id = txn.id(),
                    %protocol,
                    outcome = ?result.outcome,
                    parts = result.parts.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "[TXN] write finished"
                );
                Ok(result)
            }
            Err(err) => {
                tracing::warn!(txn_id = txn.id(), %protocol, "[TXN] write failed: {}", err);
                if txn.is_pending() {
                    if let Err(abort_err) = txn.abort(self.services.commit_sink.as_ref()) {
                        tracing::warn!(txn_id = txn.id(), "[TXN] abort failed: {}", abort_err);
                    }
                }
                Err(err)
            }
        }
    }

    /// Commit parts left pending by a deferred plain insert, once the owner
    /// of the transaction decides to.
    pub fn commit_deferred(
        &self,
        parts: Vec<Part>,
        table: &TableMetadata,
        txn: &mut WriteTransaction,
    ) -> Result<CommitResult> {
        let destination = self.protocol(table).destination();
        let infos = part_infos(&parts);
        self.publish_markers(txn, &parts)?;
        let outcome = txn.commit(
            self.services.commit_sink.as_ref(),
            table.table_id,
            parts,
            destination,
        )?;
        Ok(CommitResult {
            txn_id: txn.id(),
            outcome,
            destination,
            parts: infos,
            scope: None,
        })
    }

    fn commit_insert(
        &self,
        parts: Vec<Part>,
        table: &TableMetadata,
        txn: &mut WriteTransaction,
        destination: PartState,
    ) -> Result<CommitResult> {
        let infos = part_infos(&parts);
        let mode = txn
            .kind()
            .plain_commit_mode(self.services.settings.disable_transaction_commit);

        let outcome = match mode {
            PlainCommitMode::Eager => {
                self.publish_markers(txn, &parts)?;
                txn.commit(
                    self.services.commit_sink.as_ref(),
                    table.table_id,
                    parts,
                    destination,
                )?
            }
            PlainCommitMode::Deferred => CommitOutcome::Pending,
            PlainCommitMode::Unsupported => {
                tracing::warn!(
                    txn_id = txn.id(),
                    kind = ?txn.kind(),
                    "[TXN] transaction kind cannot commit a plain insert, leaving it pending"
                );
                CommitOutcome::Pending
            }
        };

        Ok(CommitResult {
            txn_id: txn.id(),
            outcome,
            destination,
            parts: infos,
            scope: None,
        })
    }

    fn commit_upsert(
        &self,
        parts: Vec<Part>,
        table: &TableMetadata,
        txn: &mut WriteTransaction,
    ) -> Result<CommitResult> {
        if let Some(None) = txn.kind().commit_endpoint() {
            return Err(Error::TransactionContextError(format!(
                "transaction {} was forwarded without an rpc endpoint",
                txn.id()
            )));
        }

        let ts = self.services.catalog.current_timestamp();
        let table = self
            .services
            .catalog
            .lookup_table(table.table_id, ts)?
            .ok_or_else(|| Error::TableDropped(table.name.clone()))?;

        let infos = part_infos(&parts);
        let sink = self.services.commit_sink.as_ref();

        if parts.is_empty() {
            let outcome = txn.commit(sink, table.table_id, parts, PartState::Visible)?;
            return Ok(CommitResult {
                txn_id: txn.id(),
                outcome,
                destination: PartState::Visible,
                parts: infos,
                scope: None,
            });
        }

        let mut dedup = DedupCoordinator::new(&self.services).dedup(&table, txn.id(), &parts)?;
        let staged = part_infos(&dedup.staged);
        let bitmaps = std::mem::take(&mut dedup.bitmaps);
        tracing::debug!(
            txn_id = txn.id(),
            staged = staged.len(),
            bitmaps = bitmaps.len(),
            attempts = dedup.attempts,
            "[DEDUP] publishing"
        );
        self.services
            .publisher
            .publish_staged_parts(txn.id(), &staged, bitmaps)?;

        let started = Instant::now();
        let outcome = txn.commit(sink, table.table_id, parts, PartState::Visible)?;
        tracing::debug!(
            txn_id = txn.id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "[TXN] upsert commit"
        );
        dedup.lock.unlock()?;

        Ok(CommitResult {
            txn_id: txn.id(),
            outcome,
            destination: PartState::Visible,
            parts: infos,
            scope: Some(dedup.scope),
        })
    }

    /// Publish each part's delete markers as its base bitmap.
    fn publish_markers(&self, txn: &WriteTransaction, parts: &[Part]) -> Result<()> {
        let bitmaps: Vec<LocalDeleteBitmap> = parts
            .iter()
            .filter_map(|part| {
                part.delete_bitmap
                    .as_ref()
                    .map(|bitmap| LocalDeleteBitmap::base(part.info.clone(), bitmap.clone()))
            })
            .collect();
        if bitmaps.is_empty() {
            return Ok(());
        }
        self.services
            .publisher
            .publish_staged_parts(txn.id(), &[], bitmaps)
    }
}

fn part_infos(parts: &[Part]) -> Vec<PartInfo> {
    parts.iter().map(|p| p.info.clone()).collect()
}
