//! Cross-part unique-key dedup under dedup-scope locks.
//!
//! An upsert first locks the key space its new parts may collide with, then
//! reads every visible and staged part inside that space at a timestamp taken
//! after the lock was granted. Any part committed before the lock is therefore
//! seen, and no part committed after it can hold a colliding key until this
//! write releases the lock.
//!
//! Bucket locks are narrow: they are only correct when every existing part in
//! the scope is bucketed by the current clustering. When that check fails the
//! locks are released and the scope is widened to partition or table level.

use crate::part_builder::thread_pool;
use crate::scope::LockScopeResolver;
use crate::services::WriteServices;
use crate::unique_key::{KeyEncoder, u64_column, version_at};
use arrow::array::{Array, UInt64Array};
use arrow::row::{OwnedRow, Rows};
use mtree_catalog::{Catalog, LockHolder, LockService};
use mtree_result::{Error, Result};
use mtree_storage::{PartReader, delete_flags};
use mtree_types::{
    BlockId, BucketNumber, DedupScope, DeleteBitmap, LocalDeleteBitmap, Part, TableMetadata,
    TxnId, VersionMode, WriteSettings,
};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Instant;

/// Where a candidate row comes from. Later sources win ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Source {
    Visible = 0,
    Staged = 1,
    New = 2,
}

/// Ordering of rows sharing a unique key; the greatest survives.
///
/// `(forced_delete, version, source, primary_txn_id, block_id, row)`
type Rank = (bool, u64, Source, TxnId, BlockId, u32);

/// Parts that only collide with each other.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey {
    partition: Option<String>,
    bucket: Option<BucketNumber>,
}

struct Candidate<'a> {
    part: &'a Part,
    source: Source,
}

/// Result of a successful lock/fetch/dedup pass.
///
/// `lock` is still held; the caller releases it once the commit is done.
#[derive(Debug)]
pub struct DedupOutcome {
    pub scope: DedupScope,
    pub lock: LockHolder,
    pub visible: Vec<Part>,
    pub staged: Vec<Part>,
    pub bitmaps: Vec<LocalDeleteBitmap>,
    /// Lock/fetch/validate passes it took to settle the scope.
    pub attempts: usize,
}

struct LockedScope {
    scope: DedupScope,
    lock: LockHolder,
    visible: Vec<Part>,
    staged: Vec<Part>,
    attempts: usize,
}

pub struct DedupCoordinator {
    catalog: Arc<dyn Catalog>,
    locks: Arc<dyn LockService>,
    reader: Arc<dyn PartReader>,
    settings: WriteSettings,
}

impl DedupCoordinator {
    pub fn new(services: &WriteServices) -> Self {
        Self {
            catalog: Arc::clone(&services.catalog),
            locks: Arc::clone(&services.locks),
            reader: Arc::clone(&services.reader),
            settings: services.settings.clone(),
        }
    }

    /// Lock the scope of `new_parts`, fetch the existing parts inside it, and
    /// compute the delete bitmaps that leave one row alive per unique key.
    pub fn dedup(
        &self,
        table: &TableMetadata,
        txn_id: TxnId,
        new_parts: &[Part],
    ) -> Result<DedupOutcome> {
        let locked = self.lock_scope(table, txn_id, new_parts)?;

        let started = Instant::now();
        let bitmaps = self.dedup_parts(
            table,
            txn_id,
            &locked.scope,
            &locked.visible,
            &locked.staged,
            new_parts,
        )?;
        tracing::debug!(
            txn_id,
            scope = %locked.scope,
            visible = locked.visible.len(),
            staged = locked.staged.len(),
            new = new_parts.len(),
            bitmaps = bitmaps.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "[DEDUP] cross-part dedup done"
        );

        Ok(DedupOutcome {
            scope: locked.scope,
            lock: locked.lock,
            visible: locked.visible,
            staged: locked.staged,
            bitmaps,
            attempts: locked.attempts,
        })
    }

    fn lock_scope(
        &self,
        table: &TableMetadata,
        txn_id: TxnId,
        new_parts: &[Part],
    ) -> Result<LockedScope> {
        let resolver = LockScopeResolver::new(table);
        let max_attempts = self.settings.max_dedup_scope_retries.max(1);
        let mut force_normal = false;

        for attempt in 1..=max_attempts {
            let scope = resolver.resolve_scope(new_parts, force_normal);
            let requests = resolver.lock_requests(&scope);

            let started = Instant::now();
            let mut lock =
                self.locks
                    .acquire(txn_id, requests, self.settings.lock_acquire_timeout)?;
            tracing::debug!(
                txn_id,
                attempt,
                scope = %scope,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "[LOCK] acquired dedup scope"
            );

            let ts = self.catalog.current_timestamp();
            let visible = self.catalog.list_visible_parts(table.table_id, &scope, ts)?;
            let staged = self.catalog.list_staged_parts(table.table_id, &scope, ts)?;

            if scope.is_bucket_lock() && !resolver.check_bucket_parts(&visible, &staged) {
                lock.unlock()?;
                force_normal = true;
                tracing::info!(
                    txn_id,
                    attempt,
                    "[DEDUP] existing parts do not match bucket layout, retrying with normal lock"
                );
                continue;
            }

            return Ok(LockedScope {
                scope,
                lock,
                visible,
                staged,
                attempts: attempt,
            });
        }

        Err(Error::DedupScopeUnstable {
            attempts: max_attempts,
        })
    }

    /// Delete bitmaps resolving every unique key across `visible`, `staged`,
    /// and `new_parts`.
    ///
    /// New parts get `Base` bitmaps holding their delete markers plus the rows
    /// that lost; existing parts get `Delta` bitmaps stamped with `txn_id`.
    pub fn dedup_parts(
        &self,
        table: &TableMetadata,
        txn_id: TxnId,
        scope: &DedupScope,
        visible: &[Part],
        staged: &[Part],
        new_parts: &[Part],
    ) -> Result<Vec<LocalDeleteBitmap>> {
        let mut groups: BTreeMap<GroupKey, Vec<Candidate<'_>>> = BTreeMap::new();
        let sources = visible
            .iter()
            .map(|p| (p, Source::Visible))
            .chain(staged.iter().map(|p| (p, Source::Staged)))
            .chain(new_parts.iter().map(|p| (p, Source::New)));
        for (part, source) in sources {
            let key = GroupKey {
                partition: table
                    .partition_level_unique_keys
                    .then(|| part.info.partition_id.clone()),
                bucket: scope.is_bucket_lock().then(|| part.bucket_number()),
            };
            groups.entry(key).or_default().push(Candidate { part, source });
        }

        let groups: Vec<_> = groups.into_values().collect();
        let pool = thread_pool(self.settings.dedup_threads)?;
        let per_group = pool.install(|| {
            groups
                .par_iter()
                .map(|candidates| self.dedup_group(table, txn_id, candidates))
                .collect::<Result<Vec<_>>>()
        })?;

        let mut bitmaps: Vec<LocalDeleteBitmap> = per_group.into_iter().flatten().collect();
        bitmaps.sort_by(|a, b| a.part.cmp(&b.part));
        Ok(bitmaps)
    }

    fn dedup_group(
        &self,
        table: &TableMetadata,
        txn_id: TxnId,
        candidates: &[Candidate<'_>],
    ) -> Result<Vec<LocalDeleteBitmap>> {
        let encoder = KeyEncoder::unique_key(table)?;

        let mut loaded: Vec<(Rows, Vec<(u32, Rank)>)> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            loaded.push(self.load_candidate(table, &encoder, candidate)?);
        }

        let mut winners: FxHashMap<OwnedRow, (Rank, usize)> = FxHashMap::default();
        for (idx, (keys, ranks)) in loaded.iter().enumerate() {
            for &(row, rank) in ranks {
                match winners.entry(keys.row(row as usize).owned()) {
                    Entry::Occupied(mut best) => {
                        if best.get().0 < rank {
                            best.insert((rank, idx));
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert((rank, idx));
                    }
                }
            }
        }

        let mut bitmaps = Vec::new();
        for (idx, ((keys, ranks), candidate)) in loaded.iter().zip(candidates).enumerate() {
            let mut marks = DeleteBitmap::new();
            for &(row, rank) in ranks {
                let won = winners
                    .get(&keys.row(row as usize).owned())
                    .is_some_and(|best| best.1 == idx && best.0 == rank);
                // Staged markers are already deleted by their base bitmap.
                let alive = candidate.source == Source::New || candidate.part.is_row_alive(row);
                if !won && alive {
                    marks.insert(row);
                }
            }

            let info = candidate.part.info.clone();
            match candidate.source {
                Source::New => {
                    if let Some(markers) = &candidate.part.delete_bitmap {
                        marks.union_with(markers);
                    }
                    if !marks.is_empty() {
                        bitmaps.push(LocalDeleteBitmap::base(info, marks));
                    }
                }
                Source::Visible | Source::Staged => {
                    if !marks.is_empty() {
                        tracing::trace!(
                            part = %info,
                            rows = marks.cardinality(),
                            "[DEDUP] rows superseded"
                        );
                        bitmaps.push(LocalDeleteBitmap::delta(info, txn_id, marks));
                    }
                }
            }
        }
        Ok(bitmaps)
    }

    /// Keys of a candidate part and the rank of each row taking part in dedup.
    fn load_candidate(
        &self,
        table: &TableMetadata,
        encoder: &KeyEncoder,
        candidate: &Candidate<'_>,
    ) -> Result<(Rows, Vec<(u32, Rank)>)> {
        let part = candidate.part;
        let batch = self.reader.read_part(part)?;
        let keys = encoder.encode(&batch)?;

        let versions: Option<UInt64Array> = match &table.version {
            VersionMode::Column(column) => Some(u64_column(&batch, column)?),
            _ => None,
        };
        // A staged part is promoted by the first dedup that reads it, so its
        // bitmap holds nothing but its own delete markers.
        let deletes = match candidate.source {
            Source::Visible => None,
            Source::Staged | Source::New => delete_flags(&batch)?,
        };

        let mut ranks = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let marker = deletes
                .as_ref()
                .is_some_and(|flags| flags.is_valid(row) && flags.value(row));
            let row = row as u32;
            // Deleted rows of existing parts take no part, except the markers
            // of staged parts: they still have to supersede older rows.
            if candidate.source != Source::New && !marker && !part.is_row_alive(row) {
                continue;
            }
            let version = match (&table.version, &versions) {
                (_, Some(values)) => version_at(values, row as usize),
                (VersionMode::PartitionValue, None) => part.partition_version.unwrap_or(0),
                _ => 0,
            };
            let forced_delete = marker && version == 0 && versions.is_some();
            ranks.push((
                row,
                (
                    forced_delete,
                    version,
                    candidate.source,
                    part.info.primary_txn_id,
                    part.info.block_id,
                    row,
                ),
            ));
        }
        Ok((keys, ranks))
    }
}
