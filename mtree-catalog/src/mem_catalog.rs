//! In-memory catalog: table definitions, the part arena and delete bitmaps.

use crate::traits::{Catalog, PartPublisher};
use mtree_result::{Error, Result};
use mtree_transaction::{CommitRequest, CommitSink, TxnIdManager};
use mtree_types::{
    DedupScope, DeleteBitmap, DeleteBitmapKind, LocalDeleteBitmap, Part, PartInfo, PartState,
    TableId, TableMetadata, Timestamp, TxnId,
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug)]
struct PartEntry {
    part: Part,
    /// State the part was committed to.
    committed_as: PartState,
    committed_at: Timestamp,
    /// When a staged part was promoted to visible.
    promoted_at: Option<Timestamp>,
}

impl PartEntry {
    fn state_at(&self, ts: Timestamp) -> Option<PartState> {
        if self.committed_at > ts {
            return None;
        }
        match (self.committed_as, self.promoted_at) {
            (PartState::Visible, _) => Some(PartState::Visible),
            (PartState::Staged, Some(promoted)) if promoted <= ts => Some(PartState::Visible),
            (PartState::Staged, _) => Some(PartState::Staged),
            (PartState::Temporary, _) => None,
        }
    }
}

#[derive(Debug)]
struct TableEntry {
    metadata: TableMetadata,
    created_at: Timestamp,
    dropped_at: Option<Timestamp>,
    parts: BTreeMap<PartInfo, PartEntry>,
    /// Delta bitmaps per part, stamped with their commit timestamp.
    deltas: FxHashMap<PartInfo, Vec<(Timestamp, DeleteBitmap)>>,
    labels: FxHashSet<String>,
}

impl TableEntry {
    fn exists_at(&self, ts: Timestamp) -> bool {
        self.created_at <= ts && self.dropped_at.is_none_or(|dropped| dropped > ts)
    }

    /// Snapshot handle of `entry` at `ts`, with base and delta deletions
    /// merged into one bitmap.
    fn snapshot_part(&self, entry: &PartEntry, state: PartState, ts: Timestamp) -> Part {
        let mut bitmap = entry.part.delete_bitmap.clone().unwrap_or_default();
        if let Some(deltas) = self.deltas.get(&entry.part.info) {
            for (_, delta) in deltas.iter().filter(|(at, _)| *at <= ts) {
                bitmap.union_with(delta);
            }
        }
        let mut part = entry.part.clone().with_state(state);
        part.delete_bitmap = (!bitmap.is_empty()).then_some(bitmap);
        part
    }

    fn list(&self, scope: &DedupScope, ts: Timestamp, wanted: PartState) -> Vec<Part> {
        self.parts
            .values()
            .filter(|entry| scope.contains(&entry.part.info))
            .filter_map(|entry| match entry.state_at(ts) {
                Some(state) if state == wanted => Some(self.snapshot_part(entry, state, ts)),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct PendingPublish {
    promote: Vec<PartInfo>,
    bitmaps: Vec<LocalDeleteBitmap>,
}

#[derive(Debug, Default)]
struct CatalogState {
    tables: FxHashMap<TableId, TableEntry>,
    pending: FxHashMap<TxnId, PendingPublish>,
}

/// Catalog held entirely in memory.
///
/// Commits are applied under one write lock, so a reader either sees every
/// part, promotion and bitmap of a transaction or none of them.
#[derive(Debug)]
pub struct MemCatalog {
    manager: TxnIdManager,
    state: RwLock<CatalogState>,
}

impl MemCatalog {
    /// Create a catalog drawing timestamps from `manager`.
    pub fn new(manager: TxnIdManager) -> Self {
        Self {
            manager,
            state: RwLock::new(CatalogState::default()),
        }
    }

    pub fn manager(&self) -> &TxnIdManager {
        &self.manager
    }

    pub fn create_table(&self, metadata: TableMetadata) -> Result<()> {
        let mut state = self.write_state()?;
        if state
            .tables
            .get(&metadata.table_id)
            .is_some_and(|t| t.dropped_at.is_none())
        {
            return Err(Error::CatalogError(format!(
                "table {} already exists",
                metadata.table_id
            )));
        }
        tracing::debug!(table_id = %metadata.table_id, name = %metadata.name, "[CATALOG] create table");
        let created_at = self.manager.next_timestamp();
        state.tables.insert(
            metadata.table_id,
            TableEntry {
                metadata,
                created_at,
                dropped_at: None,
                parts: BTreeMap::new(),
                deltas: FxHashMap::default(),
                labels: FxHashSet::default(),
            },
        );
        Ok(())
    }

    /// Replace the definition of a live table, e.g. after re-clustering.
    pub fn alter_table(&self, metadata: TableMetadata) -> Result<()> {
        let mut state = self.write_state()?;
        let entry = state
            .tables
            .get_mut(&metadata.table_id)
            .filter(|t| t.dropped_at.is_none())
            .ok_or_else(|| Error::TableDropped(metadata.name.clone()))?;
        entry.metadata = metadata;
        Ok(())
    }

    pub fn drop_table(&self, table_id: TableId) -> Result<()> {
        let mut state = self.write_state()?;
        let entry = state
            .tables
            .get_mut(&table_id)
            .ok_or_else(|| Error::CatalogError(format!("unknown table {}", table_id)))?;
        entry.dropped_at = Some(self.manager.next_timestamp());
        tracing::debug!(%table_id, "[CATALOG] drop table");
        Ok(())
    }

    /// Visible parts of the whole table at the current timestamp.
    pub fn visible_parts(&self, table_id: TableId) -> Result<Vec<Part>> {
        let ts = self.current_timestamp();
        self.list_visible_parts(table_id, &DedupScope::TableDedup, ts)
    }

    /// Staged parts of the whole table at the current timestamp.
    pub fn staged_parts(&self, table_id: TableId) -> Result<Vec<Part>> {
        let ts = self.current_timestamp();
        self.list_staged_parts(table_id, &DedupScope::TableDedup, ts)
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, CatalogState>> {
        self.state
            .read()
            .map_err(|_| Error::Internal("catalog state poisoned".into()))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, CatalogState>> {
        self.state
            .write()
            .map_err(|_| Error::Internal("catalog state poisoned".into()))
    }

    fn list(
        &self,
        table_id: TableId,
        scope: &DedupScope,
        ts: Timestamp,
        wanted: PartState,
    ) -> Result<Vec<Part>> {
        let state = self.read_state()?;
        let table = state
            .tables
            .get(&table_id)
            .filter(|t| t.exists_at(ts))
            .ok_or_else(|| Error::TableDropped(table_id.to_string()))?;
        Ok(table.list(scope, ts, wanted))
    }
}

impl Catalog for MemCatalog {
    fn lookup_table(&self, table_id: TableId, ts: Timestamp) -> Result<Option<TableMetadata>> {
        let state = self.read_state()?;
        Ok(state
            .tables
            .get(&table_id)
            .filter(|t| t.exists_at(ts))
            .map(|t| t.metadata.clone()))
    }

    fn list_visible_parts(
        &self,
        table_id: TableId,
        scope: &DedupScope,
        ts: Timestamp,
    ) -> Result<Vec<Part>> {
        self.list(table_id, scope, ts, PartState::Visible)
    }

    fn list_staged_parts(
        &self,
        table_id: TableId,
        scope: &DedupScope,
        ts: Timestamp,
    ) -> Result<Vec<Part>> {
        self.list(table_id, scope, ts, PartState::Staged)
    }

    fn current_timestamp(&self) -> Timestamp {
        self.manager.next_timestamp()
    }
}

impl PartPublisher for MemCatalog {
    fn publish_staged_parts(
        &self,
        txn_id: TxnId,
        staged: &[PartInfo],
        bitmaps: Vec<LocalDeleteBitmap>,
    ) -> Result<()> {
        let mut state = self.write_state()?;
        let pending = state.pending.entry(txn_id).or_default();
        pending.promote.extend(staged.iter().cloned());
        pending.bitmaps.extend(bitmaps);
        tracing::trace!(
            txn_id,
            promote = pending.promote.len(),
            bitmaps = pending.bitmaps.len(),
            "[CATALOG] published"
        );
        Ok(())
    }
}

impl CommitSink for MemCatalog {
    fn commit(&self, request: CommitRequest) -> Result<Timestamp> {
        let mut state = self.write_state()?;
        let CatalogState { tables, pending } = &mut *state;

        let now = self.manager.next_timestamp();
        let table = tables
            .get_mut(&request.table_id)
            .filter(|t| t.exists_at(now))
            .ok_or_else(|| Error::TableDropped(request.table_id.to_string()))?;

        if let Some(label) = request.label.as_ref().filter(|l| table.labels.contains(*l)) {
            pending.remove(&request.txn_id);
            return Err(Error::InsertionLabelExists(label.clone()));
        }

        // Validate everything before touching the arena.
        let publish = pending.remove(&request.txn_id).unwrap_or_default();
        if let Some(unknown) = publish.promote.iter().find(|i| !table.parts.contains_key(*i)) {
            return Err(Error::Internal(format!(
                "cannot promote unknown part {}",
                unknown
            )));
        }
        let mut parts: BTreeMap<PartInfo, Part> = request
            .parts
            .into_iter()
            .map(|p| (p.info.clone(), p))
            .collect();
        let mut deltas = Vec::new();
        for LocalDeleteBitmap { part, kind, bitmap } in publish.bitmaps {
            match kind {
                DeleteBitmapKind::Base => {
                    let target = parts.get_mut(&part).ok_or_else(|| {
                        Error::Internal(format!("base bitmap for unknown part {}", part))
                    })?;
                    target.delete_bitmap = (!bitmap.is_empty()).then_some(bitmap);
                }
                DeleteBitmapKind::Delta { .. } => {
                    if !table.parts.contains_key(&part) {
                        return Err(Error::Internal(format!(
                            "delta bitmap for unknown part {}",
                            part
                        )));
                    }
                    deltas.push((part, bitmap));
                }
            }
        }

        let commit_ts = now;
        for (info, part) in parts {
            table.parts.insert(
                info,
                PartEntry {
                    part: part.with_state(request.destination),
                    committed_as: request.destination,
                    committed_at: commit_ts,
                    promoted_at: None,
                },
            );
        }
        for info in &publish.promote {
            match table.parts.get_mut(info) {
                Some(entry) if entry.committed_as == PartState::Staged => {
                    entry.promoted_at.get_or_insert(commit_ts);
                }
                _ => {}
            }
        }
        for (info, bitmap) in deltas {
            table.deltas.entry(info).or_default().push((commit_ts, bitmap));
        }

        if let Some(label) = request.label {
            table.labels.insert(label);
        }

        tracing::debug!(
            txn_id = request.txn_id,
            table_id = %request.table_id,
            commit_ts,
            destination = ?request.destination,
            "[CATALOG] commit applied"
        );
        Ok(commit_ts)
    }

    fn abort(&self, txn_id: TxnId) -> Result<()> {
        self.write_state()?.pending.remove(&txn_id);
        Ok(())
    }
}
