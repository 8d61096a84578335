//! Parts and delete bitmaps.
//!
//! A [`Part`] is written once and never modified. Rows are removed logically
//! by [`DeleteBitmap`]s that reference the part through its [`PartInfo`];
//! the bitmap is never owned by the part it deletes from, which keeps the
//! catalog an arena of parts keyed by `PartInfo` with no back-pointers.

use crate::ids::{BlockId, BucketNumber, TxnId, UNBUCKETED};
use croaring::Bitmap;
use std::fmt;

/// Identity of a part: `{partition_id, bucket_number, block_id, primary_txn_id}`.
///
/// Totally ordered so sets of parts iterate deterministically, and hashable so
/// it can key the catalog arena.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartInfo {
    pub partition_id: String,
    pub bucket_number: BucketNumber,
    pub block_id: BlockId,
    pub primary_txn_id: TxnId,
}

impl PartInfo {
    pub fn new(
        partition_id: impl Into<String>,
        bucket_number: BucketNumber,
        block_id: BlockId,
        primary_txn_id: TxnId,
    ) -> Self {
        Self {
            partition_id: partition_id.into(),
            bucket_number,
            block_id,
            primary_txn_id,
        }
    }

    #[inline]
    pub fn is_bucketed(&self) -> bool {
        self.bucket_number != UNBUCKETED
    }

    /// Human readable part name, used in logs.
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PartInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.partition_id, self.bucket_number, self.block_id, self.primary_txn_id
        )
    }
}

/// Lifecycle state of a part as seen by the write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartState {
    /// Just written, invisible to everyone.
    Temporary,
    /// Visible only to the asynchronous dedup worker.
    Staged,
    /// Visible to queries.
    Visible,
}

/// Positions of logically deleted rows within one part.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteBitmap {
    rows: Bitmap,
}

impl DeleteBitmap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = u32>) -> Self {
        Self {
            rows: rows.into_iter().collect(),
        }
    }

    #[inline]
    pub fn insert(&mut self, row: u32) {
        self.rows.add(row);
    }

    #[inline]
    pub fn contains(&self, row: u32) -> bool {
        self.rows.contains(row)
    }

    #[inline]
    pub fn cardinality(&self) -> u64 {
        self.rows.cardinality()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Merge another bitmap into this one.
    pub fn union_with(&mut self, other: &DeleteBitmap) {
        self.rows.or_inplace(&other.rows);
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.rows.to_vec()
    }
}

/// Whether a published bitmap replaces or extends a part's deletions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeleteBitmapKind {
    /// Full bitmap of a part written by the committing transaction.
    Base,
    /// Rows newly deleted from an existing part by `txn_id`.
    Delta { txn_id: TxnId },
}

/// A delete bitmap addressed to a part by key.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDeleteBitmap {
    pub part: PartInfo,
    pub kind: DeleteBitmapKind,
    pub bitmap: DeleteBitmap,
}

impl LocalDeleteBitmap {
    pub fn base(part: PartInfo, bitmap: DeleteBitmap) -> Self {
        Self {
            part,
            kind: DeleteBitmapKind::Base,
            bitmap,
        }
    }

    pub fn delta(part: PartInfo, txn_id: TxnId, bitmap: DeleteBitmap) -> Self {
        Self {
            part,
            kind: DeleteBitmapKind::Delta { txn_id },
            bitmap,
        }
    }
}

/// An immutable set of rows written once by one transaction.
///
/// `delete_bitmap` holds the rows of this part that are logically deleted as
/// of the snapshot the part handle was produced at: delete-marker rows for a
/// freshly written part, or the accumulated base + delta bitmaps for a part
/// read back from the catalog.
#[derive(Debug, Clone)]
pub struct Part {
    pub info: PartInfo,
    pub rows: u64,
    pub secondary_txn_id: Option<TxnId>,
    pub table_definition_hash: u64,
    /// Version of every row when the table versions rows by partition value.
    pub partition_version: Option<u64>,
    /// Pager key of the encoded part blob.
    pub storage_key: u64,
    pub delete_bitmap: Option<DeleteBitmap>,
    pub state: PartState,
}

impl Part {
    pub fn name(&self) -> String {
        self.info.name()
    }

    #[inline]
    pub fn bucket_number(&self) -> BucketNumber {
        self.info.bucket_number
    }

    /// Whether the row at `row` is still alive in this handle's snapshot.
    #[inline]
    pub fn is_row_alive(&self, row: u32) -> bool {
        self.delete_bitmap
            .as_ref()
            .is_none_or(|bitmap| !bitmap.contains(row))
    }

    /// Number of deleted rows recorded in this handle.
    pub fn deleted_rows(&self) -> u64 {
        self.delete_bitmap
            .as_ref()
            .map(DeleteBitmap::cardinality)
            .unwrap_or(0)
    }

    pub fn with_state(mut self, state: PartState) -> Self {
        self.state = state;
        self
    }
}
