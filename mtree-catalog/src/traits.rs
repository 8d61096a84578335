//! Catalog-side seams of the write path.

use arrow::array::ArrayRef;
use mtree_result::Result;
use mtree_types::{
    BucketNumber, DedupScope, LocalDeleteBitmap, Part, PartInfo, TableId, TableMetadata,
    Timestamp, TxnId,
};

/// Read access to table definitions and committed parts.
///
/// Every read is a snapshot as of the given timestamp; callers obtain a fresh
/// one from [`Catalog::current_timestamp`] after taking their locks.
pub trait Catalog: Send + Sync {
    /// Table definition as of `ts`, or `None` if it did not exist or was
    /// dropped.
    fn lookup_table(&self, table_id: TableId, ts: Timestamp) -> Result<Option<TableMetadata>>;

    /// Query-visible parts inside `scope`, with their delete bitmaps as of `ts`.
    fn list_visible_parts(
        &self,
        table_id: TableId,
        scope: &DedupScope,
        ts: Timestamp,
    ) -> Result<Vec<Part>>;

    /// Staged parts inside `scope`, with their delete bitmaps as of `ts`.
    fn list_staged_parts(
        &self,
        table_id: TableId,
        scope: &DedupScope,
        ts: Timestamp,
    ) -> Result<Vec<Part>>;

    fn current_timestamp(&self) -> Timestamp;
}

/// Publishes the side effects of an upsert ahead of its commit.
///
/// Nothing published here is observable until the transaction commits, and
/// all of it is discarded if the transaction aborts.
pub trait PartPublisher: Send + Sync {
    /// Promote `staged` parts to visible and attach `bitmaps`, both on commit
    /// of `txn_id`.
    fn publish_staged_parts(
        &self,
        txn_id: TxnId,
        staged: &[PartInfo],
        bitmaps: Vec<LocalDeleteBitmap>,
    ) -> Result<()>;
}

/// Rewrites bucket-encoded columns before a bucketed part is written.
pub trait DictionaryEncoder: Send + Sync {
    fn encode_column(
        &self,
        table: &TableMetadata,
        column: &str,
        values: &ArrayRef,
        bucket: BucketNumber,
    ) -> Result<ArrayRef>;
}
