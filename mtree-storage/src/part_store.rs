//! Temporary part persistence.
//!
//! [`PartWriter`] and [`PartReader`] are the seams the write path uses to
//! persist sub-batches and to read existing parts back for cross-part dedup.
//! [`PartStore`] implements both on top of any [`Pager`], one Parquet blob per
//! part.

use crate::codec::{PartWriterConfig, decode_part, encode_part};
use crate::pager::{Pager, PhysicalKey};
use arrow::array::{Array, BooleanArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use mtree_result::{Error, Result};
use mtree_types::{
    BlockId, BucketNumber, DELETE_FLAG_COLUMN_NAME, DeleteBitmap, Part, PartInfo, PartState,
    TableMetadata, TxnId,
};
use std::sync::Arc;
use std::time::Instant;

/// One sub-batch destined for exactly one part.
#[derive(Debug, Clone)]
pub struct BatchWithPartition {
    pub batch: RecordBatch,
    pub partition_id: String,
    /// Row version when the table versions rows by partition value.
    pub partition_version: Option<u64>,
    pub bucket_number: BucketNumber,
}

/// Transaction stamps applied to every part of a write.
#[derive(Debug, Clone, Copy)]
pub struct TempPartContext {
    pub primary_txn_id: TxnId,
    pub secondary_txn_id: Option<TxnId>,
}

/// Persists sub-batches as immutable temporary parts.
pub trait PartWriter: Send + Sync {
    fn write_temp_part(
        &self,
        block: &BatchWithPartition,
        table: &TableMetadata,
        ctx: TempPartContext,
        block_id: BlockId,
    ) -> Result<Part>;

    /// Drop the storage of temporary parts that will never be promoted.
    fn discard(&self, parts: &[Part]) -> Result<()>;
}

/// Reads the rows of a part back.
pub trait PartReader: Send + Sync {
    fn read_part(&self, part: &Part) -> Result<RecordBatch>;
}

/// Pager-backed part storage.
pub struct PartStore<P>
where
    P: Pager,
{
    pager: Arc<P>,
    config: PartWriterConfig,
}

impl<P> Clone for PartStore<P>
where
    P: Pager,
{
    fn clone(&self) -> Self {
        Self {
            pager: Arc::clone(&self.pager),
            config: self.config.clone(),
        }
    }
}

impl<P> PartStore<P>
where
    P: Pager,
{
    pub fn new(pager: Arc<P>) -> Self {
        Self::with_config(pager, PartWriterConfig::default())
    }

    pub fn with_config(pager: Arc<P>, config: PartWriterConfig) -> Self {
        Self { pager, config }
    }

    pub fn pager(&self) -> &Arc<P> {
        &self.pager
    }
}

impl<P> PartWriter for PartStore<P>
where
    P: Pager,
{
    fn write_temp_part(
        &self,
        block: &BatchWithPartition,
        table: &TableMetadata,
        ctx: TempPartContext,
        block_id: BlockId,
    ) -> Result<Part> {
        let started = Instant::now();
        let blob = encode_part(&block.batch, &self.config)?;
        let key = self.pager.put(blob).map_err(Error::storage_write)?;

        let info = PartInfo::new(
            block.partition_id.clone(),
            block.bucket_number,
            block_id,
            ctx.primary_txn_id,
        );
        tracing::trace!(
            part = %info,
            rows = block.batch.num_rows(),
            key,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "[PART_STORE] wrote temporary part"
        );

        Ok(Part {
            info,
            rows: block.batch.num_rows() as u64,
            secondary_txn_id: ctx.secondary_txn_id,
            table_definition_hash: table.table_definition_hash(),
            partition_version: block.partition_version,
            storage_key: key,
            delete_bitmap: delete_marker_bitmap(&block.batch)?,
            state: PartState::Temporary,
        })
    }

    fn discard(&self, parts: &[Part]) -> Result<()> {
        let keys: Vec<PhysicalKey> = parts.iter().map(|p| p.storage_key).collect();
        if keys.is_empty() {
            return Ok(());
        }
        let freed = self.pager.free_many(&keys)?;
        tracing::debug!(
            count = keys.len(),
            freed,
            "[PART_STORE] discarded temporary parts"
        );
        Ok(())
    }
}

impl<P> PartReader for PartStore<P>
where
    P: Pager,
{
    fn read_part(&self, part: &Part) -> Result<RecordBatch> {
        let Some(bytes) = self.pager.get(part.storage_key)? else {
            return Err(Error::NotFound);
        };

        let batch = decode_part(bytes)?;
        if batch.num_rows() as u64 != part.rows {
            return Err(Error::Internal(format!(
                "part {} decoded {} rows, expected {}",
                part.name(),
                batch.num_rows(),
                part.rows
            )));
        }
        Ok(batch)
    }
}

/// Per-row delete flags of a batch, if it carries the delete flag column.
///
/// Boolean and integer flag columns are accepted; nulls read as "not deleted".
pub fn delete_flags(batch: &RecordBatch) -> Result<Option<BooleanArray>> {
    let Some(column) = batch.column_by_name(DELETE_FLAG_COLUMN_NAME) else {
        return Ok(None);
    };
    let flags = cast(column, &DataType::Boolean)?;
    let flags = flags
        .as_any()
        .downcast_ref::<BooleanArray>()
        .ok_or_else(|| Error::Internal("delete flag cast did not yield booleans".into()))?
        .clone();
    Ok(Some(flags))
}

/// Bitmap of the rows written as delete markers.
pub fn delete_marker_bitmap(batch: &RecordBatch) -> Result<Option<DeleteBitmap>> {
    let Some(flags) = delete_flags(batch)? else {
        return Ok(None);
    };
    let bitmap = DeleteBitmap::from_rows(
        (0..flags.len())
            .filter(|&row| flags.is_valid(row) && flags.value(row))
            .map(|row| row as u32),
    );
    Ok((!bitmap.is_empty()).then_some(bitmap))
}
