//! Turning one input batch into temporary parts.

use crate::batch_dedup::{dedup_with_unique_key, filter_batch};
use crate::partition::{PartitionBlock, split_by_bucket, split_by_partition};
use crate::services::WriteServices;
use arrow::array::ArrayRef;
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use mtree_catalog::DictionaryEncoder;
use mtree_result::{Error, Result};
use mtree_storage::{BatchWithPartition, BlockIdAllocator, PartWriter, TempPartContext};
use mtree_transaction::WriteTransaction;
use mtree_types::{Part, TableMetadata, WriteSettings};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;

/// Builds the temporary parts of one batch.
///
/// Every validation (string key sizes, partition count, dictionary encoding)
/// runs before the first part is written, so a rejected batch leaves no
/// storage behind.
pub struct PartBuilder {
    writer: Arc<dyn PartWriter>,
    block_ids: Arc<dyn BlockIdAllocator>,
    encoder: Option<Arc<dyn DictionaryEncoder>>,
    settings: WriteSettings,
}

impl PartBuilder {
    pub fn new(services: &WriteServices) -> Self {
        Self {
            writer: Arc::clone(&services.writer),
            block_ids: Arc::clone(&services.block_ids),
            encoder: services.encoder.clone(),
            settings: services.settings.clone(),
        }
    }

    /// Dedup, split, and persist `batch`, returning one part per
    /// `(partition, bucket)` sub-batch.
    pub fn build_parts(
        &self,
        batch: &RecordBatch,
        table: &TableMetadata,
        txn: &WriteTransaction,
    ) -> Result<Vec<Part>> {
        if batch.num_rows() == 0 {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        let blocks = self.prepare_blocks(batch, table)?;
        let parts = self.write_blocks(blocks, table, txn)?;
        tracing::debug!(
            txn_id = txn.id(),
            table = %table.name,
            rows = batch.num_rows(),
            parts = parts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "[INSERT] built parts"
        );
        Ok(parts)
    }

    /// Everything up to, but not including, the first write.
    fn prepare_blocks(
        &self,
        batch: &RecordBatch,
        table: &TableMetadata,
    ) -> Result<Vec<BatchWithPartition>> {
        let max_string_size = self.settings.max_string_size_for_unique_key;
        let dedup_first = table.has_unique_key() && !table.dedup_after_partitioning();

        let partitions = if dedup_first {
            let info = dedup_with_unique_key(batch, table, max_string_size)?;
            let batch = filter_batch(batch, &info)?;
            split_by_partition(&batch, table, self.settings.max_partitions_per_insert_block)?
        } else {
            let partitions =
                split_by_partition(batch, table, self.settings.max_partitions_per_insert_block)?;
            if table.has_unique_key() {
                partitions
                    .into_iter()
                    .map(|block| {
                        let info = dedup_with_unique_key(&block.batch, table, max_string_size)?;
                        Ok(PartitionBlock {
                            batch: filter_batch(&block.batch, &info)?,
                            ..block
                        })
                    })
                    .collect::<Result<Vec<_>>>()?
            } else {
                partitions
            }
        };

        let mut blocks = Vec::new();
        for partition in partitions {
            for block in split_by_bucket(partition, table)? {
                blocks.push(self.encode_bucket_columns(block, table)?);
            }
        }
        Ok(blocks)
    }

    fn encode_bucket_columns(
        &self,
        mut block: BatchWithPartition,
        table: &TableMetadata,
    ) -> Result<BatchWithPartition> {
        let Some(encoder) = &self.encoder else {
            return Ok(block);
        };
        if block.bucket_number < 0 || table.bucket_encoded_columns.is_empty() {
            return Ok(block);
        }

        let schema = block.batch.schema();
        let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
        let mut columns: Vec<ArrayRef> = block.batch.columns().to_vec();
        for name in &table.bucket_encoded_columns {
            let idx = schema.index_of(name).map_err(|_| {
                Error::InvalidArgumentError(format!("batch is missing encoded column '{}'", name))
            })?;
            let encoded = encoder.encode_column(table, name, &columns[idx], block.bucket_number)?;
            fields[idx] = fields[idx].clone().with_data_type(encoded.data_type().clone());
            columns[idx] = encoded;
        }
        block.batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
        Ok(block)
    }

    /// Write every block, or none: on failure the parts that did land are
    /// discarded before the error is returned.
    fn write_blocks(
        &self,
        blocks: Vec<BatchWithPartition>,
        table: &TableMetadata,
        txn: &WriteTransaction,
    ) -> Result<Vec<Part>> {
        let ctx = TempPartContext {
            primary_txn_id: txn.primary_id(),
            secondary_txn_id: txn.secondary_id(),
        };
        // Allocate block ids up front so part names do not depend on
        // scheduling.
        let block_ids: Vec<_> = blocks.iter().map(|_| self.block_ids.next_block_id()).collect();

        let pool = thread_pool(self.settings.max_threads_for_dump)?;
        let results: Vec<Result<Part>> = pool.install(|| {
            blocks
                .par_iter()
                .zip(block_ids.par_iter())
                .map(|(block, block_id)| self.writer.write_temp_part(block, table, ctx, *block_id))
                .collect()
        });

        let mut parts = Vec::with_capacity(results.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(part) => parts.push(part),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }

        match failure {
            None => Ok(parts),
            Some(err) => {
                tracing::warn!(
                    txn_id = txn.id(),
                    written = parts.len(),
                    "[PART_STORE] write failed, discarding siblings: {}",
                    err
                );
                if let Err(discard_err) = self.writer.discard(&parts) {
                    tracing::warn!("[PART_STORE] discard failed: {}", discard_err);
                }
                Err(match err {
                    Error::StorageWrite(_) => err,
                    other => Error::storage_write(other),
                })
            }
        }
    }
}

/// A rayon pool of `threads` workers; `0` lets rayon choose.
pub(crate) fn thread_pool(threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(Error::internal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, StringArray, UInt64Array};
    use arrow::datatypes::DataType;
    use mtree_catalog::{MemCatalog, MemLockService};
    use mtree_storage::{AtomicBlockIdAllocator, MemPager, PartReader, PartStore};
    use mtree_transaction::{TransactionKind, TxnIdManager};
    use mtree_types::{TableId, UNBUCKETED};

    fn table() -> TableMetadata {
        let schema = Arc::new(Schema::new(vec![
            Field::new("day", DataType::Utf8, false),
            Field::new("id", DataType::UInt64, false),
            Field::new("city", DataType::Utf8, false),
        ]));
        TableMetadata::new(TableId(1), "events", schema)
            .with_partition_by(&["day"])
            .with_unique_key(&["id"])
            .with_cluster_by(&["id"], 4)
            .with_bucket_encoded_columns(&["city"])
    }

    fn services() -> (WriteServices, PartStore<MemPager>, TxnIdManager) {
        let manager = TxnIdManager::new();
        let catalog = Arc::new(MemCatalog::new(manager.clone()));
        let store = PartStore::new(Arc::new(MemPager::default()));
        let services = WriteServices::in_memory(
            catalog,
            store.clone(),
            MemLockService::new(),
            WriteSettings::default(),
        );
        (services, store, manager)
    }

    #[test]
    fn splits_into_partition_bucket_parts() {
        let (services, store, manager) = services();
        let table = table();
        let batch = RecordBatch::try_new(
            table.schema.clone(),
            vec![
                Arc::new(StringArray::from(vec!["d1", "d2", "d1", "d1"])),
                Arc::new(UInt64Array::from(vec![1, 2, 3, 1])),
                Arc::new(StringArray::from(vec!["a", "b", "c", "d"])),
            ],
        )
        .unwrap();
        let txn = WriteTransaction::begin(&manager, TransactionKind::Server);

        let parts = PartBuilder::new(&services)
            .build_parts(&batch, &table, &txn)
            .unwrap();

        // Row 0 loses to row 3 (same id, later arrival).
        assert_eq!(parts.iter().map(|p| p.rows).sum::<u64>(), 3);
        assert!(parts.iter().all(|p| p.info.primary_txn_id == txn.id()));
        assert!(parts.iter().all(|p| p.bucket_number() != UNBUCKETED));

        let mut block_ids: Vec<_> = parts.iter().map(|p| p.info.block_id).collect();
        block_ids.sort_unstable();
        block_ids.dedup();
        assert_eq!(block_ids.len(), parts.len());

        let read = store.read_part(&parts[0]).unwrap();
        let city = read.column_by_name("city").unwrap();
        assert!(matches!(city.data_type(), DataType::Dictionary(_, _)));
        assert!(!city.is_empty());
    }

    #[test]
    fn secondary_transaction_stamps_both_ids() {
        let (services, _store, manager) = services();
        let table = table();
        let batch = RecordBatch::try_new(
            table.schema.clone(),
            vec![
                Arc::new(StringArray::from(vec!["d1"])),
                Arc::new(UInt64Array::from(vec![9])),
                Arc::new(StringArray::from(vec!["x"])),
            ],
        )
        .unwrap();
        let txn = WriteTransaction::begin_secondary(&manager, TransactionKind::Server, 5);
        let services = services.with_block_ids(Arc::new(AtomicBlockIdAllocator::new(100)));

        let parts = PartBuilder::new(&services)
            .build_parts(&batch, &table, &txn)
            .unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].info.block_id, 100);
        assert_eq!(parts[0].info.primary_txn_id, 5);
        assert_eq!(parts[0].secondary_txn_id, Some(txn.id()));
    }
}
