//! Splitting a batch by partition and by bucket.

use crate::unique_key::{KeyEncoder, u64_column};
use arrow::array::{Array, UInt32Array};
use arrow::compute::take_record_batch;
use arrow::record_batch::RecordBatch;
use arrow::row::OwnedRow;
use arrow::util::display::array_value_to_string;
use mtree_result::{Error, Result};
use mtree_storage::BatchWithPartition;
use mtree_types::{BucketNumber, TableMetadata, UNBUCKETED};
use rustc_hash::{FxHashMap, FxHasher};
use std::collections::BTreeMap;
use std::collections::hash_map::Entry;
use std::hash::Hasher;

/// Partition id of rows of an unpartitioned table.
pub const ALL_PARTITION_ID: &str = "all";

/// Rows of one partition.
#[derive(Debug, Clone)]
pub struct PartitionBlock {
    pub batch: RecordBatch,
    pub partition_id: String,
    pub partition_version: Option<u64>,
}

/// Group rows by partition key, in order of first appearance.
///
/// `max_partitions` of `0` disables the limit.
pub fn split_by_partition(
    batch: &RecordBatch,
    table: &TableMetadata,
    max_partitions: usize,
) -> Result<Vec<PartitionBlock>> {
    if table.partition_by.is_empty() {
        return Ok(vec![PartitionBlock {
            batch: batch.clone(),
            partition_id: ALL_PARTITION_ID.to_string(),
            partition_version: None,
        }]);
    }

    let columns = table
        .partition_by
        .iter()
        .map(|name| {
            batch.column_by_name(name).map(|c| c.as_ref()).ok_or_else(|| {
                Error::InvalidArgumentError(format!("batch is missing partition column '{}'", name))
            })
        })
        .collect::<Result<Vec<&dyn Array>>>()?;

    let keys = KeyEncoder::new(table, &table.partition_by)?.encode(batch)?;
    let mut order: Vec<(String, Vec<u32>)> = Vec::new();
    let mut slots: FxHashMap<OwnedRow, usize> = FxHashMap::default();
    for row in 0..batch.num_rows() {
        let slot = match slots.entry(keys.row(row).owned()) {
            Entry::Occupied(slot) => *slot.get(),
            Entry::Vacant(slot) => {
                order.push((partition_id(&columns, row)?, Vec::new()));
                *slot.insert(order.len() - 1)
            }
        };
        order[slot].1.push(row as u32);
    }

    if max_partitions > 0 && order.len() > max_partitions {
        return Err(Error::TooManyPartitions {
            count: order.len(),
            limit: max_partitions,
        });
    }

    order
        .into_iter()
        .map(|(partition_id, rows)| {
            let batch = take_rows(batch, rows)?;
            let partition_version = if table.partition_value_as_version() {
                Some(partition_version(&batch, table)?)
            } else {
                None
            };
            Ok(PartitionBlock {
                batch,
                partition_id,
                partition_version,
            })
        })
        .collect()
}

/// Partition id of `row`: its partition values joined by `-`.
///
/// `\` and `-` inside a value are escaped with `\` and nulls render as
/// `\N`, so distinct partition tuples never share an id.
fn partition_id(columns: &[&dyn Array], row: usize) -> Result<String> {
    let mut id = String::new();
    for (idx, column) in columns.iter().enumerate() {
        if idx > 0 {
            id.push('-');
        }
        if column.is_null(row) {
            id.push_str("\\N");
            continue;
        }
        for ch in array_value_to_string(*column, row)?.chars() {
            if matches!(ch, '\\' | '-') {
                id.push('\\');
            }
            id.push(ch);
        }
    }
    Ok(id)
}

/// Split one partition by cluster key into bucketed sub-batches.
///
/// Tables without a cluster key produce one sub-batch in [`UNBUCKETED`].
pub fn split_by_bucket(
    block: PartitionBlock,
    table: &TableMetadata,
) -> Result<Vec<BatchWithPartition>> {
    let Some(cluster) = &table.cluster_by else {
        return Ok(vec![BatchWithPartition {
            batch: block.batch,
            partition_id: block.partition_id,
            partition_version: block.partition_version,
            bucket_number: UNBUCKETED,
        }]);
    };
    if cluster.total_buckets == 0 {
        return Err(Error::InvalidArgumentError(format!(
            "table '{}' is clustered into zero buckets",
            table.name
        )));
    }

    let keys = KeyEncoder::new(table, &cluster.columns)?.encode(&block.batch)?;
    let mut buckets: BTreeMap<BucketNumber, Vec<u32>> = BTreeMap::new();
    for row in 0..block.batch.num_rows() {
        let bucket = bucket_of(keys.row(row).as_ref(), cluster.total_buckets);
        buckets.entry(bucket).or_default().push(row as u32);
    }

    buckets
        .into_iter()
        .map(|(bucket_number, rows)| {
            Ok(BatchWithPartition {
                batch: take_rows(&block.batch, rows)?,
                partition_id: block.partition_id.clone(),
                partition_version: block.partition_version,
                bucket_number,
            })
        })
        .collect()
}

/// Bucket of a row-encoded cluster key.
#[inline]
pub fn bucket_of(encoded_key: &[u8], total_buckets: u64) -> BucketNumber {
    let mut hasher = FxHasher::default();
    hasher.write(encoded_key);
    (hasher.finish() % total_buckets) as BucketNumber
}

fn take_rows(batch: &RecordBatch, rows: Vec<u32>) -> Result<RecordBatch> {
    if rows.len() == batch.num_rows() {
        return Ok(batch.clone());
    }
    Ok(take_record_batch(batch, &UInt32Array::from(rows))?)
}

/// Version carried by every row of a partition: its first partition column
/// as an unsigned integer.
fn partition_version(batch: &RecordBatch, table: &TableMetadata) -> Result<u64> {
    let column = table.partition_by.first().ok_or_else(|| {
        Error::InvalidArgumentError("partition value as version needs a partition key".into())
    })?;
    let values = u64_column(batch, column)?;
    if values.is_empty() || values.is_null(0) {
        return Err(Error::InvalidArgumentError(format!(
            "partition column '{}' is not usable as a version",
            column
        )));
    }
    Ok(values.value(0))
}
