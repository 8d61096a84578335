//! Parquet encoding of part blobs.
//!
//! Every part is one Parquet file held in memory and stored as a single pager
//! blob, so compression and dictionary encoding come from the `parquet` crate.

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use mtree_result::{Error, Result};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::sync::Arc;

/// Encoding options for part blobs.
#[derive(Debug, Clone)]
pub struct PartWriterConfig {
    pub compression: Compression,
    pub max_row_group_size: usize,
}

impl Default for PartWriterConfig {
    fn default() -> Self {
        Self {
            compression: Compression::SNAPPY,
            max_row_group_size: 8192,
        }
    }
}

fn parquet_error(stage: &str) -> impl Fn(parquet::errors::ParquetError) -> Error + '_ {
    move |e| Error::Internal(format!("part blob {stage}: {e}"))
}

/// Encode a sub-batch as one in-memory Parquet file.
pub fn encode_part(batch: &RecordBatch, config: &PartWriterConfig) -> Result<Bytes> {
    let props = WriterProperties::builder()
        .set_compression(config.compression)
        .set_max_row_group_size(config.max_row_group_size)
        .build();

    let mut buffer = Vec::with_capacity(batch.get_array_memory_size() / 2);
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))
        .map_err(parquet_error("writer setup"))?;
    writer.write(batch).map_err(parquet_error("encode"))?;
    writer.close().map_err(parquet_error("footer"))?;
    Ok(Bytes::from(buffer))
}

/// Decode a part blob into a single batch, stitching row groups back together.
pub fn decode_part(blob: Bytes) -> Result<RecordBatch> {
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(blob).map_err(parquet_error("reader setup"))?;
    let schema = Arc::clone(builder.schema());
    let batches = builder
        .build()
        .map_err(parquet_error("reader setup"))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    match batches.as_slice() {
        [] => Ok(RecordBatch::new_empty(schema)),
        [single] => Ok(single.clone()),
        _ => Ok(concat_batches(&schema, &batches)?),
    }
}
