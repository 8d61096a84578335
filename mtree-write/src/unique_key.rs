//! Row encoding of unique keys and the per-row values dedup compares.
//!
//! Keys are encoded with the Arrow row format, which gives a byte-comparable,
//! hashable representation of the whole key tuple. Sort options are ascending
//! with nulls last; floats use the row format's total order, so NaN sorts
//! after every number.

use arrow::array::{Array, ArrayRef, AsArray, UInt64Array};
use arrow::compute::{SortOptions, cast};
use arrow::datatypes::{DataType, UInt64Type};
use arrow::record_batch::RecordBatch;
use arrow::row::{RowConverter, Rows, SortField};
use mtree_result::{Error, Result};
use mtree_types::TableMetadata;

const KEY_SORT_OPTIONS: SortOptions = SortOptions {
    descending: false,
    nulls_first: false,
};

/// Encodes a fixed list of columns of any batch into comparable rows.
///
/// Column types are pinned to the table schema: a part whose column was
/// dictionary encoded is cast back before encoding so its keys compare equal
/// to those of unencoded batches.
pub struct KeyEncoder {
    converter: RowConverter,
    columns: Vec<String>,
    types: Vec<DataType>,
}

impl KeyEncoder {
    pub fn new(table: &TableMetadata, columns: &[String]) -> Result<Self> {
        let types = columns
            .iter()
            .map(|name| {
                let idx = table.column_index(name)?;
                Ok(table.schema.field(idx).data_type().clone())
            })
            .collect::<Result<Vec<_>>>()?;
        let fields = types
            .iter()
            .map(|t| SortField::new_with_options(t.clone(), KEY_SORT_OPTIONS))
            .collect();
        let converter = RowConverter::new(fields).map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self {
            converter,
            columns: columns.to_vec(),
            types,
        })
    }

    /// Encoder over the table's unique key.
    pub fn unique_key(table: &TableMetadata) -> Result<Self> {
        if !table.has_unique_key() {
            return Err(Error::InvalidArgumentError(format!(
                "table '{}' has no unique key",
                table.name
            )));
        }
        Self::new(table, &table.unique_key)
    }

    pub fn encode(&self, batch: &RecordBatch) -> Result<Rows> {
        let columns = self
            .columns
            .iter()
            .zip(&self.types)
            .map(|(name, data_type)| {
                let column = batch.column_by_name(name).ok_or_else(|| {
                    Error::InvalidArgumentError(format!("batch is missing key column '{}'", name))
                })?;
                if column.data_type() == data_type {
                    Ok(column.clone())
                } else {
                    Ok(cast(column, data_type)?)
                }
            })
            .collect::<Result<Vec<ArrayRef>>>()?;
        Ok(self.converter.convert_columns(&columns)?)
    }
}

/// Fail if any row's string unique-key columns sum to more than `limit` bytes.
pub fn check_string_key_size(
    batch: &RecordBatch,
    table: &TableMetadata,
    limit: usize,
) -> Result<()> {
    let mut sizes = vec![0usize; batch.num_rows()];
    let mut any_string = false;

    for name in &table.unique_key {
        let Some(column) = batch.column_by_name(name) else {
            continue;
        };
        match column.data_type() {
            DataType::Utf8 => {
                any_string = true;
                let strings = column.as_string::<i32>();
                for (row, size) in sizes.iter_mut().enumerate() {
                    if strings.is_valid(row) {
                        *size += strings.value(row).len();
                    }
                }
            }
            DataType::LargeUtf8 => {
                any_string = true;
                let strings = column.as_string::<i64>();
                for (row, size) in sizes.iter_mut().enumerate() {
                    if strings.is_valid(row) {
                        *size += strings.value(row).len();
                    }
                }
            }
            _ => {}
        }
    }

    if !any_string {
        return Ok(());
    }
    match sizes.into_iter().find(|&size| size > limit) {
        Some(size) => Err(Error::UniqueKeyStringSizeExceeded { size, limit }),
        None => Ok(()),
    }
}

/// Values of `column` as `u64`.
pub fn u64_column(batch: &RecordBatch, column: &str) -> Result<UInt64Array> {
    let array = batch.column_by_name(column).ok_or_else(|| {
        Error::InvalidArgumentError(format!("batch is missing column '{}'", column))
    })?;
    let values = cast(array, &DataType::UInt64)?;
    Ok(values.as_primitive::<UInt64Type>().clone())
}

/// Version at `row`; nulls carry no version information and read as `0`.
#[inline]
pub fn version_at(versions: &UInt64Array, row: usize) -> u64 {
    if versions.is_valid(row) {
        versions.value(row)
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, StringArray, UInt32Array};
    use arrow::datatypes::{Field, Schema};
    use mtree_types::TableId;
    use std::sync::Arc;

    fn table(fields: Vec<Field>, key: &[&str]) -> TableMetadata {
        TableMetadata::new(TableId(1), "t", Arc::new(Schema::new(fields))).with_unique_key(key)
    }

    #[test]
    fn nulls_and_nan_sort_last() {
        let table = table(vec![Field::new("k", DataType::Float64, true)], &["k"]);
        let batch = RecordBatch::try_new(
            table.schema.clone(),
            vec![Arc::new(Float64Array::from(vec![
                None,
                Some(f64::NAN),
                Some(1.0),
            ]))],
        )
        .unwrap();
        let rows = KeyEncoder::unique_key(&table).unwrap().encode(&batch).unwrap();
        assert!(rows.row(2) < rows.row(1));
        assert!(rows.row(1) < rows.row(0));
    }

    #[test]
    fn keys_compare_across_column_types() {
        let table = table(vec![Field::new("k", DataType::UInt64, false)], &["k"]);
        let narrow = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("k", DataType::UInt32, false)])),
            vec![Arc::new(UInt32Array::from(vec![7]))],
        )
        .unwrap();
        let wide = RecordBatch::try_new(
            table.schema.clone(),
            vec![Arc::new(UInt64Array::from(vec![7]))],
        )
        .unwrap();
        let encoder = KeyEncoder::unique_key(&table).unwrap();
        assert_eq!(
            encoder.encode(&narrow).unwrap().row(0),
            encoder.encode(&wide).unwrap().row(0)
        );
    }

    #[test]
    fn string_key_limit_sums_columns() {
        let table = table(
            vec![
                Field::new("a", DataType::Utf8, false),
                Field::new("b", DataType::Utf8, true),
            ],
            &["a", "b"],
        );
        let batch = RecordBatch::try_new(
            table.schema.clone(),
            vec![
                Arc::new(StringArray::from(vec!["abc", "abcd"])),
                Arc::new(StringArray::from(vec![Some("de"), Some("efgh")])),
            ],
        )
        .unwrap();
        assert!(check_string_key_size(&batch, &table, 8).is_ok());
        let err = check_string_key_size(&batch, &table, 7).unwrap_err();
        assert!(matches!(
            err,
            Error::UniqueKeyStringSizeExceeded { size: 8, limit: 7 }
        ));
    }
}
