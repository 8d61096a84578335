//! Global string dictionary for bucket-encoded columns.

use crate::traits::DictionaryEncoder;
use arrow::array::{Array, ArrayRef, DictionaryArray, StringArray, UInt32Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, UInt32Type};
use mtree_result::{Error, Result};
use mtree_types::{BucketNumber, TableId, TableMetadata};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct ColumnDictionary {
    codes: FxHashMap<String, u32>,
    values: Vec<String>,
}

impl ColumnDictionary {
    fn code_for(&mut self, value: &str) -> Result<u32> {
        if let Some(code) = self.codes.get(value) {
            return Ok(*code);
        }
        let code = u32::try_from(self.values.len())
            .map_err(|_| Error::Internal("dictionary code space exhausted".into()))?;
        self.codes.insert(value.to_string(), code);
        self.values.push(value.to_string());
        Ok(code)
    }
}

/// Assigns every distinct value of a column one code, shared by all buckets
/// and parts of the table.
///
/// Encoded columns are `Dictionary(UInt32, Utf8)` arrays whose value array is
/// the dictionary as of the call, so codes stay comparable across parts.
#[derive(Debug, Default)]
pub struct MemDictionary {
    columns: Mutex<FxHashMap<(TableId, String), ColumnDictionary>>,
}

impl MemDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Distinct values recorded for `column`.
    pub fn distinct_values(&self, table_id: TableId, column: &str) -> Result<usize> {
        let columns = self
            .columns
            .lock()
            .map_err(|_| Error::Internal("dictionary poisoned".into()))?;
        Ok(columns
            .get(&(table_id, column.to_string()))
            .map(|d| d.values.len())
            .unwrap_or(0))
    }
}

impl DictionaryEncoder for MemDictionary {
    fn encode_column(
        &self,
        table: &TableMetadata,
        column: &str,
        values: &ArrayRef,
        bucket: BucketNumber,
    ) -> Result<ArrayRef> {
        let strings = match values.data_type() {
            DataType::Utf8 => Arc::clone(values),
            DataType::LargeUtf8 => cast(values, &DataType::Utf8)?,
            other => {
                return Err(Error::InvalidArgumentError(format!(
                    "bucket-encoded column '{}' must be a string column, got {}",
                    column, other
                )));
            }
        };
        let strings = strings
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| Error::Internal("expected Utf8 array".into()))?;

        let mut columns = self
            .columns
            .lock()
            .map_err(|_| Error::Internal("dictionary poisoned".into()))?;
        let dictionary = columns
            .entry((table.table_id, column.to_string()))
            .or_default();

        let keys = strings
            .iter()
            .map(|value| value.map(|v| dictionary.code_for(v)).transpose())
            .collect::<Result<UInt32Array>>()?;
        let dictionary_values = Arc::new(StringArray::from_iter_values(
            dictionary.values.iter().map(String::as_str),
        ));
        drop(columns);

        tracing::trace!(
            table = %table.name,
            column,
            bucket,
            rows = keys.len(),
            "[DICT] encoded column"
        );
        let encoded = DictionaryArray::<UInt32Type>::try_new(keys, dictionary_values)?;
        Ok(Arc::new(encoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{Field, Schema};

    fn table() -> TableMetadata {
        let schema = Arc::new(Schema::new(vec![Field::new("city", DataType::Utf8, true)]));
        TableMetadata::new(TableId(3), "t", schema).with_bucket_encoded_columns(&["city"])
    }

    #[test]
    fn codes_are_stable_across_calls() {
        let dict = MemDictionary::new();
        let table = table();
        let first: ArrayRef = Arc::new(StringArray::from(vec![Some("oslo"), None, Some("rome")]));
        let second: ArrayRef = Arc::new(StringArray::from(vec!["rome", "lima", "oslo"]));

        let a = dict.encode_column(&table, "city", &first, 0).unwrap();
        let b = dict.encode_column(&table, "city", &second, 1).unwrap();
        let a = a
            .as_any()
            .downcast_ref::<DictionaryArray<UInt32Type>>()
            .unwrap();
        let b = b
            .as_any()
            .downcast_ref::<DictionaryArray<UInt32Type>>()
            .unwrap();

        assert_eq!(a.keys().value(0), b.keys().value(2));
        assert_eq!(a.keys().value(2), b.keys().value(0));
        assert!(a.is_null(1));
        assert_eq!(dict.distinct_values(table.table_id, "city").unwrap(), 3);
    }

    #[test]
    fn rejects_non_string_columns() {
        let dict = MemDictionary::new();
        let values: ArrayRef = Arc::new(UInt32Array::from(vec![1, 2]));
        assert!(dict.encode_column(&table(), "city", &values, 0).is_err());
    }
}
