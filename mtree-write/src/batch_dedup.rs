//! Dedup of unique keys inside one batch.

use crate::unique_key::{KeyEncoder, check_string_key_size, u64_column, version_at};
use arrow::array::{Array, BooleanArray};
use arrow::compute::filter_record_batch;
use arrow::record_batch::RecordBatch;
use mtree_result::Result;
use mtree_storage::delete_flags;
use mtree_types::TableMetadata;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

/// Rows of a batch that survive in-batch dedup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterInfo {
    pub filter: Vec<bool>,
    pub num_filtered: usize,
}

impl FilterInfo {
    pub fn keep_all(rows: usize) -> Self {
        Self {
            filter: vec![true; rows],
            num_filtered: 0,
        }
    }

    pub fn kept_rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.filter
            .iter()
            .enumerate()
            .filter_map(|(row, keep)| keep.then_some(row))
    }
}

/// Keep one row per unique key.
///
/// Later rows replace earlier ones unless the table has a version column and
/// the earlier row carries the strictly higher version. A delete row whose
/// version is `0` carries no version information and always wins. Fails
/// before looking at any key if a row's string key columns exceed
/// `max_string_size`.
pub fn dedup_with_unique_key(
    batch: &RecordBatch,
    table: &TableMetadata,
    max_string_size: usize,
) -> Result<FilterInfo> {
    let rows = batch.num_rows();
    if !table.has_unique_key() {
        return Ok(FilterInfo::keep_all(rows));
    }
    check_string_key_size(batch, table, max_string_size)?;

    let keys = KeyEncoder::unique_key(table)?.encode(batch)?;
    let versions = table
        .explicit_version_column()
        .map(|column| u64_column(batch, column))
        .transpose()?;
    let deletes = match versions {
        Some(_) => delete_flags(batch)?,
        None => None,
    };
    let is_delete_row = |row: usize| {
        deletes
            .as_ref()
            .is_some_and(|flags: &BooleanArray| flags.is_valid(row) && flags.value(row))
    };

    let mut info = FilterInfo::keep_all(rows);
    // first occurrence of a key -> row currently holding it
    let mut index = BTreeMap::new();

    for row in 0..rows {
        match index.entry(keys.row(row).owned()) {
            Entry::Vacant(slot) => {
                slot.insert(row);
            }
            Entry::Occupied(mut slot) => {
                let mut old_pos = *slot.get();
                let mut new_pos = row;
                if let Some(versions) = &versions {
                    let delete_ignores_version =
                        is_delete_row(row) && version_at(versions, row) == 0;
                    if !delete_ignores_version
                        && version_at(versions, old_pos) > version_at(versions, new_pos)
                    {
                        std::mem::swap(&mut old_pos, &mut new_pos);
                    }
                }
                info.filter[old_pos] = false;
                slot.insert(new_pos);
                info.num_filtered += 1;
            }
        }
    }

    if info.num_filtered > 0 {
        tracing::trace!(
            rows,
            filtered = info.num_filtered,
            "[DEDUP] in-batch duplicates removed"
        );
    }
    Ok(info)
}

/// Apply a [`FilterInfo`], returning the batch unchanged when nothing was
/// filtered.
pub fn filter_batch(batch: &RecordBatch, info: &FilterInfo) -> Result<RecordBatch> {
    if info.num_filtered == 0 {
        return Ok(batch.clone());
    }
    let predicate = BooleanArray::from(info.filter.clone());
    Ok(filter_record_batch(batch, &predicate)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{StringArray, UInt64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use mtree_types::{DELETE_FLAG_COLUMN_NAME, TableId, VersionMode};
    use rand::Rng;
    use rustc_hash::FxHashMap;
    use std::sync::Arc;

    fn versioned_table() -> TableMetadata {
        let schema = Arc::new(Schema::new(vec![
            Field::new("k", DataType::Utf8, false),
            Field::new("ver", DataType::UInt64, false),
            Field::new(DELETE_FLAG_COLUMN_NAME, DataType::Boolean, false),
        ]));
        TableMetadata::new(TableId(1), "t", schema)
            .with_unique_key(&["k"])
            .with_version(VersionMode::Column("ver".into()))
    }

    fn make_batch(
        table: &TableMetadata,
        keys: &[&str],
        versions: &[u64],
        deletes: &[bool],
    ) -> RecordBatch {
        RecordBatch::try_new(
            table.schema.clone(),
            vec![
                Arc::new(StringArray::from(keys.to_vec())),
                Arc::new(UInt64Array::from(versions.to_vec())),
                Arc::new(BooleanArray::from(deletes.to_vec())),
            ],
        )
        .unwrap()
    }

    #[test]
    fn higher_version_survives() {
        let table = versioned_table();
        let batch = make_batch(&table, &["K1", "K2", "K1"], &[5, 1, 7], &[false; 3]);
        let info = dedup_with_unique_key(&batch, &table, 1024).unwrap();
        assert_eq!(info.kept_rows().collect::<Vec<_>>(), vec![1, 2]);

        let batch = make_batch(&table, &["K1", "K2", "K1"], &[7, 1, 5], &[false; 3]);
        let info = dedup_with_unique_key(&batch, &table, 1024).unwrap();
        assert_eq!(info.kept_rows().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn equal_versions_keep_later_row() {
        let table = versioned_table();
        let batch = make_batch(&table, &["a", "a"], &[3, 3], &[false, false]);
        let info = dedup_with_unique_key(&batch, &table, 1024).unwrap();
        assert_eq!(info.kept_rows().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn unversioned_delete_always_wins() {
        let table = versioned_table();
        let batch = make_batch(
            &table,
            &["a", "a", "b", "b"],
            &[9, 0, 9, 4],
            &[false, true, false, true],
        );
        let info = dedup_with_unique_key(&batch, &table, 1024).unwrap();
        // "a": the delete has no version and wins; "b": the delete has a lower
        // version and loses.
        assert_eq!(info.kept_rows().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn implicit_version_keeps_last_arrival() {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::UInt64, false)]));
        let table = TableMetadata::new(TableId(1), "t", schema.clone()).with_unique_key(&["id"]);
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(UInt64Array::from(vec![1, 2, 1, 1]))],
        )
        .unwrap();
        let info = dedup_with_unique_key(&batch, &table, 1024).unwrap();
        assert_eq!(info.kept_rows().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(filter_batch(&batch, &info).unwrap().num_rows(), 2);
    }

    #[test]
    fn randomized_survivor_has_max_version() {
        let table = versioned_table();
        let mut rng = rand::rng();
        let n = 500;
        let keys: Vec<String> = (0..n).map(|_| format!("k{}", rng.random_range(0..40))).collect();
        let versions: Vec<u64> = (0..n).map(|_| rng.random_range(1..1000)).collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let batch = make_batch(&table, &key_refs, &versions, &vec![false; n]);

        let info = dedup_with_unique_key(&batch, &table, 1024).unwrap();

        // Expected survivor: max version, ties to the later row.
        let mut expected: FxHashMap<&str, usize> = FxHashMap::default();
        for (row, key) in key_refs.iter().enumerate() {
            let slot = expected.entry(*key).or_insert(row);
            if versions[row] >= versions[*slot] {
                *slot = row;
            }
        }
        let mut expected: Vec<usize> = expected.into_values().collect();
        expected.sort_unstable();
        assert_eq!(info.kept_rows().collect::<Vec<_>>(), expected);
    }
}
