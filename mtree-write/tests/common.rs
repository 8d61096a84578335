#![allow(dead_code)]

use arrow::array::{AsArray, BooleanArray, StringArray, UInt64Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, UInt64Type};
use arrow::record_batch::RecordBatch;
use mtree_catalog::{MemCatalog, MemLockService};
use mtree_storage::{MemPager, PartReader, PartStore, Pager};
use mtree_transaction::{TransactionKind, TxnIdManager, WriteTransaction};
use mtree_types::{DELETE_FLAG_COLUMN_NAME, TableId, TableMetadata, VersionMode, WriteSettings};
use mtree_write::{BlockOutputStream, CommitResult, WriteServices};
use std::sync::Arc;
use std::time::Duration;

pub const TABLE: TableId = TableId(7);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `k` (unique key), `ver` (version), delete flag, `payload`.
pub fn orders_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("k", DataType::Utf8, false),
        Field::new("ver", DataType::UInt64, false),
        Field::new(DELETE_FLAG_COLUMN_NAME, DataType::Boolean, false),
        Field::new("payload", DataType::Utf8, true),
    ]))
}

/// Unique key `k`, versioned by `ver`, clustered by `k` into 8 buckets.
pub fn orders_table() -> TableMetadata {
    TableMetadata::new(TABLE, "orders", orders_schema())
        .with_unique_key(&["k"])
        .with_version(VersionMode::Column("ver".into()))
        .with_cluster_by(&["k"], 8)
}

/// Same columns, no unique key.
pub fn events_table() -> TableMetadata {
    TableMetadata::new(TABLE, "events", orders_schema())
}

pub fn orders_batch(rows: &[(&str, u64)]) -> RecordBatch {
    let rows: Vec<(&str, u64, bool)> = rows.iter().map(|(k, v)| (*k, *v, false)).collect();
    orders_batch_with_deletes(&rows)
}

pub fn orders_batch_with_deletes(rows: &[(&str, u64, bool)]) -> RecordBatch {
    RecordBatch::try_new(
        orders_schema(),
        vec![
            Arc::new(StringArray::from(
                rows.iter().map(|r| r.0).collect::<Vec<_>>(),
            )),
            Arc::new(UInt64Array::from(
                rows.iter().map(|r| r.1).collect::<Vec<_>>(),
            )),
            Arc::new(BooleanArray::from(
                rows.iter().map(|r| r.2).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                rows.iter()
                    .map(|r| Some(format!("{}@{}", r.0, r.1)))
                    .collect::<Vec<_>>(),
            )),
        ],
    )
    .unwrap()
}

pub struct Harness {
    pub manager: TxnIdManager,
    pub catalog: Arc<MemCatalog>,
    pub store: PartStore<MemPager>,
    pub locks: MemLockService,
    pub services: WriteServices,
}

impl Harness {
    pub fn new(table: TableMetadata) -> Self {
        Self::with_settings(table, test_settings())
    }

    pub fn with_settings(table: TableMetadata, settings: WriteSettings) -> Self {
        init_tracing();
        let manager = TxnIdManager::new();
        let catalog = Arc::new(MemCatalog::new(manager.clone()));
        catalog.create_table(table).unwrap();
        let store = PartStore::new(Arc::new(MemPager::new()));
        let locks = MemLockService::new();
        let services = WriteServices::in_memory(
            Arc::clone(&catalog),
            store.clone(),
            locks.clone(),
            settings,
        );
        Self {
            manager,
            catalog,
            store,
            locks,
            services,
        }
    }

    pub fn begin(&self, kind: TransactionKind) -> WriteTransaction {
        WriteTransaction::begin(&self.manager, kind)
    }

    pub fn stream(&self, table: &TableMetadata, txn: WriteTransaction) -> BlockOutputStream {
        BlockOutputStream::try_new(table.clone(), txn, self.services.clone(), false).unwrap()
    }

    /// One server transaction writing `batches` and committing.
    pub fn write(
        &self,
        table: &TableMetadata,
        batches: &[RecordBatch],
    ) -> mtree_result::Result<CommitResult> {
        let mut stream = self.stream(table, self.begin(TransactionKind::Server));
        for batch in batches {
            stream.write(batch)?;
        }
        stream.write_suffix()
    }

    /// Alive `(k, ver)` rows of every visible part, sorted.
    pub fn alive_rows(&self) -> Vec<(String, u64)> {
        let mut rows = Vec::new();
        for part in self.catalog.visible_parts(TABLE).unwrap() {
            let batch = self.store.read_part(&part).unwrap();
            let keys = cast(batch.column_by_name("k").unwrap(), &DataType::Utf8).unwrap();
            let keys = keys.as_string::<i32>();
            let versions = batch.column_by_name("ver").unwrap();
            let versions = versions.as_primitive::<UInt64Type>();
            for row in 0..batch.num_rows() {
                if part.is_row_alive(row as u32) {
                    rows.push((keys.value(row).to_string(), versions.value(row)));
                }
            }
        }
        rows.sort();
        rows
    }

    /// Blobs currently held by the pager.
    pub fn stored_blobs(&self) -> usize {
        self.store.pager().keys().unwrap().len()
    }
}

pub fn test_settings() -> WriteSettings {
    WriteSettings::default().with_lock_acquire_timeout(Duration::from_secs(5))
}

pub fn rows(expected: &[(&str, u64)]) -> Vec<(String, u64)> {
    let mut rows: Vec<_> = expected.iter().map(|(k, v)| (k.to_string(), *v)).collect();
    rows.sort();
    rows
}
