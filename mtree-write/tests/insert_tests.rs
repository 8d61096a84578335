mod common;

use arrow::record_batch::RecordBatch;
use common::*;
use mtree_result::{Error, Result};
use mtree_storage::{BatchWithPartition, PartWriter, TempPartContext};
use mtree_transaction::{CommitOutcome, TransactionKind, WorkerSource};
use mtree_types::{BlockId, Part, PartState, TableMetadata};
use mtree_write::WriteState;
use std::sync::Arc;

fn insert(h: &Harness, kind: TransactionKind) -> (mtree_write::CommitResult, WriteState) {
    let table = events_table();
    let mut stream = h.stream(&table, h.begin(kind));
    stream
        .write(&orders_batch(&[("a", 1), ("a", 2)]))
        .unwrap();
    let result = stream.write_suffix().unwrap();
    (result, stream.state())
}

#[test]
fn server_insert_commits_without_dedup() {
    let h = Harness::new(events_table());
    let (result, state) = insert(&h, TransactionKind::Server);

    assert_eq!(result.outcome, CommitOutcome::Committed);
    assert_eq!(result.destination, PartState::Visible);
    assert!(result.scope.is_none());
    assert_eq!(state, WriteState::Committed);
    assert_eq!(h.alive_rows(), rows(&[("a", 1), ("a", 2)]));
}

#[test]
fn disabled_commit_leaves_insert_pending() {
    let h = Harness::with_settings(
        events_table(),
        test_settings().with_disable_transaction_commit(true),
    );
    let table = events_table();
    let mut stream = h.stream(&table, h.begin(TransactionKind::Server));
    stream.write(&orders_batch(&[("a", 1)])).unwrap();

    let result = stream.write_suffix().unwrap();
    assert_eq!(result.outcome, CommitOutcome::Pending);
    assert_eq!(stream.state(), WriteState::PlainCommit);
    assert!(stream.transaction().is_pending());
    assert!(h.alive_rows().is_empty());

    let result = stream.commit_pending().unwrap();
    assert_eq!(result.outcome, CommitOutcome::Committed);
    assert_eq!(stream.state(), WriteState::Committed);
    assert_eq!(h.alive_rows(), rows(&[("a", 1)]));
}

#[test]
fn worker_commit_rules() {
    let h = Harness::new(events_table());

    let (kafka, _) = insert(&h, TransactionKind::worker(WorkerSource::Kafka));
    assert_eq!(kafka.outcome, CommitOutcome::Committed);

    let (initial, _) = insert(&h, TransactionKind::worker(WorkerSource::InitialQuery));
    assert_eq!(initial.outcome, CommitOutcome::Committed);

    let explicit = TransactionKind::Worker {
        source: WorkerSource::Kafka,
        explicit_commit: true,
    };
    let (explicit, state) = insert(&h, explicit);
    assert_eq!(explicit.outcome, CommitOutcome::Pending);
    assert_eq!(state, WriteState::PlainCommit);

    let forwarded = TransactionKind::worker(WorkerSource::ServerForwarded {
        rpc_endpoint: Some("10.0.0.1:8124".into()),
    });
    let (forwarded, _) = insert(&h, forwarded);
    assert_eq!(forwarded.outcome, CommitOutcome::Pending);

    // Two committed inserts of two rows each.
    assert_eq!(h.alive_rows().len(), 4);
}

#[test]
fn plain_insert_hides_delete_markers() {
    let h = Harness::new(events_table());
    h.write(
        &events_table(),
        &[orders_batch_with_deletes(&[("a", 1, false), ("b", 1, true)])],
    )
    .unwrap();

    assert_eq!(h.alive_rows(), rows(&[("a", 1)]));
}

#[test]
fn too_many_partitions_writes_nothing() {
    let table = events_table().with_partition_by(&["k"]);
    let h = Harness::with_settings(
        table.clone(),
        test_settings().with_max_partitions_per_insert_block(2),
    );

    let err = h
        .write(&table, &[orders_batch(&[("a", 1), ("b", 1), ("c", 1)])])
        .unwrap_err();

    assert!(matches!(err, Error::TooManyPartitions { count: 3, limit: 2 }));
    assert_eq!(h.stored_blobs(), 0);
}

#[test]
fn aborted_stream_discards_parts() {
    let h = Harness::new(events_table());
    let table = events_table();
    let mut stream = h.stream(&table, h.begin(TransactionKind::Server));
    stream.write(&orders_batch(&[("a", 1)])).unwrap();
    assert_eq!(h.stored_blobs(), 1);

    stream.abort().unwrap();

    assert_eq!(stream.state(), WriteState::Aborted);
    assert_eq!(h.stored_blobs(), 0);
    assert!(stream.write(&orders_batch(&[("b", 1)])).is_err());
}

/// Fails every write to partition `bad`.
struct FailingWriter {
    inner: Arc<dyn PartWriter>,
}

impl PartWriter for FailingWriter {
    fn write_temp_part(
        &self,
        block: &BatchWithPartition,
        table: &TableMetadata,
        ctx: TempPartContext,
        block_id: BlockId,
    ) -> Result<Part> {
        if block.partition_id == "bad" {
            return Err(Error::storage_write("disk full"));
        }
        self.inner.write_temp_part(block, table, ctx, block_id)
    }

    fn discard(&self, parts: &[Part]) -> Result<()> {
        self.inner.discard(parts)
    }
}

#[test]
fn failed_part_write_discards_siblings() {
    let table = events_table().with_partition_by(&["k"]);
    let h = Harness::new(table.clone());
    let services = h.services.clone().with_writer(Arc::new(FailingWriter {
        inner: Arc::clone(&h.services.writer),
    }));
    let mut stream = mtree_write::BlockOutputStream::try_new(
        table,
        h.begin(TransactionKind::Server),
        services,
        false,
    )
    .unwrap();

    let batch: RecordBatch = orders_batch(&[("ok1", 1), ("bad", 1), ("ok2", 1)]);
    let err = stream.write(&batch).unwrap_err();

    assert!(matches!(err, Error::StorageWrite(_)));
    assert_eq!(stream.state(), WriteState::Aborted);
    assert_eq!(h.stored_blobs(), 0);
    assert!(h.alive_rows().is_empty());
}
