use arrow::array::{BooleanArray, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use mtree_types::{DELETE_FLAG_COLUMN_NAME, TableId, TableMetadata, VersionMode};
use mtree_write::dedup_with_unique_key;
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::hint::black_box;
use std::sync::Arc;

fn table() -> TableMetadata {
    let schema = Arc::new(Schema::new(vec![
        Field::new("k", DataType::Utf8, false),
        Field::new("ver", DataType::UInt64, false),
        Field::new(DELETE_FLAG_COLUMN_NAME, DataType::Boolean, false),
    ]));
    TableMetadata::new(TableId(1), "bench", schema)
        .with_unique_key(&["k"])
        .with_version(VersionMode::Column("ver".into()))
}

/// `rows` rows drawn from `distinct` keys.
fn make_batch(table: &TableMetadata, rows: usize, distinct: usize, seed: u64) -> RecordBatch {
    let mut rng = StdRng::seed_from_u64(seed);
    let keys: Vec<String> = (0..rows)
        .map(|_| format!("key-{:08}", rng.random_range(0..distinct)))
        .collect();
    let versions: Vec<u64> = (0..rows).map(|_| rng.random_range(1..1_000_000)).collect();
    let deletes: Vec<bool> = (0..rows).map(|_| rng.random_bool(0.01)).collect();
    RecordBatch::try_new(
        table.schema.clone(),
        vec![
            Arc::new(StringArray::from(keys)),
            Arc::new(UInt64Array::from(versions)),
            Arc::new(BooleanArray::from(deletes)),
        ],
    )
    .unwrap()
}

fn bench_dedup_with_unique_key(c: &mut Criterion) {
    let table = table();
    let mut group = c.benchmark_group("dedup_with_unique_key");

    for &rows in &[1_024usize, 65_536, 262_144] {
        for &dup_ratio in &[1usize, 4] {
            let batch = make_batch(&table, rows, rows / dup_ratio, 42);
            group.throughput(Throughput::Elements(rows as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("dup_x{dup_ratio}"), rows),
                &batch,
                |b, batch| {
                    b.iter(|| {
                        let info = dedup_with_unique_key(black_box(batch), &table, 1 << 20).unwrap();
                        black_box(info.num_filtered)
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_dedup_with_unique_key);
criterion_main!(benches);
