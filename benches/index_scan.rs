use std::sync::Arc;

use criterion::{black_box, BenchmarkId, Criterion};
use criterion::{criterion_group, criterion_main};
use tempfile::tempdir;

use chronicle_temporal::{
    IndexKind, IndexScanCursor, IndexValue, ManualClock, Order, StoreConfig, TemporalStore, WriteBatch,
    MASTER,
};

const ROWS: i64 = 2_000;

fn setup() -> (tempfile::TempDir, TemporalStore, i64) {
    let dir = tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::new(1_000));
    let store = TemporalStore::open_with_clock(dir.path(), StoreConfig::default(), clock).expect("open");
    store.define_index("score", IndexKind::Long).expect("index");
    let mut batch = WriteBatch::new();
    for row in 0..ROWS {
        batch.index("score", IndexValue::Long(row % 97), format!("row-{row}"));
    }
    store.commit(MASTER, &batch).expect("commit");
    store.create_branch("dev", MASTER, None).expect("branch");

    // dev rewrites a tenth of the rows
    let mut batch = WriteBatch::new();
    for row in (0..ROWS).step_by(10) {
        batch
            .unindex("score", IndexValue::Long(row % 97), format!("row-{row}"))
            .index("score", IndexValue::Long(row % 89), format!("row-{row}"));
    }
    let at = store.commit("dev", &batch).expect("commit");
    (dir, store, at)
}

fn bench_scan(c: &mut Criterion) {
    let (_dir, store, at) = setup();
    let mut group = c.benchmark_group("index_scan");
    for branch in [MASTER, "dev"] {
        group.bench_with_input(BenchmarkId::from_parameter(branch), &branch, |b, &branch| {
            b.iter(|| {
                let mut cursor = store
                    .open_index_scan(branch, black_box(at), "score", Order::Ascending)
                    .expect("scan");
                let mut seen = 0usize;
                while cursor.advance().expect("advance") {
                    seen += 1;
                }
                cursor.close();
                black_box(seen)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scan);
criterion_main!(benches);
