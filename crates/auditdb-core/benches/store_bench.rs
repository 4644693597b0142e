//! # Store Benchmarks
//!
//! Throughput of the hot store operations on an in-memory audit.
//!
//! Run with: `cargo bench -p auditdb-core`

use auditdb_core::{AuditStore, DataKey, Entity, Identity, Properties};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

fn identity(i: usize) -> Identity {
    Identity::new(format!("e{}", i)).expect("identity")
}

/// A store holding `size` URLs chained by links.
fn populated_store(size: usize) -> AuditStore {
    let store = AuditStore::in_memory("bench").expect("store");
    let entities = (0..size).map(|i| {
        let entity = Entity::new(
            identity(i),
            "resource/url",
            Properties::new().with("index", i as i64),
        )
        .expect("entity");
        if i > 0 { entity.with_link(identity(i - 1)) } else { entity }
    });
    store.add_many(entities).expect("add");
    store
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_many");

    for size in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| populated_store(black_box(size)));
        });
    }

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    for size in [100, 1000] {
        let store = populated_store(size);
        let key = DataKey::Plain(identity(size / 2));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| store.get::<Properties>(black_box(&key)).expect("get"));
        });
    }

    group.finish();
}

fn bench_heap(c: &mut Criterion) {
    let mut group = c.benchmark_group("heap_add_pop");

    for size in [10, 100, 1000] {
        let values: Vec<String> = (0..size).map(|i| format!("v{}", i)).collect();
        let store = AuditStore::in_memory("bench-heap").expect("store");
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                store.heap_add("work", black_box(&values)).expect("add");
                let popped: Vec<String> = store.heap_pop("work", None).expect("pop");
                black_box(popped)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_add, bench_get, bench_heap);
criterion_main!(benches);
