//! # Component Store Benchmark
//!
//! Measures the cached per-type query against a forced rebuild, and the
//! per-tick publish of every buffered field.
//!
//! Run with: `cargo bench --package lockstep_core`

// Benchmarks don't need docs
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lockstep_core::{Component, ComponentStore, DoubleBuffered, EntityId};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct Position {
    owner: EntityId,
    x: DoubleBuffered<f32>,
    y: DoubleBuffered<f32>,
}

impl Component for Position {
    const KIND: &'static str = "position";

    fn entity(&self) -> EntityId {
        self.owner
    }

    fn switch_buffers(&self) {
        self.x.switch_buffer();
        self.y.switch_buffer();
    }
}

fn populated(count: u64) -> ComponentStore {
    let mut store = ComponentStore::new();
    store.add_components((0..count).map(|raw| Position {
        owner: EntityId::new(raw),
        x: DoubleBuffered::new(0.0),
        y: DoubleBuffered::new(0.0),
    }));
    store
}

/// Benchmark: cached query vs. rebuild after a mutation.
fn bench_query_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("all_for_type");

    for count in [1_000_u64, 100_000] {
        let store = populated(count);
        group.bench_with_input(BenchmarkId::new("cached", count), &store, |b, store| {
            b.iter(|| black_box(store.all_for_type::<Position>().len()));
        });

        group.bench_with_input(BenchmarkId::new("rebuilt", count), &count, |b, &count| {
            let mut store = populated(count);
            let mut next = count;
            b.iter(|| {
                store.add_component(Position {
                    owner: EntityId::new(next),
                    x: DoubleBuffered::new(0.0),
                    y: DoubleBuffered::new(0.0),
                });
                next += 1;
                black_box(store.all_for_type::<Position>().len())
            });
        });
    }

    group.finish();
}

/// Benchmark: one tick of writes followed by the publish.
fn bench_write_and_swap(c: &mut Criterion) {
    let mut store = populated(100_000);
    c.bench_function("write_and_swap_100k", |b| {
        b.iter(|| {
            for position in store.all_for_type::<Position>().iter() {
                position.x.update(|x| x + 1.0);
            }
            store.swap_buffers();
        });
    });
}

criterion_group!(benches, bench_query_cache, bench_write_and_swap);
criterion_main!(benches);
