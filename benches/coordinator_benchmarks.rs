//! Performance benchmarks for the coordinator pump loop
//! Measures dispatch/settlement throughput, the dedup scan, and promise
//! handler fan-out.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ripple::{Coordinator, Dispatch, Promise};
use std::hint::black_box;

/// Dispatch `count` keys whose mapped values settle immediately and fold
/// them through the reduce step. Dominated by the pump loop plus the
/// linear dedup scan over dispatched keys.
fn bench_value_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("coordinator_value_dispatch");
    for count in [100u32, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let coordinator: Coordinator<u32, u64, String, u64> =
                    Coordinator::with_keys(0, 0..count);
                coordinator.map_with(|key| Some(Dispatch::Value(*key as u64)));
                coordinator.reduce_with(
                    |acc, value, _feed, _key, _resolved, _rejected| acc + *value,
                );
                coordinator.finish_with(|_acc, _feed, _resolved, _rejected| {});
                coordinator.start();
                black_box(coordinator.value())
            })
        });
    }
    group.finish();
}

/// A chain of 1000 keys where every reduce feeds the next key forward,
/// exercising the re-entrancy queue.
fn bench_feed_forward_chain(c: &mut Criterion) {
    c.bench_function("coordinator_feed_forward_chain_1000", |b| {
        b.iter(|| {
            let coordinator: Coordinator<u32, u32, String, u32> =
                Coordinator::with_keys(0, [0u32]);
            coordinator.map_with(|key| Some(Dispatch::Value(*key)));
            coordinator.reduce_with(|acc, value, feed, _key, _resolved, _rejected| {
                if *value < 1_000 {
                    feed.feed(*value + 1);
                }
                acc + 1
            });
            coordinator.finish_with(|_acc, _feed, _resolved, _rejected| {});
            coordinator.start();
            black_box(coordinator.value())
        })
    });
}

/// Settle one promise fanned out to 100 registered handlers.
fn bench_promise_settlement(c: &mut Criterion) {
    c.bench_function("promise_settle_100_handlers", |b| {
        b.iter(|| {
            let promise: Promise<u64> = Promise::new();
            for _ in 0..100 {
                promise.on_resolve(|value| {
                    black_box(*value);
                });
            }
            promise.resolve(7);
            black_box(promise.is_resolved())
        })
    });
}

criterion_group!(
    benches,
    bench_value_dispatch,
    bench_feed_forward_chain,
    bench_promise_settlement
);
criterion_main!(benches);
