//! Benchmarks for the runtime hot paths.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;
use taskflow::prelude::*;

fn bridge_benchmark(c: &mut Criterion) {
    let bridge = DeliveryBridge::new(BridgeConfig::new().with_thresholds(100_000, 1_000_000)).expect("bridge");

    c.bench_function("bridge_post_drain_64", |b| {
        b.iter(|| {
            for i in 0..64 {
                bridge.post(move || {
                    black_box(i);
                });
            }
            black_box(bridge.drain_once())
        });
    });
}

fn token_benchmark(c: &mut Criterion) {
    let root = CancellationToken::new();
    let mut leaf = root.derive();
    for _ in 0..8 {
        leaf = leaf.derive();
    }

    c.bench_function("token_is_cancelled_depth_9", |b| {
        b.iter(|| black_box(leaf.is_cancelled()));
    });
}

fn submit_benchmark(c: &mut Criterion) {
    let runtime = Runtime::new(RuntimeConfig::new().with_max_workers(4)).expect("runtime");

    c.bench_function("submit_and_wait", |b| {
        b.iter(|| {
            let record = runtime
                .submit(SubmitOptions::in_group("bench"), |_| Ok(black_box(1_u64)))
                .expect("submit");
            black_box(record.handle().wait(Some(Duration::from_secs(1))))
        });
    });

    runtime.shutdown(true, None, false);
}

criterion_group!(benches, bridge_benchmark, token_benchmark, submit_benchmark);
criterion_main!(benches);
