//! # Aggregation Benchmarks
//!
//! Federated averaging of MLP-sized parameter sets (784 → 64 → 10).
//!
//! Run: `cargo bench --bench aggregate_bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fedsim_core::prelude::*;

fn bench_average(c: &mut Criterion) {
    let mut group = c.benchmark_group("fedavg");
    let net = Network::new(Architecture::Mlp, 784, 64, 10);

    for clients in [2, 10, 100] {
        let sets: Vec<ParameterSet> = (0..clients).map(|s| net.init_parameters(s as u64)).collect();
        group.bench_with_input(BenchmarkId::new("clients", clients), &sets, |b, sets| {
            b.iter(|| black_box(average(sets).unwrap()))
        });
    }

    group.finish();
}

fn bench_broadcast_clone(c: &mut Criterion) {
    let net = Network::new(Architecture::Mlp, 784, 64, 10);
    let global = net.init_parameters(0);

    c.bench_function("broadcast_clone", |b| b.iter(|| black_box(global.clone())));
}

criterion_group!(benches, bench_average, bench_broadcast_clone);
criterion_main!(benches);
