//! # Partitioning Benchmarks
//!
//! Label sort, shard assignment and view iteration over a CIFAR-sized
//! training set (200 shards of 250).
//!
//! Run: `cargo bench --bench partition_bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fedsim_core::data::source::SyntheticSpec;
use fedsim_core::prelude::*;

fn dataset(len: usize) -> InMemoryDataset {
    SyntheticSpec {
        train_len: len,
        test_len: 0,
        feature_dim: 4,
        num_classes: 10,
        spread: 0.5,
        seed: 1,
    }
    .generate()
    .map(|pair| pair.train)
    .unwrap()
}

fn bench_sort_by_label(c: &mut Criterion) {
    let ds = dataset(50_000);
    let layout = ShardLayout::new(TRAIN_SHARDS, 250);

    c.bench_function("sort_by_label_50k", |b| {
        b.iter(|| black_box(sort_by_label(&ds, &layout).unwrap()))
    });
}

fn bench_partition_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition_train");
    let ds = dataset(50_000);

    for mode in DistributionMode::all() {
        group.bench_with_input(BenchmarkId::new("mode", mode), &mode, |b, &mode| {
            b.iter(|| black_box(partition_train(&ds, 100, mode).unwrap()))
        });
    }

    group.finish();
}

fn bench_partition_test(c: &mut Criterion) {
    let ds = dataset(10_000);

    c.bench_function("partition_test_10k", |b| {
        b.iter(|| black_box(partition_test(&ds).unwrap()))
    });
}

fn bench_view_batches(c: &mut Criterion) {
    let ds = dataset(50_000);
    let groups = partition_train(&ds, 1, DistributionMode::LowLabelSkew).unwrap();
    let view = DatasetView::new(&ds, groups.get(0).unwrap());
    let loader = DataLoader::new(LoaderSource::Split(view));

    c.bench_function("view_batches", |b| {
        b.iter(|| {
            let mut n = 0;
            for batch in loader.iter() {
                n += batch.unwrap().len();
            }
            black_box(n)
        })
    });
}

criterion_group!(
    benches,
    bench_sort_by_label,
    bench_partition_modes,
    bench_partition_test,
    bench_view_batches
);
criterion_main!(benches);
