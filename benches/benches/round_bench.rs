//! # Round Benchmarks
//!
//! Local training of one client and a full orchestrated round on
//! synthetic data.
//!
//! Run: `cargo bench --bench round_bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fedsim_core::data::source::SyntheticSpec;
use fedsim_core::prelude::*;

fn bench_local_update(c: &mut Criterion) {
    let data = SyntheticSpec {
        train_len: 1000,
        test_len: 0,
        feature_dim: 16,
        num_classes: 10,
        spread: 0.6,
        seed: 3,
    }
    .generate()
    .unwrap();
    let net = Network::new(Architecture::Mlp, 16, 64, 10);
    let params = net.init_parameters(1);
    let options = LocalTrainOptions {
        local_ep: 1,
        local_bs: 10,
        lr: 0.01,
        momentum: 0.5,
        seed: 1,
    };

    c.bench_function("local_update_1k", |b| {
        b.iter(|| black_box(SgdTrainer.train(&net, params.clone(), &data.train, &options).unwrap()))
    });
}

fn bench_round(c: &mut Criterion) {
    let output = std::env::temp_dir().join("fedsim-round-bench");
    let config = RunConfig {
        dataset: "synthetic".into(),
        num_users: 10,
        local_ep: 1,
        iid: false,
        output_dir: output,
        ..RunConfig::default()
    };
    let data = SyntheticSpec::for_config(&config).generate().unwrap();
    let net = Network::from_config(&config, data.train.feature_dim()).unwrap();
    let mut orch = Orchestrator::new(config.clone(), &net, &SgdTrainer, &data.train, &data.test).unwrap();
    let mut ctx = RunContext::open(&config).unwrap();

    c.bench_function("round_10_clients", |b| {
        b.iter(|| black_box(orch.run_round(0, &mut ctx).unwrap()))
    });
}

criterion_group!(benches, bench_local_update, bench_round);
criterion_main!(benches);
