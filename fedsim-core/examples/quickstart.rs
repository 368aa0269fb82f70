//! Four rounds of non-IID FedAvg on synthetic data
//!
//! Run: `cargo run -p fedsim-core --example quickstart`

use fedsim_core::prelude::*;

fn main() -> Result<()> {
    let config = RunConfig {
        dataset: "synthetic".into(),
        epochs: 4,
        num_users: 10,
        local_ep: 2,
        iid: false,
        data_distribution: 2,
        output_dir: std::env::temp_dir().join("fedsim-quickstart"),
        ..RunConfig::default()
    };

    let outcome = simulate(config)?;
    for line in &outcome.log {
        println!("{}", line);
    }
    if let Some(path) = &outcome.record_path {
        println!("record: {}", path.display());
    }
    Ok(())
}
