//! fedsim - Federated Learning Simulator
//! Command-line interface for running simulations and inspecting their records

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use fedsim_core::data::partition::{label_histogram, ShardLayout, ShardPartitioner};
use fedsim_core::data::{source, Dataset, LoaderFactory};
use fedsim_core::{simulate, ClientSelection, RunConfig, RunRecord};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fedsim")]
#[command(author = "SIL Contributors")]
#[command(version = "2026.1.16")]
#[command(about = "fedsim - Non-IID federated averaging simulator", long_about = None)]
struct Cli {
    /// Debug-level logging (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full simulation
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Print the effective configuration as JSON before running
        #[arg(long)]
        dump_config: bool,
    },

    /// Show client partitions and test groups without training
    Partition {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Print the histories stored in a run record
    Inspect {
        /// Record file (<output>/objects/<key>.bin)
        #[arg(value_name = "RECORD")]
        record: PathBuf,
    },
}

/// Run configuration: an optional JSON base plus per-field overrides
#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// JSON configuration file; flags override its fields
    #[arg(short, long, value_name = "FILE", env = "FEDSIM_CONFIG")]
    config: Option<PathBuf>,

    /// mnist, fmnist, cifar or synthetic
    #[arg(long)]
    dataset: Option<String>,

    /// Directory with the raw dataset files
    #[arg(long, env = "FEDSIM_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// mlp or linear
    #[arg(long)]
    model: Option<String>,

    /// Global rounds
    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    num_users: Option<usize>,

    /// Fraction of clients per round (with --sample-clients)
    #[arg(long)]
    frac: Option<f64>,

    #[arg(long)]
    local_ep: Option<usize>,

    #[arg(long)]
    local_bs: Option<usize>,

    #[arg(long)]
    lr: Option<f32>,

    #[arg(long)]
    momentum: Option<f32>,

    /// 1 for IID, 0 for non-IID
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
    iid: Option<u8>,

    /// Distribution mode 1-4
    #[arg(long = "dist")]
    data_distribution: Option<u8>,

    /// 1-based client for the standalone train loader
    #[arg(long)]
    which_user: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// GPU ordinal (accepted; computation is CPU-only)
    #[arg(long)]
    gpu: Option<usize>,

    /// Progress report interval in rounds
    #[arg(long)]
    print_every: Option<usize>,

    /// Train a random frac of clients per round instead of all of them
    #[arg(long)]
    sample_clients: bool,

    /// Reject shards assigned to more than one client
    #[arg(long)]
    strict_shards: bool,

    /// Where records and plots are written
    #[arg(short, long, env = "FEDSIM_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,
}

impl ConfigArgs {
    /// Base config (file or defaults) with every given flag applied
    fn resolve(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_json_file(path)
                .with_context(|| format!("failed to load config '{}'", path.display()))?,
            None => RunConfig::default(),
        };
        self.apply(&mut config);
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    fn apply(&self, config: &mut RunConfig) {
        if let Some(dataset) = &self.dataset {
            config.dataset = dataset.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        config.epochs = self.epochs.unwrap_or(config.epochs);
        config.num_users = self.num_users.unwrap_or(config.num_users);
        config.frac = self.frac.unwrap_or(config.frac);
        config.local_ep = self.local_ep.unwrap_or(config.local_ep);
        config.local_bs = self.local_bs.unwrap_or(config.local_bs);
        config.lr = self.lr.unwrap_or(config.lr);
        config.momentum = self.momentum.unwrap_or(config.momentum);
        config.data_distribution = self.data_distribution.unwrap_or(config.data_distribution);
        config.which_user = self.which_user.unwrap_or(config.which_user);
        config.seed = self.seed.unwrap_or(config.seed);
        config.print_every = self.print_every.unwrap_or(config.print_every);
        if let Some(iid) = self.iid {
            config.iid = iid == 1;
        }
        if self.gpu.is_some() {
            config.gpu = self.gpu;
        }
        if self.sample_clients {
            config.client_selection = ClientSelection::Fraction;
        }
        if self.strict_shards {
            config.strict_shards = true;
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "fedsim=debug,fedsim_core=debug"
    } else {
        "fedsim=info,fedsim_core=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run { config, dump_config } => run_command(&config, dump_config),
        Commands::Partition { config } => partition_command(&config),
        Commands::Inspect { record } => inspect_command(&record),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

// ============================================================================
// Commands
// ============================================================================

fn run_command(args: &ConfigArgs, dump_config: bool) -> Result<()> {
    let config = args.resolve()?;
    if dump_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
    }

    println!(
        "{} {} / {} on {} clients ({}, mode {})",
        "Running".green().bold(),
        config.dataset.cyan(),
        config.model.cyan(),
        config.num_users,
        if config.iid { "IID" } else { "non-IID" },
        config.data_distribution
    );

    let outcome = simulate(config).context("simulation failed")?;

    for line in &outcome.log {
        println!("  {}", line);
    }
    println!();
    println!(
        "{} after {} rounds: d1 {:.2}%, d2 {:.2}%",
        "Final accuracy".bold(),
        outcome.history.rounds(),
        100.0 * outcome.history.acc_1.last().copied().unwrap_or_default(),
        100.0 * outcome.history.acc_2.last().copied().unwrap_or_default()
    );
    if let Some(path) = &outcome.record_path {
        println!("{} {}", "   Saved".green().bold(), path.display().to_string().cyan());
    }
    if let Some(plots) = &outcome.plots {
        println!("{} {}", " Plotted".green().bold(), plots.loss.display().to_string().cyan());
        println!("{} {}", " Plotted".green().bold(), plots.accuracy.display().to_string().cyan());
    }
    for err in &outcome.artifact_errors {
        println!("{} {}", "warning:".yellow().bold(), err);
    }
    Ok(())
}

fn partition_command(args: &ConfigArgs) -> Result<()> {
    let config = args.resolve()?;
    let pair = source::load(&config).context("failed to load dataset")?;
    let factory = LoaderFactory::from_config(&config)?;
    let groups = factory.client_sets(&pair.train)?;

    println!(
        "{} mode {} over {} training samples",
        "Partition".bold(),
        config.data_distribution,
        pair.train.len()
    );
    if config.iid {
        println!(
            "  {} IID runs train every client on the full dataset",
            "note:".yellow()
        );
    }
    for (client, indices) in groups.iter() {
        if indices.is_empty() {
            println!("  client {:>3}: {}", client, "empty".dimmed());
            continue;
        }
        let histogram = label_histogram(&pair.train, indices)?;
        println!(
            "  client {:>3}: {:>6} samples  {}",
            client,
            indices.len(),
            format_histogram(&histogram)
        );
    }

    let layout = ShardLayout::fit(config.test_shards, pair.test.len())?;
    let (group_1, group_2) = ShardPartitioner::new(layout).partition_test(&pair.test)?;
    println!();
    println!("{}", "Test groups".bold());
    for (name, indices) in [("d1", &group_1), ("d2", &group_2)] {
        let histogram = label_histogram(&pair.test, indices)?;
        println!(
            "  {}: {:>6} samples  {}",
            name,
            indices.len(),
            format_histogram(&histogram)
        );
    }
    Ok(())
}

fn inspect_command(path: &Path) -> Result<()> {
    let record = RunRecord::load(path)
        .with_context(|| format!("failed to read record '{}'", path.display()))?;

    println!("{} {}", "Run".bold(), record.key.to_string().cyan());
    println!(
        "  {:>5}  {:>10}  {:>10}  {:>7}  {:>10}  {:>7}",
        "round", "train_loss", "loss_1", "acc_1", "loss_2", "acc_2"
    );
    for round in 0..record.rounds() {
        let at = |values: &[f32]| values.get(round).copied().unwrap_or(f32::NAN);
        println!(
            "  {:>5}  {:>10.4}  {:>10.4}  {:>6.2}%  {:>10.4}  {:>6.2}%",
            round + 1,
            at(&record.train_loss),
            at(&record.loss_1),
            100.0 * at(&record.acc_1),
            at(&record.loss_2),
            100.0 * at(&record.acc_2)
        );
    }
    Ok(())
}

fn format_histogram(histogram: &BTreeMap<usize, usize>) -> String {
    histogram
        .iter()
        .map(|(label, count)| format!("{}:{}", label, count))
        .collect::<Vec<_>>()
        .join(" ")
}
