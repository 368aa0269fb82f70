//! # Round Orchestrator
//!
//! Drives a simulation through its phases:
//!
//! ```text
//! Init -> { Broadcast -> LocalTrainAll -> Aggregate -> Evaluate -> Log } x epochs -> Terminal
//! ```
//!
//! Rounds run sequentially. Each selected client trains on its own clone of
//! the current global parameters, so clients never observe each other's
//! in-round updates. The global set is replaced once per round by the
//! aggregate.

use std::path::PathBuf;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::aggregate::average;
use crate::config::{ClientSelection, RunConfig};
use crate::context::RunContext;
use crate::data::dataset::Dataset;
use crate::data::loader::{DataLoader, LoaderFactory};
use crate::data::partition::ClientIndexSets;
use crate::data::source;
use crate::error::{FedError, Result};
use crate::model::{Model, Network, ParameterSet};
use crate::plot::{self, PlotPaths};
use crate::record::{RunKey, RunRecord};
use crate::train::{inference, EvalResult, LocalTrainOptions, LocalTrainer, SgdTrainer};

/// Phase of the round state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoundPhase {
    Init,
    Broadcast,
    LocalTrainAll,
    Aggregate,
    Evaluate,
    Log,
    Terminal,
}

impl RoundPhase {
    /// Phase that follows `self`; `rounds_remaining` decides where `Log` goes
    pub fn next(self, rounds_remaining: bool) -> Option<RoundPhase> {
        match self {
            RoundPhase::Init => Some(RoundPhase::Broadcast),
            RoundPhase::Broadcast => Some(RoundPhase::LocalTrainAll),
            RoundPhase::LocalTrainAll => Some(RoundPhase::Aggregate),
            RoundPhase::Aggregate => Some(RoundPhase::Evaluate),
            RoundPhase::Evaluate => Some(RoundPhase::Log),
            RoundPhase::Log if rounds_remaining => Some(RoundPhase::Broadcast),
            RoundPhase::Log => Some(RoundPhase::Terminal),
            RoundPhase::Terminal => None,
        }
    }
}

/// Per-round histories accumulated during a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunHistory {
    pub train_loss: Vec<f32>,
    pub loss_1: Vec<f32>,
    pub acc_1: Vec<f32>,
    pub loss_2: Vec<f32>,
    pub acc_2: Vec<f32>,
    /// 1-based rounds at which a progress report was emitted
    pub logged_rounds: Vec<usize>,
}

impl RunHistory {
    pub fn rounds(&self) -> usize {
        self.train_loss.len()
    }

    /// Mean of the per-round training losses so far
    pub fn running_train_loss(&self) -> f32 {
        if self.train_loss.is_empty() {
            return 0.0;
        }
        self.train_loss.iter().sum::<f32>() / self.train_loss.len() as f32
    }

    pub fn to_record(&self, key: RunKey) -> RunRecord {
        RunRecord {
            key,
            train_loss: self.train_loss.clone(),
            loss_1: self.loss_1.clone(),
            acc_1: self.acc_1.clone(),
            loss_2: self.loss_2.clone(),
            acc_2: self.acc_2.clone(),
        }
    }
}

/// What one round produced
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSummary {
    /// 1-based round number
    pub round: usize,
    pub train_loss: f32,
    pub eval_1: EvalResult,
    pub eval_2: EvalResult,
    pub clients_trained: usize,
    pub clients_skipped: usize,
}

/// Result of a completed run
#[derive(Debug)]
pub struct RunOutcome {
    pub history: RunHistory,
    pub global: ParameterSet,
    /// Where the run record landed, if persisting succeeded
    pub record_path: Option<PathBuf>,
    pub plots: Option<PlotPaths>,
    /// Persist or plot failures; training results are still valid
    pub artifact_errors: Vec<FedError>,
    pub elapsed: Duration,
    pub log: Vec<String>,
}

pub struct Orchestrator<'a, D: Dataset + ?Sized> {
    config: RunConfig,
    model: &'a dyn Model,
    trainer: &'a dyn LocalTrainer,
    train: &'a D,
    factory: LoaderFactory,
    groups: ClientIndexSets,
    test_1: DataLoader<'a, D>,
    test_2: DataLoader<'a, D>,
    options: LocalTrainOptions,
    global: ParameterSet,
    history: RunHistory,
    phase: RoundPhase,
}

impl<'a, D: Dataset + ?Sized> Orchestrator<'a, D> {
    /// Partition the training set, build the two test groups and
    /// initialise the global model
    pub fn new(
        config: RunConfig,
        model: &'a dyn Model,
        trainer: &'a dyn LocalTrainer,
        train: &'a D,
        test: &'a D,
    ) -> Result<Self> {
        config.validate()?;
        if let Some(gpu) = config.gpu {
            warn!(gpu, "GPU requested but computation is CPU-only");
        }

        let factory = LoaderFactory::from_config(&config)?;
        // IID clients train on the full set, so the partition is never read
        let groups = if config.iid {
            ClientIndexSets::default()
        } else {
            factory.client_sets(train)?
        };
        let (test_1, test_2) = factory.test_loader_niid(test)?;
        let global = model.init_parameters(config.seed);

        info!(
            model = %model.architecture(),
            parameters = global.num_parameters(),
            clients = config.num_users,
            mode = config.data_distribution,
            iid = config.iid,
            "orchestrator ready"
        );

        Ok(Self {
            options: LocalTrainOptions::from_config(&config),
            config,
            model,
            trainer,
            train,
            factory,
            groups,
            test_1,
            test_2,
            global,
            history: RunHistory::default(),
            phase: RoundPhase::Init,
        })
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    pub fn global(&self) -> &ParameterSet {
        &self.global
    }

    pub fn groups(&self) -> &ClientIndexSets {
        &self.groups
    }

    fn enter(&mut self, phase: RoundPhase) {
        trace!(from = ?self.phase, to = ?phase, "phase");
        self.phase = phase;
    }

    /// Clients that train in `round` (0-based)
    pub fn select_clients(&self, round: usize) -> Vec<usize> {
        let n = self.config.num_users;
        match self.config.client_selection {
            ClientSelection::All => (0..n).collect(),
            ClientSelection::Fraction => {
                let m = ((self.config.frac * n as f64).floor() as usize).clamp(1, n);
                let mut rng = StdRng::seed_from_u64(self.config.seed ^ ((round as u64 + 1) << 16));
                let mut chosen = rand::seq::index::sample(&mut rng, n, m).into_vec();
                chosen.sort_unstable();
                chosen
            }
        }
    }

    /// One full round: broadcast, local training, aggregation, evaluation
    /// and the periodic progress report
    pub fn run_round(&mut self, round: usize, ctx: &mut RunContext) -> Result<RoundSummary> {
        self.enter(RoundPhase::Broadcast);
        let clients = self.select_clients(round);
        info!(round = round + 1, clients = clients.len(), "round started");

        self.enter(RoundPhase::LocalTrainAll);
        let mut local_params = Vec::with_capacity(clients.len());
        let mut local_losses = Vec::with_capacity(clients.len());
        let mut skipped = 0;
        for client in clients {
            let data = self.factory.client_source(self.train, &self.groups, client)?;
            if data.is_empty() {
                warn!(round = round + 1, client, "client has no data, skipping");
                skipped += 1;
                continue;
            }
            let update = self.trainer.train(
                self.model,
                self.global.clone(),
                &data,
                &self.options.for_client(round, client),
            )?;
            debug!(
                round = round + 1,
                client,
                samples = update.samples,
                loss = update.avg_loss,
                "local update"
            );
            local_params.push(update.params);
            local_losses.push(update.avg_loss);
        }
        if local_params.is_empty() {
            return Err(FedError::NoClientsTrained);
        }

        self.enter(RoundPhase::Aggregate);
        self.global = average(&local_params)?;
        let train_loss = local_losses.iter().sum::<f32>() / local_losses.len() as f32;

        self.enter(RoundPhase::Evaluate);
        let eval_1 = inference(self.model, &self.global, &self.test_1)?;
        let eval_2 = inference(self.model, &self.global, &self.test_2)?;
        self.history.train_loss.push(train_loss);
        self.history.loss_1.push(eval_1.loss);
        self.history.acc_1.push(eval_1.accuracy);
        self.history.loss_2.push(eval_2.loss);
        self.history.acc_2.push(eval_2.accuracy);

        self.enter(RoundPhase::Log);
        if (round + 1) % self.config.print_every == 0 {
            self.report(round + 1, ctx);
        }

        Ok(RoundSummary {
            round: round + 1,
            train_loss,
            eval_1,
            eval_2,
            clients_trained: local_params.len(),
            clients_skipped: skipped,
        })
    }

    fn report(&mut self, round: usize, ctx: &mut RunContext) {
        let running = self.history.running_train_loss();
        let acc_1 = self.history.acc_1.last().copied().unwrap_or_default();
        let acc_2 = self.history.acc_2.last().copied().unwrap_or_default();
        info!(round, train_loss = running, acc_1, acc_2, "progress");
        ctx.log(format!(
            "Avg Training Stats after {} global rounds: Training Loss : {:.4}, Test Accuracy d1: {:.2}%, d2: {:.2}%",
            round,
            running,
            100.0 * acc_1,
            100.0 * acc_2
        ));
        self.history.logged_rounds.push(round);
    }

    /// Run every configured round, then persist the record and render plots
    pub fn run(&mut self) -> Result<RunOutcome> {
        let mut ctx = RunContext::open(&self.config)?;
        for round in 0..self.config.epochs {
            self.run_round(round, &mut ctx)?;
        }
        self.enter(RoundPhase::Terminal);
        Ok(self.finish(ctx))
    }

    /// Terminal phase; artifact failures are collected, never fatal
    fn finish(&mut self, ctx: RunContext) -> RunOutcome {
        let record = self.history.to_record(ctx.key().clone());
        let mut artifact_errors = Vec::new();

        let record_path = match record.save(ctx.objects_dir()) {
            Ok(path) => Some(path),
            Err(err) => {
                error!(error = %err, "failed to persist run record");
                artifact_errors.push(err);
                None
            }
        };
        let plots = match plot::render(&record, ctx.output_dir()) {
            Ok(paths) => Some(paths),
            Err(err) => {
                error!(error = %err, "failed to render plots");
                artifact_errors.push(err);
                None
            }
        };

        let closed = ctx.close();
        RunOutcome {
            history: self.history.clone(),
            global: self.global.clone(),
            record_path,
            plots,
            artifact_errors,
            elapsed: closed.elapsed,
            log: closed.log,
        }
    }
}

/// Load the configured dataset, build the model and run to completion
pub fn simulate(config: RunConfig) -> Result<RunOutcome> {
    config.validate()?;
    let pair = source::load(&config)?;
    let model = Network::from_config(&config, pair.train.feature_dim())?;
    let trainer = SgdTrainer;
    let mut orchestrator = Orchestrator::new(config, &model, &trainer, &pair.train, &pair.test)?;
    orchestrator.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::source::SyntheticSpec;
    use crate::model::Architecture;
    use tempfile::TempDir;

    fn small_config(dir: &TempDir) -> RunConfig {
        RunConfig {
            dataset: "synthetic".into(),
            model: "linear".into(),
            epochs: 2,
            num_users: 4,
            local_ep: 1,
            local_bs: 20,
            lr: 0.05,
            iid: false,
            output_dir: dir.path().to_path_buf(),
            ..RunConfig::default()
        }
    }

    fn small_spec() -> SyntheticSpec {
        SyntheticSpec {
            train_len: 400,
            test_len: 400,
            feature_dim: 4,
            num_classes: 10,
            spread: 0.3,
            seed: 5,
        }
    }

    fn small_data() -> crate::data::source::DatasetPair {
        small_spec().generate().unwrap()
    }

    #[test]
    fn test_phase_sequence() {
        let mut phase = RoundPhase::Init;
        let mut seen = vec![phase];
        while let Some(next) = phase.next(false) {
            seen.push(next);
            phase = next;
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(RoundPhase::Log.next(true), Some(RoundPhase::Broadcast));
        assert_eq!(RoundPhase::Terminal.next(true), None);
    }

    #[test]
    fn test_fraction_selection() {
        let dir = TempDir::new().unwrap();
        let data = small_data();
        let net = Network::new(Architecture::Linear, 4, 0, 10);
        let config = RunConfig {
            num_users: 20,
            frac: 0.25,
            client_selection: ClientSelection::Fraction,
            ..small_config(&dir)
        };
        let orch = Orchestrator::new(config, &net, &SgdTrainer, &data.train, &data.test).unwrap();

        let picked = orch.select_clients(0);
        assert_eq!(picked.len(), 5);
        assert!(picked.windows(2).all(|w| w[0] < w[1]));
        assert!(picked.iter().all(|&c| c < 20));
        assert_eq!(picked, orch.select_clients(0));
    }

    #[test]
    fn test_fraction_selection_picks_at_least_one() {
        let dir = TempDir::new().unwrap();
        let data = small_data();
        let net = Network::new(Architecture::Linear, 4, 0, 10);
        let config = RunConfig {
            num_users: 4,
            frac: 0.1,
            client_selection: ClientSelection::Fraction,
            ..small_config(&dir)
        };
        let orch = Orchestrator::new(config, &net, &SgdTrainer, &data.train, &data.test).unwrap();
        assert_eq!(orch.select_clients(3).len(), 1);
    }

    #[test]
    fn test_round_keeps_global_shape() {
        let dir = TempDir::new().unwrap();
        let data = small_data();
        let net = Network::new(Architecture::Mlp, 4, 6, 10);
        let mut orch = Orchestrator::new(small_config(&dir), &net, &SgdTrainer, &data.train, &data.test).unwrap();
        let before = orch.global().clone();
        let mut ctx = RunContext::open(&small_config(&dir)).unwrap();

        let summary = orch.run_round(0, &mut ctx).unwrap();
        assert_eq!(summary.clients_trained, 4);
        assert!(orch.global().check_compatible(&before).is_ok());
        assert_ne!(orch.global(), &before);
        assert_eq!(orch.phase(), RoundPhase::Log);
        // print_every is 2, so round 1 is silent
        assert!(ctx.lines().is_empty());
    }

    #[test]
    fn test_dual_model_skips_empty_clients() {
        let dir = TempDir::new().unwrap();
        let data = small_data();
        let net = Network::new(Architecture::Linear, 4, 0, 10);
        let config = RunConfig {
            data_distribution: 4,
            ..small_config(&dir)
        };
        let mut orch = Orchestrator::new(config.clone(), &net, &SgdTrainer, &data.train, &data.test).unwrap();
        let mut ctx = RunContext::open(&config).unwrap();

        let summary = orch.run_round(0, &mut ctx).unwrap();
        assert_eq!(summary.clients_trained, 2);
        assert_eq!(summary.clients_skipped, 2);
    }

    #[test]
    fn test_no_clients_trained() {
        let dir = TempDir::new().unwrap();
        let data = small_data();
        let net = Network::new(Architecture::Linear, 4, 0, 10);
        let config = RunConfig {
            data_distribution: 4,
            client_selection: ClientSelection::Fraction,
            num_users: 40,
            frac: 0.025,
            seed: 0,
            ..small_config(&dir)
        };
        let mut orch = Orchestrator::new(config.clone(), &net, &SgdTrainer, &data.train, &data.test).unwrap();
        let mut ctx = RunContext::open(&config).unwrap();

        // Find a round whose single pick is one of the 38 empty clients
        let round = (0..100)
            .find(|&r| orch.select_clients(r)[0] >= 2)
            .unwrap();
        assert!(matches!(orch.run_round(round, &mut ctx), Err(FedError::NoClientsTrained)));
    }

    #[test]
    fn test_iid_run_skips_partitioning() {
        let dir = TempDir::new().unwrap();
        // 401 samples do not split into 200 shards
        let data = SyntheticSpec {
            train_len: 401,
            ..small_spec()
        }
        .generate()
        .unwrap();
        let net = Network::new(Architecture::Linear, 4, 0, 10);
        let config = RunConfig {
            iid: true,
            ..small_config(&dir)
        };
        let mut orch = Orchestrator::new(config.clone(), &net, &SgdTrainer, &data.train, &data.test).unwrap();
        assert_eq!(orch.groups().num_clients(), 0);

        let mut ctx = RunContext::open(&config).unwrap();
        let summary = orch.run_round(0, &mut ctx).unwrap();
        assert_eq!(summary.clients_trained, 4);

        let niid = RunConfig {
            iid: false,
            ..config
        };
        assert!(matches!(
            Orchestrator::new(niid, &net, &SgdTrainer, &data.train, &data.test),
            Err(FedError::Config(_))
        ));
    }

    #[test]
    fn test_simulate_rejects_zero_hidden_width() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig {
            model: "mlp".into(),
            hidden_dim: 0,
            ..small_config(&dir)
        };
        assert!(matches!(simulate(config), Err(FedError::Config(_))));
    }

    #[test]
    fn test_simulate_rejects_unknown_model() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig {
            model: "resnet".into(),
            ..small_config(&dir)
        };
        assert!(matches!(simulate(config), Err(FedError::UnknownModel(_))));
    }
}
