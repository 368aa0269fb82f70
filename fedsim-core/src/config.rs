//! Run configuration
//!
//! One serde struct carries the whole configuration surface. Every field has
//! a default, so a JSON file only needs the fields it changes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::partition::{DistributionMode, TEST_SHARDS, TRAIN_SHARDS};
use crate::error::{FedError, Result};

/// Which clients train in a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientSelection {
    /// Every client, every round
    All,
    /// `max(frac * num_users, 1)` clients drawn per round
    Fraction,
}

/// Configuration of one simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Dataset name: mnist, fmnist, cifar or synthetic
    pub dataset: String,
    /// Directory holding the raw dataset files
    pub data_dir: PathBuf,
    /// Model architecture: mlp or linear
    pub model: String,
    /// Hidden width of the mlp
    pub hidden_dim: usize,
    pub num_classes: usize,
    /// Global rounds
    pub epochs: usize,
    pub num_users: usize,
    /// Fraction of clients per round (only with `ClientSelection::Fraction`)
    pub frac: f64,
    /// Local epochs per client
    pub local_ep: usize,
    /// Local batch size
    pub local_bs: usize,
    pub lr: f32,
    pub momentum: f32,
    pub iid: bool,
    /// Distribution mode 1-4
    pub data_distribution: u8,
    /// 1-based client served by the standalone train loader
    pub which_user: usize,
    pub seed: u64,
    /// Requested GPU ordinal; accepted for parity, computation is CPU-only
    pub gpu: Option<usize>,
    /// Progress report interval in rounds
    pub print_every: usize,
    pub train_shards: usize,
    pub test_shards: usize,
    pub client_selection: ClientSelection,
    /// Reject shard reuse across clients
    pub strict_shards: bool,
    /// Where records and plots are written
    pub output_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dataset: "mnist".into(),
            data_dir: PathBuf::from("data"),
            model: "mlp".into(),
            hidden_dim: 64,
            num_classes: 10,
            epochs: 10,
            num_users: 100,
            frac: 0.1,
            local_ep: 10,
            local_bs: 10,
            lr: 0.01,
            momentum: 0.5,
            iid: true,
            data_distribution: 1,
            which_user: 1,
            seed: 1,
            gpu: None,
            print_every: 2,
            train_shards: TRAIN_SHARDS,
            test_shards: TEST_SHARDS,
            client_selection: ClientSelection::All,
            strict_shards: false,
            output_dir: PathBuf::from("save"),
        }
    }
}

impl RunConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn distribution_mode(&self) -> Result<DistributionMode> {
        DistributionMode::try_from(self.data_distribution)
    }

    /// Reject configurations the run cannot start with
    pub fn validate(&self) -> Result<()> {
        self.distribution_mode()?;

        if self.num_users == 0 {
            return Err(FedError::Config("num_users must be at least 1".into()));
        }
        if !(self.frac > 0.0 && self.frac <= 1.0) {
            return Err(FedError::Config(format!("frac {} outside (0, 1]", self.frac)));
        }
        for (name, value) in [
            ("epochs", self.epochs),
            ("local_ep", self.local_ep),
            ("local_bs", self.local_bs),
            ("print_every", self.print_every),
            ("num_classes", self.num_classes),
            ("train_shards", self.train_shards),
            ("test_shards", self.test_shards),
        ] {
            if value == 0 {
                return Err(FedError::Config(format!("{} must be at least 1", name)));
            }
        }
        if self.model == "mlp" && self.hidden_dim == 0 {
            return Err(FedError::Config("hidden_dim must be at least 1 for the mlp".into()));
        }
        if !(self.lr > 0.0) {
            return Err(FedError::Config(format!("learning rate {} must be positive", self.lr)));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(FedError::Config(format!("momentum {} outside [0, 1)", self.momentum)));
        }
        if self.which_user == 0 || self.which_user > self.num_users {
            return Err(FedError::Config(format!(
                "which_user {} outside 1..={}",
                self.which_user, self.num_users
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        RunConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_unknown_mode() {
        let cfg = RunConfig {
            data_distribution: 7,
            ..RunConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(FedError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_ranges() {
        let bad = [
            RunConfig { num_users: 0, ..RunConfig::default() },
            RunConfig { frac: 0.0, ..RunConfig::default() },
            RunConfig { frac: 1.5, ..RunConfig::default() },
            RunConfig { local_bs: 0, ..RunConfig::default() },
            RunConfig { lr: 0.0, ..RunConfig::default() },
            RunConfig { momentum: 1.0, ..RunConfig::default() },
            RunConfig { which_user: 101, ..RunConfig::default() },
            RunConfig { hidden_dim: 0, ..RunConfig::default() },
        ];
        for cfg in bad {
            assert!(cfg.validate().is_err(), "{:?} should be rejected", cfg);
        }
    }

    #[test]
    fn test_hidden_dim_only_matters_for_mlp() {
        let linear = RunConfig {
            model: "linear".into(),
            hidden_dim: 0,
            ..RunConfig::default()
        };
        assert!(linear.validate().is_ok());

        let cfg: RunConfig = serde_json::from_str(r#"{"model": "mlp", "hidden_dim": 0}"#).unwrap();
        assert!(matches!(cfg.validate(), Err(FedError::Config(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: RunConfig =
            serde_json::from_str(r#"{"num_users": 10, "iid": false, "data_distribution": 4}"#).unwrap();
        assert_eq!(cfg.num_users, 10);
        assert!(!cfg.iid);
        assert_eq!(cfg.distribution_mode().unwrap(), DistributionMode::DualModel);
        assert_eq!(cfg.local_bs, 10);
        assert_eq!(cfg.client_selection, ClientSelection::All);
    }
}
