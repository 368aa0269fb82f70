//! Persisted run records
//!
//! A finished run is written once as a bincode blob named after the
//! configuration fingerprint, so runs with the same hyperparameters
//! overwrite each other.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::error::Result;

/// Hyperparameters that identify a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunKey {
    pub dataset: String,
    pub model: String,
    pub epochs: usize,
    pub frac: f64,
    pub iid: bool,
    pub local_ep: usize,
    pub local_bs: usize,
}

impl RunKey {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            dataset: config.dataset.clone(),
            model: config.model.clone(),
            epochs: config.epochs,
            frac: config.frac,
            iid: config.iid,
            local_ep: config.local_ep,
            local_bs: config.local_bs,
        }
    }

    /// `<dir>/<key>.bin`
    pub fn record_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.bin", self))
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_C[{}]_iid[{}]_E[{}]_B[{}]",
            self.dataset,
            self.model,
            self.epochs,
            self.frac,
            u8::from(self.iid),
            self.local_ep,
            self.local_bs
        )
    }
}

/// Per-round histories of one finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub key: RunKey,
    /// Mean local training loss per round
    pub train_loss: Vec<f32>,
    /// Loss on test group 1 per round
    pub loss_1: Vec<f32>,
    pub acc_1: Vec<f32>,
    /// Loss on test group 2 per round
    pub loss_2: Vec<f32>,
    pub acc_2: Vec<f32>,
}

impl RunRecord {
    /// Write to `<dir>/<key>.bin`, returning the path
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = self.key.record_path(dir);
        let bytes = bincode::serialize(self)?;
        fs::write(&path, bytes)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    pub fn rounds(&self) -> usize {
        self.train_loss.len()
    }
}
