//! # fedsim-core - Federated Learning Simulation
//!
//! In-process federated averaging over label-skewed client partitions.
//!
//! ## Modules
//!
//! - **data**: datasets, index-set views, the shard partitioner and loaders
//! - **model**: parameter sets and the fully connected classifiers
//! - **train**: local SGD trainer and inference
//! - **aggregate**: federated averaging of client parameter sets
//! - **orchestrator**: the round state machine
//! - **context**, **record**, **plot**: per-run lifecycle and artifacts

pub mod error;
pub use error::{FedError, Result};

pub mod config;
pub use config::{ClientSelection, RunConfig};

pub mod data;
pub mod model;

pub mod train;
pub use train::{inference, EvalResult, LocalTrainOptions, LocalTrainer, LocalUpdate, SgdTrainer};

pub mod aggregate;
pub use aggregate::average;

pub mod context;
pub mod plot;
pub mod record;
pub use context::RunContext;
pub use record::{RunKey, RunRecord};

pub mod orchestrator;
pub use orchestrator::{simulate, Orchestrator, RoundPhase, RoundSummary, RunHistory, RunOutcome};

/// Prelude module with common re-exports
pub mod prelude {
    pub use crate::aggregate::average;
    pub use crate::config::{ClientSelection, RunConfig};
    pub use crate::context::RunContext;
    pub use crate::data::*;
    pub use crate::error::{FedError, Result};
    pub use crate::model::*;
    pub use crate::orchestrator::*;
    pub use crate::record::{RunKey, RunRecord};
    pub use crate::train::*;
}
