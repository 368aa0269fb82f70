//! # Local training and inference
//!
//! The [`LocalTrainer`] trait is the boundary between the round loop and
//! whatever optimiser runs on a client. The loop hands over a private copy
//! of the global parameters plus the client's data and gets back updated
//! parameters with an average loss; it never sees optimiser state.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::RunConfig;
use crate::data::dataset::Dataset;
use crate::data::loader::{Batches, DataLoader};
use crate::error::{FedError, Result};
use crate::model::{Model, ParameterSet};

/// Hyperparameters of one local update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalTrainOptions {
    pub local_ep: usize,
    pub local_bs: usize,
    pub lr: f32,
    pub momentum: f32,
    /// Seed of the per-epoch shuffle
    pub seed: u64,
}

impl LocalTrainOptions {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            local_ep: config.local_ep,
            local_bs: config.local_bs,
            lr: config.lr,
            momentum: config.momentum,
            seed: config.seed,
        }
    }

    /// Same options, shuffle seeded for one client in one round
    pub fn for_client(&self, round: usize, client: usize) -> Self {
        let seed = self
            .seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(((round as u64) << 32) ^ client as u64);
        Self { seed, ..*self }
    }
}

/// Result of training one client
#[derive(Debug, Clone, PartialEq)]
pub struct LocalUpdate {
    pub params: ParameterSet,
    pub avg_loss: f32,
    /// Samples the client trained on
    pub samples: usize,
}

/// Runs local epochs for one client
pub trait LocalTrainer {
    fn train(
        &self,
        model: &dyn Model,
        params: ParameterSet,
        data: &dyn Dataset,
        options: &LocalTrainOptions,
    ) -> Result<LocalUpdate>;
}

/// Mini-batch SGD with momentum
#[derive(Debug, Clone, Copy, Default)]
pub struct SgdTrainer;

impl LocalTrainer for SgdTrainer {
    fn train(
        &self,
        model: &dyn Model,
        mut params: ParameterSet,
        data: &dyn Dataset,
        options: &LocalTrainOptions,
    ) -> Result<LocalUpdate> {
        if data.is_empty() {
            return Err(FedError::Dataset("client has no samples to train on".into()));
        }
        let mut rng = StdRng::seed_from_u64(options.seed);
        let mut velocity = params.zeros_like();
        let mut epoch_losses = Vec::with_capacity(options.local_ep);

        for epoch in 0..options.local_ep {
            let mut order: Vec<usize> = (0..data.len()).collect();
            order.shuffle(&mut rng);

            let mut batch_losses = Vec::new();
            for batch in Batches::with_order(data, order, options.local_bs) {
                let batch = batch?;
                let (loss, grads) = model.loss_and_gradients(&params, &batch)?;
                apply_momentum_step(&mut params, &mut velocity, &grads, options)?;
                batch_losses.push(loss);
            }
            let epoch_loss = mean(&batch_losses);
            trace!(epoch, loss = epoch_loss, "local epoch");
            epoch_losses.push(epoch_loss);
        }

        Ok(LocalUpdate {
            params,
            avg_loss: mean(&epoch_losses),
            samples: data.len(),
        })
    }
}

/// `v = momentum * v + g; p -= lr * v`
fn apply_momentum_step(
    params: &mut ParameterSet,
    velocity: &mut ParameterSet,
    grads: &ParameterSet,
    options: &LocalTrainOptions,
) -> Result<()> {
    params.check_compatible(grads)?;
    for (key, p) in params.iter_mut() {
        let g = grads.require(key)?;
        let v = velocity
            .get_mut(key)
            .ok_or_else(|| FedError::MissingParameter(key.to_string()))?;
        for ((p, v), g) in p.data_mut().iter_mut().zip(v.data_mut()).zip(g.data()) {
            *v = options.momentum * *v + g;
            *p -= options.lr * *v;
        }
    }
    Ok(())
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Accuracy and loss of one model over one loader
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    /// Fraction of samples classified correctly
    pub accuracy: f32,
    /// Sum of the per-batch mean losses
    pub loss: f32,
    pub samples: usize,
}

/// Run the model over every batch of `loader`
pub fn inference<D: Dataset + ?Sized>(
    model: &dyn Model,
    params: &ParameterSet,
    loader: &DataLoader<'_, D>,
) -> Result<EvalResult> {
    let mut loss = 0.0;
    let mut correct = 0;
    let mut total = 0;
    for batch in loader.iter() {
        let batch = batch?;
        let eval = model.evaluate_batch(params, &batch)?;
        loss += eval.loss;
        correct += eval.correct;
        total += batch.len();
    }
    if total == 0 {
        return Err(FedError::Dataset("cannot evaluate on an empty test set".into()));
    }
    Ok(EvalResult {
        accuracy: correct as f32 / total as f32,
        loss,
        samples: total,
    })
}
