//! # Networks
//!
//! Fully connected classifiers over flat feature vectors, with hand-written
//! backprop for softmax cross-entropy.
//!
//! | Architecture | Layers |
//! |--------------|--------|
//! | `linear` | input → classes (softmax regression) |
//! | `mlp` | input → hidden (ReLU) → classes |
//!
//! Parameters are named `fc{n}.weight` (`[out, in]`) and `fc{n}.bias`
//! (`[out]`) with `n` counting layers from 1.

use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::params::{ParameterSet, Tensor};
use crate::config::RunConfig;
use crate::data::loader::Batch;
use crate::error::{FedError, Result};

/// Model architecture named in the run configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Linear,
    Mlp,
}

impl FromStr for Architecture {
    type Err = FedError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(Architecture::Linear),
            "mlp" => Ok(Architecture::Mlp),
            "cnn" => Err(FedError::UnknownModel(
                "cnn (convolutional models are not built in)".into(),
            )),
            other => Err(FedError::UnknownModel(other.to_string())),
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Architecture::Linear => write!(f, "linear"),
            Architecture::Mlp => write!(f, "mlp"),
        }
    }
}

/// Mean loss and correct predictions over one batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchEval {
    pub loss: f32,
    pub correct: usize,
}

/// A classifier whose whole state lives in a [`ParameterSet`]
pub trait Model: Send + Sync {
    fn architecture(&self) -> Architecture;

    /// Freshly initialised parameters
    fn init_parameters(&self, seed: u64) -> ParameterSet;

    /// Class logits for one sample
    fn forward(&self, params: &ParameterSet, features: &[f32]) -> Result<Vec<f32>>;

    /// Mean cross-entropy over the batch and its gradient
    fn loss_and_gradients(&self, params: &ParameterSet, batch: &Batch<'_>) -> Result<(f32, ParameterSet)>;

    fn evaluate_batch(&self, params: &ParameterSet, batch: &Batch<'_>) -> Result<BatchEval> {
        if batch.is_empty() {
            return Err(FedError::Dataset("cannot evaluate an empty batch".into()));
        }
        let mut loss = 0.0;
        let mut correct = 0;
        for sample in &batch.samples {
            let logits = self.forward(params, sample.features)?;
            loss += cross_entropy(&logits, sample.label)?;
            if argmax(&logits) == sample.label {
                correct += 1;
            }
        }
        Ok(BatchEval {
            loss: loss / batch.len() as f32,
            correct,
        })
    }
}

/// Stack of dense layers; ReLU between layers, raw logits out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    architecture: Architecture,
    dims: Vec<usize>,
}

impl Network {
    pub fn new(architecture: Architecture, input_dim: usize, hidden_dim: usize, num_classes: usize) -> Self {
        let dims = match architecture {
            Architecture::Linear => vec![input_dim, num_classes],
            Architecture::Mlp => vec![input_dim, hidden_dim, num_classes],
        };
        Self { architecture, dims }
    }

    /// Build the configured architecture for `input_dim` features
    pub fn from_config(config: &RunConfig, input_dim: usize) -> Result<Self> {
        let architecture = config.model.parse()?;
        let network = Self::new(architecture, input_dim, config.hidden_dim, config.num_classes);
        if let Some(layer) = network.dims.iter().position(|&d| d == 0) {
            return Err(FedError::Config(format!(
                "{} layer {} has zero width (dims {:?})",
                architecture, layer, network.dims
            )));
        }
        Ok(network)
    }

    fn num_layers(&self) -> usize {
        self.dims.len() - 1
    }

    fn weight_key(layer: usize) -> String {
        format!("fc{}.weight", layer + 1)
    }

    fn bias_key(layer: usize) -> String {
        format!("fc{}.bias", layer + 1)
    }

    /// Weight and bias per layer, shape-checked against `dims`
    fn layers<'p>(&self, params: &'p ParameterSet) -> Result<Vec<(&'p Tensor, &'p Tensor)>> {
        (0..self.num_layers())
            .map(|l| {
                let (w_key, b_key) = (Self::weight_key(l), Self::bias_key(l));
                let w = params.require(&w_key)?;
                let b = params.require(&b_key)?;
                expect_shape(&w_key, w, &[self.dims[l + 1], self.dims[l]])?;
                expect_shape(&b_key, b, &[self.dims[l + 1]])?;
                Ok((w, b))
            })
            .collect()
    }

    /// Activations of every layer, input first and logits last
    fn forward_cached(&self, layers: &[(&Tensor, &Tensor)], features: &[f32]) -> Result<Vec<Vec<f32>>> {
        if features.len() != self.dims[0] {
            return Err(FedError::ShapeMismatch {
                key: "input".into(),
                expected: vec![self.dims[0]],
                actual: vec![features.len()],
            });
        }
        let mut acts = Vec::with_capacity(layers.len() + 1);
        acts.push(features.to_vec());
        for (l, (w, b)) in layers.iter().enumerate() {
            let input = &acts[l];
            let in_dim = input.len();
            let mut out = b.data().to_vec();
            for (o, value) in out.iter_mut().enumerate() {
                let row = &w.data()[o * in_dim..(o + 1) * in_dim];
                *value += row.iter().zip(input).map(|(a, x)| a * x).sum::<f32>();
            }
            if l + 1 < layers.len() {
                out.iter_mut().for_each(|v| *v = v.max(0.0));
            }
            acts.push(out);
        }
        Ok(acts)
    }
}

fn expect_shape(key: &str, tensor: &Tensor, shape: &[usize]) -> Result<()> {
    if tensor.shape() != shape {
        return Err(FedError::ShapeMismatch {
            key: key.to_string(),
            expected: shape.to_vec(),
            actual: tensor.shape().to_vec(),
        });
    }
    Ok(())
}

impl Model for Network {
    fn architecture(&self) -> Architecture {
        self.architecture
    }

    fn init_parameters(&self, seed: u64) -> ParameterSet {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut params = ParameterSet::new();
        for l in 0..self.num_layers() {
            let (fan_in, fan_out) = (self.dims[l], self.dims[l + 1]);
            let bound = 1.0 / (fan_in as f32).sqrt();
            let mut uniform = |n: usize| -> Vec<f32> {
                (0..n).map(|_| rng.gen_range(-bound..bound)).collect()
            };
            let weight = uniform(fan_out * fan_in);
            let bias = uniform(fan_out);
            params.insert(Self::weight_key(l), Tensor::zeros(vec![fan_out, fan_in]).with_data(weight));
            params.insert(Self::bias_key(l), Tensor::zeros(vec![fan_out]).with_data(bias));
        }
        params
    }

    fn forward(&self, params: &ParameterSet, features: &[f32]) -> Result<Vec<f32>> {
        let layers = self.layers(params)?;
        let mut acts = self.forward_cached(&layers, features)?;
        Ok(acts.pop().unwrap_or_default())
    }

    fn loss_and_gradients(&self, params: &ParameterSet, batch: &Batch<'_>) -> Result<(f32, ParameterSet)> {
        if batch.is_empty() {
            return Err(FedError::Dataset("cannot train on an empty batch".into()));
        }
        let layers = self.layers(params)?;
        let mut grad_w: Vec<Vec<f32>> = layers.iter().map(|(w, _)| vec![0.0; w.numel()]).collect();
        let mut grad_b: Vec<Vec<f32>> = layers.iter().map(|(_, b)| vec![0.0; b.numel()]).collect();
        let mut total_loss = 0.0;

        for sample in &batch.samples {
            let acts = self.forward_cached(&layers, sample.features)?;
            let logits = &acts[acts.len() - 1];
            total_loss += cross_entropy(logits, sample.label)?;

            // dL/dlogits = softmax - one_hot
            let mut delta = softmax(logits);
            delta[sample.label] -= 1.0;

            for l in (0..layers.len()).rev() {
                let input = &acts[l];
                let in_dim = input.len();
                for (o, &d) in delta.iter().enumerate() {
                    grad_b[l][o] += d;
                    let row = &mut grad_w[l][o * in_dim..(o + 1) * in_dim];
                    row.iter_mut().zip(input).for_each(|(g, x)| *g += d * x);
                }
                if l == 0 {
                    break;
                }
                let w = layers[l].0.data();
                delta = (0..in_dim)
                    .map(|i| {
                        if input[i] <= 0.0 {
                            return 0.0;
                        }
                        delta
                            .iter()
                            .enumerate()
                            .map(|(o, d)| w[o * in_dim + i] * d)
                            .sum::<f32>()
                    })
                    .collect();
            }
        }

        let n = batch.len() as f32;
        let mut grads = ParameterSet::new();
        for (l, (gw, gb)) in grad_w.into_iter().zip(grad_b).enumerate() {
            let (w, b) = layers[l];
            let mut gw = Tensor::zeros(w.shape().to_vec()).with_data(gw);
            let mut gb = Tensor::zeros(b.shape().to_vec()).with_data(gb);
            gw.scale(1.0 / n);
            gb.scale(1.0 / n);
            grads.insert(Self::weight_key(l), gw);
            grads.insert(Self::bias_key(l), gb);
        }
        Ok((total_loss / n, grads))
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&z| (z - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// `-log softmax(logits)[label]`, computed stably
fn cross_entropy(logits: &[f32], label: usize) -> Result<f32> {
    let target = *logits.get(label).ok_or_else(|| {
        FedError::Dataset(format!("label {} outside {} classes", label, logits.len()))
    })?;
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let log_sum = logits.iter().map(|&z| (z - max).exp()).sum::<f32>().ln() + max;
    Ok(log_sum - target)
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}
