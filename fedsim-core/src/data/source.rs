//! Dataset sources: MNIST-style IDX files, CIFAR-10 binary batches and a
//! seeded synthetic generator.

use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use super::dataset::{Dataset, InMemoryDataset};
use crate::config::RunConfig;
use crate::error::{FedError, Result};

const IDX_IMAGES_MAGIC: u32 = 2051;
const IDX_LABELS_MAGIC: u32 = 2049;

const CIFAR_IMAGE_BYTES: usize = 3 * 32 * 32;
const CIFAR_TRAIN_BATCHES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const CIFAR_TEST_BATCH: &str = "test_batch.bin";

// MNIST pixel statistics
const MNIST_MEAN: f32 = 0.1307;
const MNIST_STD: f32 = 0.3081;

/// Samples per shard for generated datasets
const SYNTHETIC_SHARD_SIZE: usize = 20;

/// Train and test splits of one corpus
#[derive(Debug, Clone)]
pub struct DatasetPair {
    pub train: InMemoryDataset,
    pub test: InMemoryDataset,
}

/// Load the dataset named by `config.dataset`
pub fn load(config: &RunConfig) -> Result<DatasetPair> {
    let pair = match config.dataset.as_str() {
        "mnist" | "fmnist" => load_idx_pair(&config.data_dir)?,
        "cifar" => load_cifar_pair(&config.data_dir)?,
        "synthetic" => SyntheticSpec::for_config(config).generate()?,
        other => {
            return Err(FedError::Config(format!("unrecognized dataset '{}'", other)));
        }
    };
    info!(
        dataset = %config.dataset,
        train = pair.train.len(),
        test = pair.test.len(),
        "dataset loaded"
    );
    Ok(pair)
}

fn read_u32_be(bytes: &[u8], offset: usize) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| FedError::Dataset("truncated IDX header".into()))
}

/// Parse an IDX image file and its label file into a dataset
pub fn parse_idx(images: &[u8], labels: &[u8]) -> Result<InMemoryDataset> {
    if read_u32_be(images, 0)? != IDX_IMAGES_MAGIC {
        return Err(FedError::Dataset("bad IDX image magic".into()));
    }
    if read_u32_be(labels, 0)? != IDX_LABELS_MAGIC {
        return Err(FedError::Dataset("bad IDX label magic".into()));
    }
    let count = read_u32_be(images, 4)? as usize;
    let rows = read_u32_be(images, 8)? as usize;
    let cols = read_u32_be(images, 12)? as usize;
    let label_count = read_u32_be(labels, 4)? as usize;
    if count != label_count {
        return Err(FedError::Dataset(format!(
            "{} images but {} labels",
            count, label_count
        )));
    }

    let dim = rows * cols;
    let pixels = images
        .get(16..16 + count * dim)
        .ok_or_else(|| FedError::Dataset("truncated IDX image data".into()))?;
    let raw_labels = labels
        .get(8..8 + count)
        .ok_or_else(|| FedError::Dataset("truncated IDX label data".into()))?;

    let features = pixels
        .iter()
        .map(|&p| (p as f32 / 255.0 - MNIST_MEAN) / MNIST_STD)
        .collect();
    let labels = raw_labels.iter().map(|&l| l as usize).collect();
    InMemoryDataset::new(features, labels, dim)
}

fn load_idx_pair(dir: &Path) -> Result<DatasetPair> {
    let read = |name: &str| fs::read(dir.join(name));
    let train = parse_idx(
        &read("train-images-idx3-ubyte")?,
        &read("train-labels-idx1-ubyte")?,
    )?;
    let test = parse_idx(
        &read("t10k-images-idx3-ubyte")?,
        &read("t10k-labels-idx1-ubyte")?,
    )?;
    Ok(DatasetPair { train, test })
}

/// Parse concatenated CIFAR-10 binary records (1 label byte + 3072 pixels)
pub fn parse_cifar(bytes: &[u8]) -> Result<InMemoryDataset> {
    let record = CIFAR_IMAGE_BYTES + 1;
    if bytes.len() % record != 0 {
        return Err(FedError::Dataset(format!(
            "{} bytes is not a whole number of CIFAR records",
            bytes.len()
        )));
    }
    let count = bytes.len() / record;
    let mut features = Vec::with_capacity(count * CIFAR_IMAGE_BYTES);
    let mut labels = Vec::with_capacity(count);
    for chunk in bytes.chunks_exact(record) {
        labels.push(chunk[0] as usize);
        features.extend(chunk[1..].iter().map(|&p| (p as f32 / 255.0 - 0.5) / 0.5));
    }
    InMemoryDataset::new(features, labels, CIFAR_IMAGE_BYTES)
}

fn load_cifar_pair(dir: &Path) -> Result<DatasetPair> {
    let mut train_bytes = Vec::new();
    for name in CIFAR_TRAIN_BATCHES {
        train_bytes.extend(fs::read(dir.join(name))?);
    }
    let train = parse_cifar(&train_bytes)?;
    let test = parse_cifar(&fs::read(dir.join(CIFAR_TEST_BATCH))?)?;
    Ok(DatasetPair { train, test })
}

/// Gaussian clusters, one per class, with labels cycling through classes
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticSpec {
    pub train_len: usize,
    pub test_len: usize,
    pub feature_dim: usize,
    pub num_classes: usize,
    pub spread: f32,
    pub seed: u64,
}

impl SyntheticSpec {
    /// Sizes that exactly fill the configured shard layouts
    pub fn for_config(config: &RunConfig) -> Self {
        Self {
            train_len: config.train_shards * SYNTHETIC_SHARD_SIZE,
            test_len: config.test_shards * SYNTHETIC_SHARD_SIZE,
            feature_dim: 16,
            num_classes: config.num_classes,
            spread: 0.6,
            seed: config.seed,
        }
    }

    pub fn generate(&self) -> Result<DatasetPair> {
        if self.num_classes == 0 || self.feature_dim == 0 {
            return Err(FedError::Dataset("synthetic data needs classes and features".into()));
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let centers: Vec<f32> = (0..self.num_classes * self.feature_dim)
            .map(|_| rng.gen_range(-1.0f32..1.0))
            .collect();

        let train = self.sample(&mut rng, &centers, self.train_len)?;
        let test = self.sample(&mut rng, &centers, self.test_len)?;
        Ok(DatasetPair { train, test })
    }

    fn sample(&self, rng: &mut StdRng, centers: &[f32], len: usize) -> Result<InMemoryDataset> {
        let mut features = Vec::with_capacity(len * self.feature_dim);
        let mut labels = Vec::with_capacity(len);
        for i in 0..len {
            let label = i % self.num_classes;
            let center = &centers[label * self.feature_dim..(label + 1) * self.feature_dim];
            features.extend(center.iter().map(|&c| c + self.spread * gaussian(rng)));
            labels.push(label);
        }
        InMemoryDataset::new(features, labels, self.feature_dim)
    }
}

/// Standard normal draw (Box-Muller)
fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}
