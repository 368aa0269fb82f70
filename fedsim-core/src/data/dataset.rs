//! # Datasets
//!
//! The read-only labeled corpus the simulation partitions and trains on.
//! Samples are exposed by reference so views and loaders never copy
//! feature data.

use crate::error::{FedError, Result};

/// A single (features, label) pair borrowed from a dataset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<'a> {
    pub features: &'a [f32],
    pub label: usize,
}

/// Ordered, fixed-length sequence of labeled samples
pub trait Dataset {
    /// Number of samples
    fn len(&self) -> usize;

    /// Sample at position `index`
    fn item(&self, index: usize) -> Result<Sample<'_>>;

    /// Length of every feature vector
    fn feature_dim(&self) -> usize;

    /// Label at position `index`
    fn label(&self, index: usize) -> Result<usize> {
        self.item(index).map(|s| s.label)
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<D: Dataset + ?Sized> Dataset for &D {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn item(&self, index: usize) -> Result<Sample<'_>> {
        (**self).item(index)
    }

    fn feature_dim(&self) -> usize {
        (**self).feature_dim()
    }

    fn label(&self, index: usize) -> Result<usize> {
        (**self).label(index)
    }
}

/// Dataset held fully in memory: row-major features plus one label per row
#[derive(Debug, Clone, PartialEq)]
pub struct InMemoryDataset {
    features: Vec<f32>,
    labels: Vec<usize>,
    feature_dim: usize,
    num_classes: usize,
}

impl InMemoryDataset {
    /// Build from flat features; `features.len()` must equal `labels.len() * feature_dim`
    pub fn new(features: Vec<f32>, labels: Vec<usize>, feature_dim: usize) -> Result<Self> {
        if feature_dim == 0 {
            return Err(FedError::Dataset("feature dimension must be non-zero".into()));
        }
        if features.len() != labels.len() * feature_dim {
            return Err(FedError::Dataset(format!(
                "{} feature values do not form {} rows of {}",
                features.len(),
                labels.len(),
                feature_dim
            )));
        }
        let num_classes = labels.iter().max().map_or(0, |&m| m + 1);
        Ok(Self {
            features,
            labels,
            feature_dim,
            num_classes,
        })
    }

    /// Number of distinct label values (max label + 1)
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// All labels in dataset order
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn item(&self, index: usize) -> Result<Sample<'_>> {
        let label = *self.labels.get(index).ok_or(FedError::IndexOutOfRange {
            index,
            len: self.labels.len(),
        })?;
        let start = index * self.feature_dim;
        Ok(Sample {
            features: &self.features[start..start + self.feature_dim],
            label,
        })
    }

    fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    fn label(&self, index: usize) -> Result<usize> {
        self.labels
            .get(index)
            .copied()
            .ok_or(FedError::IndexOutOfRange {
                index,
                len: self.labels.len(),
            })
    }
}
