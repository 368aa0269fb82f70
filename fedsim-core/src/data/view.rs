//! Indexed dataset view: exposes only one client's index subset of a
//! larger dataset by index translation.

use super::dataset::{Dataset, Sample};
use crate::error::{FedError, Result};

/// Read-only window over `backing` restricted to `indices`, in index-set order
#[derive(Debug, Clone)]
pub struct DatasetView<'a, D: Dataset + ?Sized> {
    backing: &'a D,
    indices: Vec<usize>,
}

impl<'a, D: Dataset + ?Sized> DatasetView<'a, D> {
    pub fn new(backing: &'a D, indices: impl Into<Vec<usize>>) -> Self {
        Self {
            backing,
            indices: indices.into(),
        }
    }

    fn translate(&self, k: usize) -> Result<usize> {
        self.indices.get(k).copied().ok_or(FedError::IndexOutOfRange {
            index: k,
            len: self.indices.len(),
        })
    }
}

impl<D: Dataset + ?Sized> Dataset for DatasetView<'_, D> {
    fn len(&self) -> usize {
        self.indices.len()
    }

    fn item(&self, index: usize) -> Result<Sample<'_>> {
        let backing_index = self.translate(index)?;
        self.backing.item(backing_index)
    }

    fn feature_dim(&self) -> usize {
        self.backing.feature_dim()
    }

    fn label(&self, index: usize) -> Result<usize> {
        let backing_index = self.translate(index)?;
        self.backing.label(backing_index)
    }
}
