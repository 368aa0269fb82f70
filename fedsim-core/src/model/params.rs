//! # Parameter Sets
//!
//! Named, shaped `f32` tensors. A parameter set is the only thing that
//! travels between the coordinator and clients, so cloning one is the
//! deep copy handed to each client at broadcast.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{FedError, Result};

/// Dense row-major tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(FedError::ShapeMismatch {
                key: "tensor".into(),
                expected: shape,
                actual: vec![data.len()],
            });
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    /// Same shape, every element `value`
    pub fn full_like(&self, value: f32) -> Self {
        Self {
            shape: self.shape.clone(),
            data: vec![value; self.data.len()],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Fill a freshly shaped tensor with `data` of the same length
    pub(crate) fn with_data(mut self, data: Vec<f32>) -> Self {
        debug_assert_eq!(self.data.len(), data.len());
        self.data = data;
        self
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn scale(&mut self, factor: f32) {
        self.data.iter_mut().for_each(|v| *v *= factor);
    }

    /// `self += other`, element-wise
    pub fn add_assign(&mut self, other: &Tensor) {
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += b;
        }
    }
}

/// Named tensors, ordered by name
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterSet {
    tensors: BTreeMap<String, Tensor>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.tensors.insert(key.into(), tensor)
    }

    pub fn get(&self, key: &str) -> Option<&Tensor> {
        self.tensors.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Tensor> {
        self.tensors.get_mut(key)
    }

    /// Tensor under `key`, or `MissingParameter`
    pub fn require(&self, key: &str) -> Result<&Tensor> {
        self.get(key)
            .ok_or_else(|| FedError::MissingParameter(key.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.tensors.iter().map(|(k, t)| (k.as_str(), t))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Tensor)> {
        self.tensors.iter_mut().map(|(k, t)| (k.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total scalar count across tensors
    pub fn num_parameters(&self) -> usize {
        self.tensors.values().map(Tensor::numel).sum()
    }

    /// Same keys and shapes, all zeros
    pub fn zeros_like(&self) -> Self {
        Self {
            tensors: self
                .tensors
                .iter()
                .map(|(k, t)| (k.clone(), t.full_like(0.0)))
                .collect(),
        }
    }

    /// Fail unless `other` carries every key of `self` with the same shape
    pub fn check_compatible(&self, other: &ParameterSet) -> Result<()> {
        for (key, tensor) in &self.tensors {
            let theirs = other.require(key)?;
            if theirs.shape() != tensor.shape() {
                return Err(FedError::ShapeMismatch {
                    key: key.clone(),
                    expected: tensor.shape().to_vec(),
                    actual: theirs.shape().to_vec(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_shape_checked() {
        assert!(Tensor::new(vec![2, 3], vec![0.0; 6]).is_ok());
        assert!(matches!(
            Tensor::new(vec![2, 3], vec![0.0; 5]),
            Err(FedError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_zeros_like() {
        let mut p = ParameterSet::new();
        p.insert("w", Tensor::new(vec![2], vec![1.0, -2.0]).unwrap());

        assert_eq!(p.zeros_like().require("w").unwrap().data(), &[0.0, 0.0]);
        assert_eq!(p.num_parameters(), 2);
    }

    #[test]
    fn test_check_compatible() {
        let mut a = ParameterSet::new();
        a.insert("w", Tensor::zeros(vec![2, 2]));
        let mut b = ParameterSet::new();
        b.insert("w", Tensor::zeros(vec![4]));

        assert!(matches!(a.check_compatible(&b), Err(FedError::ShapeMismatch { .. })));
        assert!(matches!(
            a.check_compatible(&ParameterSet::new()),
            Err(FedError::MissingParameter(_))
        ));
        assert!(a.check_compatible(&a.clone()).is_ok());
    }
}
