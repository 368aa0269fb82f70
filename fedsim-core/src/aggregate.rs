//! Federated averaging
//!
//! Key-wise arithmetic mean of client parameter sets. Every client counts
//! equally regardless of how many samples it trained on.

use crate::error::{FedError, Result};
use crate::model::ParameterSet;

/// Element-wise mean of `models`
///
/// All sets must share the first set's keys and shapes.
pub fn average(models: &[ParameterSet]) -> Result<ParameterSet> {
    let (first, rest) = models.split_first().ok_or(FedError::NoClientsTrained)?;

    let mut result = first.clone();
    for model in rest {
        result.check_compatible(model)?;
        for (key, tensor) in result.iter_mut() {
            tensor.add_assign(model.require(key)?);
        }
    }

    let n = models.len() as f32;
    for (_, tensor) in result.iter_mut() {
        tensor.scale(1.0 / n);
    }
    Ok(result)
}
