//! # Model boundary
//!
//! Parameter sets plus the classifiers that read them.

pub mod network;
pub mod params;

pub use network::{Architecture, BatchEval, Model, Network};
pub use params::{ParameterSet, Tensor};
