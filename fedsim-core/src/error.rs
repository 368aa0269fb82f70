//! Error types for fedsim-core

use thiserror::Error;

/// Result type for fedsim-core operations
pub type Result<T> = std::result::Result<T, FedError>;

/// fedsim-core error types
#[derive(Error, Debug)]
pub enum FedError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown model architecture: {0} (expected mlp or linear)")]
    UnknownModel(String),

    #[error("Index {index} out of range for view of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Shape mismatch for '{key}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        key: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("No clients trained this round")]
    NoClientsTrained,

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Plot error: {0}")]
    Plot(String),
}

impl From<serde_json::Error> for FedError {
    fn from(err: serde_json::Error) -> Self {
        FedError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for FedError {
    fn from(err: bincode::Error) -> Self {
        FedError::Serialization(err.to_string())
    }
}
