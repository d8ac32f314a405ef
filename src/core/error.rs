//! Error types for GP-HIK training and inference

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GpHikError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unknown optimization method: {0}")]
    UnknownOptimizationMethod(String),

    #[error("No feature store set, cannot optimize")]
    MissingFeatureStore,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Model not trained")]
    ModelNotTrained,

    #[error("Variance approximation not prepared: {0}")]
    VarianceNotPrepared(String),

    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("Invalid label: expected a non-negative integer class number, got {0}")]
    InvalidLabel(f64),

    #[error("Negative feature value {value} in dimension {dimension}")]
    NegativeFeature { dimension: usize, value: f64 },

    #[error("Dimension mismatch: expected at most {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Empty dataset")]
    EmptyDataset,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type Result<T> = std::result::Result<T, GpHikError>;
