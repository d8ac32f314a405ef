//! Gaussian process classification with the histogram intersection kernel
//!
//! Based on "Large-Scale Gaussian Process Classification with Flexible
//! Adaptive Histogram Kernels" by Erik Rodner, Alexander Freytag, Paul Bodesheim
//! and Joachim Denzler

pub mod api;
pub mod cache;
pub mod core;
pub mod data;
pub mod kernel;
pub mod optimizer;
pub mod persistence;
pub mod solver;
pub mod utils;

// Re-export main types for convenience
pub use crate::api::{EvaluationMetrics, GpHik, ModelInfo, TrainedModel};
pub use crate::cache::{CacheStats, KernelCache};
pub use crate::core::traits::*;
pub use crate::core::types::*;
pub use crate::core::{GpHikError, Result};
pub use crate::data::LibSVMDataset;
pub use crate::kernel::{FeatureStore, HistogramIntersectionKernel, ParameterizedTransform, Quantizer};
pub use crate::optimizer::{HikGpOptimizer, SearchReport, Termination};
pub use crate::persistence::SerializableModel;
pub use crate::utils::SparseVectorStats;

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
