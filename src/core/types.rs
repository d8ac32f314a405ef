//! Core type definitions for GP-HIK

use crate::core::{GpHikError, Result};
use crate::kernel::ParameterizedTransform;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Result of classifying a single example
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Class number with the highest score (lowest class number on ties)
    pub class: u32,
    /// Score of every known class
    pub scores: BTreeMap<u32, f64>,
}

impl Classification {
    /// Pick the best-scoring class. Returns `None` for an empty score map.
    pub fn from_scores(scores: BTreeMap<u32, f64>) -> Option<Self> {
        let mut best: Option<(u32, f64)> = None;
        for (&class, &score) in &scores {
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((class, score)),
            }
        }
        best.map(|(class, _)| Self { class, scores })
    }

    /// Score of a specific class
    pub fn score(&self, class: u32) -> Option<f64> {
        self.scores.get(&class).copied()
    }

    /// Score of the winning class
    pub fn best_score(&self) -> f64 {
        self.scores.get(&self.class).copied().unwrap_or(f64::NAN)
    }
}

/// Sparse vector representation with sorted indices
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    /// Sorted indices of non-zero elements
    pub indices: Vec<usize>,
    /// Values corresponding to indices
    pub values: Vec<f64>,
}

impl SparseVector {
    /// Create a new sparse vector, ensuring indices are sorted
    pub fn new(indices: Vec<usize>, values: Vec<f64>) -> Self {
        assert_eq!(
            indices.len(),
            values.len(),
            "Indices and values must have same length"
        );

        let mut pairs: Vec<_> = indices.into_iter().zip(values).collect();
        pairs.sort_by_key(|&(idx, _)| idx);

        let (indices, values): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        Self { indices, values }
    }

    /// Create an empty sparse vector
    pub fn empty() -> Self {
        Self {
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Build from a dense slice, dropping exact zeros
    pub fn from_dense(values: &[f64]) -> Self {
        let (indices, values) = values
            .iter()
            .enumerate()
            .filter(|(_, &v)| v != 0.0)
            .map(|(i, &v)| (i, v))
            .unzip();
        Self { indices, values }
    }

    /// Expand into a dense vector of length `dim`; entries beyond `dim` are dropped
    pub fn to_dense(&self, dim: usize) -> Vec<f64> {
        let mut dense = vec![0.0; dim];
        for (&i, &v) in self.indices.iter().zip(&self.values) {
            if i < dim {
                dense[i] = v;
            }
        }
        dense
    }

    /// Get the value at a specific index (0 if not present)
    pub fn get(&self, index: usize) -> f64 {
        match self.indices.binary_search(&index) {
            Ok(pos) => self.values[pos],
            Err(_) => 0.0,
        }
    }

    /// Iterate over (index, value) pairs
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    /// Smallest dense length able to hold this vector
    pub fn dim(&self) -> usize {
        self.indices.last().map_or(0, |&i| i + 1)
    }

    /// Compute squared L2 norm
    pub fn norm_squared(&self) -> f64 {
        self.values.iter().map(|&v| v * v).sum()
    }

    /// Compute L2 norm
    pub fn norm(&self) -> f64 {
        self.norm_squared().sqrt()
    }

    /// Sum of values (the L1 norm for histograms)
    pub fn l1_norm(&self) -> f64 {
        self.values.iter().map(|v| v.abs()).sum()
    }

    /// Number of non-zero elements
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Check if vector is empty
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Training sample with features and label
#[derive(Clone, Debug)]
pub struct Sample {
    /// Feature vector (sparse representation)
    pub features: SparseVector,
    /// Class number, or the real-valued target in regression mode
    pub label: f64,
}

impl Sample {
    /// Create a new sample
    pub fn new(features: SparseVector, label: f64) -> Self {
        Self { features, label }
    }
}

/// Most grid points allowed along one search axis
pub const MAX_GRID_AXIS_POINTS: usize = 100_000;

/// How hyperparameters are searched
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum OptimizationMethod {
    /// Evaluate the likelihood on a regular grid and keep the best point
    Greedy { step_size: f64 },
    /// Nelder-Mead simplex search on the likelihood
    DownhillSimplex {
        max_iterations: usize,
        time_limit_secs: f64,
        parameter_tolerance: f64,
    },
    /// Keep the configured parameters
    None,
}

impl Default for OptimizationMethod {
    fn default() -> Self {
        Self::Greedy { step_size: 0.1 }
    }
}

impl OptimizationMethod {
    /// Downhill simplex with default limits
    pub fn downhill_simplex() -> Self {
        Self::DownhillSimplex {
            max_iterations: 200,
            time_limit_secs: 60.0,
            parameter_tolerance: 1e-4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Greedy { .. } => "greedy",
            Self::DownhillSimplex { .. } => "downhill-simplex",
            Self::None => "none",
        }
    }
}

impl FromStr for OptimizationMethod {
    type Err = GpHikError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "greedy" | "grid" => Ok(Self::default()),
            "simplex" | "downhillsimplex" | "downhill-simplex" => Ok(Self::downhill_simplex()),
            "none" => Ok(Self::None),
            other => Err(GpHikError::UnknownOptimizationMethod(other.to_string())),
        }
    }
}

/// Predictive variance estimators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceMethod {
    /// Largest-eigenvalue bound, neglecting mixed terms of |k*|²
    Rough,
    /// Rank-k correction with the top eigenpairs
    Fine,
    /// One linear solve per query
    Exact,
}

impl FromStr for VarianceMethod {
    type Err = GpHikError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rough" => Ok(Self::Rough),
            "fine" => Ok(Self::Fine),
            "exact" => Ok(Self::Exact),
            other => Err(GpHikError::InvalidConfiguration(format!(
                "unknown variance method: {other}"
            ))),
        }
    }
}

impl fmt::Display for VarianceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rough => "rough",
            Self::Fine => "fine",
            Self::Exact => "exact",
        };
        f.write_str(name)
    }
}

/// Quantization settings for lookup-table classification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizationConfig {
    /// Number of equidistant bins
    pub bins: usize,
    /// Upper end of the quantized range; taken from the training data if absent
    pub upper_bound: Option<f64>,
}

/// Configuration of the GP-HIK engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpHikConfig {
    /// Regression instead of classification
    pub performs_regression: bool,
    /// Gaussian label noise added to the kernel diagonal
    pub noise: f64,
    /// Whether noise is searched together with the transform parameters
    pub optimize_noise: bool,
    pub noise_lower_bound: f64,
    pub noise_upper_bound: f64,
    /// Feature transform applied before kernel evaluation
    pub transform: ParameterizedTransform,
    /// Lower bound for every transform parameter
    pub parameter_lower_bound: f64,
    /// Upper bound for every transform parameter
    pub parameter_upper_bound: f64,
    pub optimization: OptimizationMethod,
    /// Enables lookup-table classification
    pub quantization: Option<QuantizationConfig>,
    /// Iteration cap of the conjugate gradient solver
    pub solver_max_iterations: usize,
    /// Relative residual at which the solver stops
    pub solver_tolerance: f64,
    /// Eigenvalues used in the log-determinant approximation
    pub likelihood_eigenvalues: usize,
    /// Eigenpairs used by the fine variance estimate (0 disables it)
    pub variance_rank: usize,
    pub eigen_max_iterations: usize,
    pub eigen_tolerance: f64,
    /// Also compute the exact likelihood (debugging only)
    pub verify_approximation: bool,
    /// Warm-start the solver from the last solution of each class
    pub use_previous_alphas: bool,
    /// Refuse to turn a binary model into a multi-class one
    pub strict_binary: bool,
}

impl Default for GpHikConfig {
    fn default() -> Self {
        Self {
            performs_regression: false,
            noise: 0.01,
            optimize_noise: false,
            noise_lower_bound: 1e-6,
            noise_upper_bound: 10.0,
            transform: ParameterizedTransform::Identity,
            parameter_lower_bound: 1.0,
            parameter_upper_bound: 5.0,
            optimization: OptimizationMethod::default(),
            quantization: None,
            solver_max_iterations: 1000,
            solver_tolerance: 1e-10,
            likelihood_eigenvalues: 1,
            variance_rank: 1,
            eigen_max_iterations: 300,
            eigen_tolerance: 1e-9,
            verify_approximation: false,
            use_previous_alphas: true,
            strict_binary: false,
        }
    }
}

impl GpHikConfig {
    /// Check every setting before numeric work starts
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(GpHikError::InvalidConfiguration(msg));

        if !(self.parameter_lower_bound < self.parameter_upper_bound) {
            return invalid(format!(
                "parameter lower bound {} must be below upper bound {}",
                self.parameter_lower_bound, self.parameter_upper_bound
            ));
        }
        self.transform
            .validate_bounds(self.parameter_lower_bound, self.parameter_upper_bound)?;
        if !(self.noise >= 0.0) {
            return invalid(format!("noise must be non-negative, got {}", self.noise));
        }
        if self.optimize_noise
            && !(self.noise_lower_bound >= 0.0 && self.noise_lower_bound < self.noise_upper_bound)
        {
            return invalid(format!(
                "noise bounds [{}, {}] must be non-negative and increasing",
                self.noise_lower_bound, self.noise_upper_bound
            ));
        }
        match self.optimization {
            OptimizationMethod::Greedy { step_size } => {
                if !(step_size > 0.0) {
                    return invalid(format!("grid step size must be positive, got {step_size}"));
                }
                let mut ranges = Vec::new();
                if self.transform != ParameterizedTransform::Identity {
                    ranges.push((self.parameter_lower_bound, self.parameter_upper_bound));
                }
                if self.optimize_noise {
                    ranges.push((self.noise_lower_bound, self.noise_upper_bound));
                }
                for (lower, upper) in ranges {
                    if !((upper - lower) / step_size < (MAX_GRID_AXIS_POINTS - 1) as f64) {
                        return invalid(format!(
                            "grid step {step_size} gives more than {MAX_GRID_AXIS_POINTS} points on [{lower}, {upper}]"
                        ));
                    }
                }
            }
            OptimizationMethod::DownhillSimplex {
                max_iterations,
                time_limit_secs,
                parameter_tolerance,
            } => {
                if max_iterations == 0 {
                    return invalid("simplex needs at least one iteration".to_string());
                }
                if !(time_limit_secs > 0.0) || !(parameter_tolerance > 0.0) {
                    return invalid(
                        "simplex time limit and tolerance must be positive".to_string(),
                    );
                }
                if Duration::try_from_secs_f64(time_limit_secs).is_err() {
                    return invalid(format!(
                        "simplex time limit {time_limit_secs}s is not a representable duration"
                    ));
                }
            }
            _ => {}
        }
        if let Some(q) = &self.quantization {
            if q.bins < 2 {
                return invalid(format!("quantization needs at least 2 bins, got {}", q.bins));
            }
            if let Some(upper) = q.upper_bound {
                if !(upper > 0.0) {
                    return invalid(format!("quantization range must be positive, got {upper}"));
                }
            }
        }
        if self.solver_max_iterations == 0 {
            return invalid("solver needs at least one iteration".to_string());
        }
        if self.likelihood_eigenvalues == 0 {
            return invalid("likelihood needs at least one eigenvalue".to_string());
        }
        if self.eigen_max_iterations == 0 {
            return invalid("eigen estimator needs at least one iteration".to_string());
        }
        self.transform.validate()?;
        Ok(())
    }
}
