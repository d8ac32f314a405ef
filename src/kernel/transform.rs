//! Parameterized feature transforms
//!
//! Every transform is monotone non-decreasing on `[0, ∞)` and maps 0 to 0. The
//! first property keeps the sorted order of a [`FeatureStore`](super::FeatureStore)
//! valid after a transform is applied, so `min(f(a), f(b)) = f(min(a, b))` and
//! the histogram intersection of transformed features can still be evaluated
//! from the sorted raw values. The second keeps sparse zeros implicit.

use crate::core::{GpHikError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Monotone scalar function with tunable parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterizedTransform {
    /// f(x) = x
    Identity,
    /// f(x) = x^p
    Power { exponent: f64 },
    /// f(x) = exp(βx) − 1
    Exponential { rate: f64 },
    /// f_d(x) = w_d · x, one weight per dimension (missing weights count as 1)
    DimensionWeights { weights: Vec<f64> },
}

impl Default for ParameterizedTransform {
    fn default() -> Self {
        Self::Identity
    }
}

impl ParameterizedTransform {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Power { .. } => "power",
            Self::Exponential { .. } => "exponential",
            Self::DimensionWeights { .. } => "dimension-weights",
        }
    }

    /// Number of free parameters
    pub fn n_parameters(&self) -> usize {
        match self {
            Self::Identity => 0,
            Self::Power { .. } | Self::Exponential { .. } => 1,
            Self::DimensionWeights { weights } => weights.len(),
        }
    }

    /// Current parameter vector
    pub fn parameters(&self) -> Vec<f64> {
        match self {
            Self::Identity => Vec::new(),
            Self::Power { exponent } => vec![*exponent],
            Self::Exponential { rate } => vec![*rate],
            Self::DimensionWeights { weights } => weights.clone(),
        }
    }

    /// Overwrite the parameter vector
    pub fn set_parameters(&mut self, parameters: &[f64]) -> Result<()> {
        if parameters.len() != self.n_parameters() {
            return Err(GpHikError::InvalidConfiguration(format!(
                "{} transform takes {} parameters, got {}",
                self.name(),
                self.n_parameters(),
                parameters.len()
            )));
        }
        match self {
            Self::Identity => {}
            Self::Power { exponent } => *exponent = parameters[0],
            Self::Exponential { rate } => *rate = parameters[0],
            Self::DimensionWeights { weights } => weights.copy_from_slice(parameters),
        }
        Ok(())
    }

    /// Give per-dimension transforms one parameter for each of `n_dims` dimensions
    pub fn fit_dimensions(&mut self, n_dims: usize) {
        if let Self::DimensionWeights { weights } = self {
            weights.resize(n_dims, 1.0);
        }
    }

    /// Evaluate the transform for a value of dimension `dim`
    #[inline]
    pub fn apply(&self, dim: usize, x: f64) -> f64 {
        match self {
            Self::Identity => x,
            Self::Power { exponent } => {
                if x > 0.0 {
                    x.powf(*exponent)
                } else {
                    0.0
                }
            }
            Self::Exponential { rate } => (rate * x).exp_m1(),
            Self::DimensionWeights { weights } => weights.get(dim).copied().unwrap_or(1.0) * x,
        }
    }

    /// Partial derivative of `apply(dim, x)` with respect to parameter `index`
    pub fn derivative(&self, index: usize, dim: usize, x: f64) -> f64 {
        match self {
            Self::Identity => 0.0,
            Self::Power { exponent } => {
                if x > 0.0 {
                    x.powf(*exponent) * x.ln()
                } else {
                    0.0
                }
            }
            Self::Exponential { rate } => x * (rate * x).exp(),
            Self::DimensionWeights { .. } => {
                if index == dim {
                    x
                } else {
                    0.0
                }
            }
        }
    }

    /// Whether a single parameter value keeps the transform monotone with
    /// `f(0) = 0`
    fn admits(&self, parameter: f64) -> bool {
        match self {
            Self::Identity => true,
            Self::Power { .. } | Self::Exponential { .. } => parameter > 0.0 && parameter.is_finite(),
            Self::DimensionWeights { .. } => parameter >= 0.0 && parameter.is_finite(),
        }
    }

    /// Reject parameters that break monotonicity
    pub fn validate(&self) -> Result<()> {
        let parameters = self.parameters();
        if parameters.iter().all(|&p| self.admits(p)) {
            Ok(())
        } else {
            Err(GpHikError::InvalidConfiguration(format!(
                "{} transform parameters {:?} are not monotone",
                self.name(),
                parameters
            )))
        }
    }

    /// Reject search bounds that contain parameters breaking monotonicity
    ///
    /// Admissible values form a half-line, so checking both ends covers the
    /// whole interval.
    pub fn validate_bounds(&self, lower: f64, upper: f64) -> Result<()> {
        match [lower, upper].into_iter().find(|&bound| !self.admits(bound)) {
            Some(bound) => Err(GpHikError::InvalidConfiguration(format!(
                "parameter bound {bound} is outside the domain of the {} transform",
                self.name()
            ))),
            None => Ok(()),
        }
    }
}

impl FromStr for ParameterizedTransform {
    type Err = GpHikError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "identity" | "none" => Ok(Self::Identity),
            "power" | "absexp" => Ok(Self::Power { exponent: 1.0 }),
            "exponential" | "exp" => Ok(Self::Exponential { rate: 1.0 }),
            "weights" | "dimension-weights" => Ok(Self::DimensionWeights {
                weights: Vec::new(),
            }),
            other => Err(GpHikError::InvalidConfiguration(format!(
                "unknown transform: {other}"
            ))),
        }
    }
}
