//! Equidistant feature quantization for lookup-table classification

use crate::core::{GpHikError, Result};
use serde::{Deserialize, Serialize};

/// Maps raw feature values in `[0, upper]` to one of `bins` prototypes
///
/// Prototype `b` sits at `b * upper / (bins - 1)`, values snap to the nearest
/// prototype and anything outside the range is clamped to the first or last bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantizer {
    bins: usize,
    upper: f64,
}

impl Quantizer {
    pub fn new(bins: usize, upper: f64) -> Result<Self> {
        if bins < 2 {
            return Err(GpHikError::InvalidConfiguration(format!(
                "quantization needs at least 2 bins, got {bins}"
            )));
        }
        if !(upper > 0.0) || !upper.is_finite() {
            return Err(GpHikError::InvalidConfiguration(format!(
                "quantization range must be positive and finite, got {upper}"
            )));
        }
        Ok(Self { bins, upper })
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }

    /// Distance between neighbouring prototypes
    pub fn step(&self) -> f64 {
        self.upper / (self.bins - 1) as f64
    }

    /// Raw value represented by `bin`
    pub fn prototype(&self, bin: usize) -> f64 {
        bin.min(self.bins - 1) as f64 * self.step()
    }

    /// Bin of the prototype closest to `value`
    #[inline]
    pub fn value_to_bin(&self, value: f64) -> usize {
        if !(value > 0.0) {
            return 0;
        }
        let bin = (value / self.step()).round();
        if bin >= (self.bins - 1) as f64 {
            self.bins - 1
        } else {
            bin as usize
        }
    }
}
