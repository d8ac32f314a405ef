//! Utility functions for labels and histogram data

use crate::core::{Dataset, GpHikError, Result, Sample};

/// Label and feature validation
pub mod validation {
    use super::*;
    use std::collections::BTreeMap;

    /// Interpret a label as a class number
    ///
    /// Class numbers are non-negative integers; anything else is rejected.
    pub fn class_from_label(label: f64) -> Result<u32> {
        if label.is_finite() && label >= 0.0 && label.fract() == 0.0 && label <= u32::MAX as f64 {
            Ok(label as u32)
        } else {
            Err(GpHikError::InvalidLabel(label))
        }
    }

    /// Check a one-vs-rest label vector: length `n`, entries in `{+1, −1, 0}`
    pub fn validate_binary_vector(labels: &[f64], n: usize) -> Result<()> {
        if labels.len() != n {
            return Err(GpHikError::InvalidDataset(format!(
                "binary label vector has {} entries for {n} examples",
                labels.len()
            )));
        }
        match labels
            .iter()
            .find(|&&y| y != 1.0 && y != -1.0 && y != 0.0)
        {
            Some(&bad) => Err(GpHikError::InvalidLabel(bad)),
            None => Ok(()),
        }
    }

    /// Reject negative or non-finite feature values
    pub fn validate_histograms(samples: &[Sample]) -> Result<()> {
        for sample in samples {
            for (dimension, value) in sample.features.iter() {
                if !(value >= 0.0) || !value.is_finite() {
                    return Err(GpHikError::NegativeFeature { dimension, value });
                }
            }
        }
        Ok(())
    }

    /// Number of examples per class
    pub fn class_counts<D: Dataset>(dataset: &D) -> Result<BTreeMap<u32, usize>> {
        let mut counts = BTreeMap::new();
        for label in dataset.get_labels() {
            *counts.entry(class_from_label(label)?).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

/// Statistical utilities for datasets
pub mod stats {
    use super::*;
    use std::collections::HashMap;

    /// Calculate basic statistics for sparse vectors in a dataset
    pub fn sparse_vector_stats(samples: &[Sample]) -> SparseVectorStats {
        if samples.is_empty() {
            return SparseVectorStats::default();
        }

        let nnz_values: Vec<usize> = samples.iter().map(|s| s.features.nnz()).collect();

        let total_nnz: usize = nnz_values.iter().sum();
        let mean_nnz = total_nnz as f64 / samples.len() as f64;

        let max_nnz = *nnz_values.iter().max().unwrap_or(&0);
        let min_nnz = *nnz_values.iter().min().unwrap_or(&0);

        let mean_mass = samples.iter().map(|s| s.features.l1_norm()).sum::<f64>()
            / samples.len() as f64;
        let max_value = samples
            .iter()
            .flat_map(|s| s.features.values.iter().copied())
            .fold(0.0, f64::max);

        SparseVectorStats {
            mean_nnz,
            min_nnz,
            max_nnz,
            mean_mass,
            max_value,
            total_samples: samples.len(),
        }
    }

    /// Feature frequency analysis
    pub fn feature_frequency(samples: &[Sample]) -> HashMap<usize, usize> {
        let mut frequency = HashMap::new();
        for sample in samples {
            for (index, value) in sample.features.iter() {
                if value != 0.0 {
                    *frequency.entry(index).or_insert(0) += 1;
                }
            }
        }
        frequency
    }
}

/// Statistics for sparse histogram data
#[derive(Debug, Clone, Default)]
pub struct SparseVectorStats {
    pub mean_nnz: f64,
    pub min_nnz: usize,
    pub max_nnz: usize,
    /// Average histogram mass (L1 norm)
    pub mean_mass: f64,
    /// Largest feature value, the natural quantization range
    pub max_value: f64,
    pub total_samples: usize,
}
