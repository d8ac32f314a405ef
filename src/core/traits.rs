//! Core traits for GP-HIK

use crate::core::Sample;

/// Dataset abstraction for efficient data access
pub trait Dataset: Send + Sync {
    /// Number of samples in the dataset
    fn len(&self) -> usize;

    /// Number of features (dimensionality)
    fn dim(&self) -> usize;

    /// Get a single sample by index
    ///
    /// # Panics
    /// Panics if index >= len()
    fn get_sample(&self, i: usize) -> Sample;

    /// Get multiple samples efficiently
    fn get_batch(&self, indices: &[usize]) -> Vec<Sample> {
        indices.iter().map(|&i| self.get_sample(i)).collect()
    }

    /// Get all labels as a vector
    fn get_labels(&self) -> Vec<f64>;

    /// Check if the dataset is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Symmetric positive (semi-)definite matrix available only through products
///
/// Iterative solvers and eigenvalue estimators never see matrix entries,
/// they only call `multiply`.
pub trait LinearOperator {
    /// Number of rows (and columns)
    fn rows(&self) -> usize;

    /// Compute `A x`
    fn multiply(&self, x: &[f64]) -> Vec<f64>;
}
