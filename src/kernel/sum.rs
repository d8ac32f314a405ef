//! Sum of the histogram intersection data term and a noise term
//!
//! `K_θ,σ = K_HIK(f_θ) + σ I`. Hyperparameters are addressed by a flat index:
//! `0..p` are the transform parameters, `p` is the noise weight when it is
//! optimized as well.

use crate::core::LinearOperator;
use crate::kernel::{FeatureStore, ParameterizedTransform};

/// Data kernel plus noise, evaluated through products only
#[derive(Debug, Clone, Copy)]
pub struct KernelSum<'a> {
    store: &'a FeatureStore,
    transform: &'a ParameterizedTransform,
    noise: f64,
    noise_is_parameter: bool,
}

impl<'a> KernelSum<'a> {
    /// `store` must already carry values transformed with `transform`
    pub fn new(
        store: &'a FeatureStore,
        transform: &'a ParameterizedTransform,
        noise: f64,
        noise_is_parameter: bool,
    ) -> Self {
        Self {
            store,
            transform,
            noise,
            noise_is_parameter,
        }
    }

    pub fn store(&self) -> &'a FeatureStore {
        self.store
    }

    pub fn transform(&self) -> &'a ParameterizedTransform {
        self.transform
    }

    pub fn noise(&self) -> f64 {
        self.noise
    }

    /// Number of hyperparameters, transform parameters first
    pub fn n_parameters(&self) -> usize {
        self.transform.n_parameters() + usize::from(self.noise_is_parameter)
    }

    fn is_noise_index(&self, index: usize) -> bool {
        self.noise_is_parameter && index == self.transform.n_parameters()
    }

    /// `(∂K/∂θ_index) x`
    pub fn multiply_derivative(&self, index: usize, x: &[f64]) -> Vec<f64> {
        if self.is_noise_index(index) {
            return x.to_vec();
        }
        let transform = self.transform;
        self.store
            .multiply_weighted(x, |dim, entry| transform.derivative(index, dim, entry.raw))
    }

    /// `tr(K + σI)`
    pub fn trace(&self) -> f64 {
        self.store.trace() + self.noise * self.rows() as f64
    }

    /// `tr(∂K/∂θ_index)`
    pub fn derivative_trace(&self, index: usize) -> f64 {
        if self.is_noise_index(index) {
            return self.rows() as f64;
        }
        let transform = self.transform;
        self.store
            .diagonal_weighted(|dim, entry| transform.derivative(index, dim, entry.raw))
            .iter()
            .sum()
    }

    /// Diagonal of `K + σI`
    pub fn diagonal(&self) -> Vec<f64> {
        let mut diag = self.store.diagonal();
        diag.iter_mut().for_each(|d| *d += self.noise);
        diag
    }
}

impl LinearOperator for KernelSum<'_> {
    fn rows(&self) -> usize {
        self.store.n_examples()
    }

    fn multiply(&self, x: &[f64]) -> Vec<f64> {
        let mut y = self.store.multiply(x);
        for (yi, xi) in y.iter_mut().zip(x) {
            *yi += self.noise * xi;
        }
        y
    }
}
