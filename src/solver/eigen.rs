//! Largest eigenpairs of a kernel operator
//!
//! Block subspace iteration with a Rayleigh–Ritz step after every product.
//! The block carries a few more vectors than requested, which speeds up
//! convergence of the wanted pairs when the spectrum decays slowly.

use crate::core::LinearOperator;
use crate::solver::dense::{axpy, dot, norm, symmetric_eigen};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const OVERSAMPLING: usize = 3;

/// The `k` largest eigenvalues (descending) and their unit eigenvectors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EigenApproximation {
    pub values: Vec<f64>,
    pub vectors: Vec<Vec<f64>>,
}

impl EigenApproximation {
    pub fn rank(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Largest eigenvalue, if any was computed
    pub fn largest(&self) -> Option<f64> {
        self.values.first().copied()
    }

    /// Keep only the leading `k` pairs
    pub fn truncated(&self, k: usize) -> Self {
        Self {
            values: self.values.iter().take(k).copied().collect(),
            vectors: self.vectors.iter().take(k).cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EigenReport {
    pub iterations: usize,
    pub converged: bool,
}

/// Subspace iteration with a fixed random seed, so repeated runs agree
#[derive(Debug, Clone, Copy)]
pub struct EigenEstimator {
    max_iterations: usize,
    tolerance: f64,
    seed: u64,
}

impl EigenEstimator {
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        Self {
            max_iterations,
            tolerance,
            seed: 0x5eed,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Estimate the `k` largest eigenpairs of a symmetric PSD operator
    ///
    /// A pair is accepted once `‖A x − θ x‖ ≤ tolerance · θ_max`. If the
    /// iteration budget runs out first, the current Ritz pairs are returned.
    pub fn estimate<A>(&self, op: &A, k: usize) -> (EigenApproximation, EigenReport)
    where
        A: LinearOperator + ?Sized,
    {
        let n = op.rows();
        let k = k.min(n);
        if k == 0 {
            return (
                EigenApproximation::default(),
                EigenReport {
                    iterations: 0,
                    converged: true,
                },
            );
        }
        let block = (k + OVERSAMPLING).min(n);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let start: Vec<Vec<f64>> = (0..block)
            .map(|_| (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect();
        let mut basis = orthonormalize(start, &mut rng);

        let mut values = Vec::new();
        let mut vectors = Vec::new();
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iterations {
            iterations += 1;
            let images: Vec<Vec<f64>> = basis.iter().map(|q| op.multiply(q)).collect();

            let projected: Vec<Vec<f64>> = basis
                .iter()
                .map(|qi| {
                    images
                        .iter()
                        .map(|zj| dot(qi, zj))
                        .collect::<Vec<f64>>()
                })
                .collect();
            let symmetric: Vec<Vec<f64>> = (0..block)
                .map(|i| {
                    (0..block)
                        .map(|j| 0.5 * (projected[i][j] + projected[j][i]))
                        .collect()
                })
                .collect();
            let (ritz_values, coefficients) = symmetric_eigen(&symmetric);

            let ritz_vectors = combine(&basis, &coefficients);
            let ritz_images = combine(&images, &coefficients);

            let scale = ritz_values.first().map_or(0.0, |v| v.abs()).max(f64::MIN_POSITIVE);
            let worst_residual = (0..k)
                .map(|j| {
                    let mut r = ritz_images[j].clone();
                    axpy(-ritz_values[j], &ritz_vectors[j], &mut r);
                    norm(&r)
                })
                .fold(0.0, f64::max);

            values = ritz_values[..k].to_vec();
            vectors = ritz_vectors[..k].to_vec();

            if worst_residual <= self.tolerance * scale {
                converged = true;
                break;
            }
            basis = orthonormalize(ritz_images, &mut rng);
        }

        if converged {
            debug!("eigen estimate ({k} pairs) converged after {iterations} iterations");
        } else {
            warn!("eigen estimate ({k} pairs) did not converge within {iterations} iterations");
        }

        (
            EigenApproximation { values, vectors },
            EigenReport {
                iterations,
                converged,
            },
        )
    }
}

/// Column combinations `Σ_j c[i][j] · v_j` for every coefficient vector `c[i]`
fn combine(vectors: &[Vec<f64>], coefficients: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = vectors.first().map_or(0, Vec::len);
    coefficients
        .iter()
        .map(|c| {
            let mut out = vec![0.0; n];
            for (weight, v) in c.iter().zip(vectors) {
                axpy(*weight, v, &mut out);
            }
            out
        })
        .collect()
}

/// Modified Gram–Schmidt; collapsed vectors are replaced with random ones
fn orthonormalize(vectors: Vec<Vec<f64>>, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = vectors.first().map_or(0, Vec::len);
    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(vectors.len());
    for mut v in vectors {
        let mut attempts = 0;
        loop {
            let original = norm(&v);
            for _ in 0..2 {
                for q in &basis {
                    let projection = dot(q, &v);
                    axpy(-projection, q, &mut v);
                }
            }
            let remaining = norm(&v);
            if remaining > 1e-10 * original.max(f64::MIN_POSITIVE) && remaining > 0.0 {
                v.iter_mut().for_each(|x| *x /= remaining);
                basis.push(v);
                break;
            }
            attempts += 1;
            if attempts > 10 {
                break;
            }
            v = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        }
    }
    basis
}
