//! Predictive variance estimators
//!
//! All three estimate `σ²(x) = k** − k*ᵀ (K + σI)⁻¹ k*` with
//! `k** = Σ_d f(x_d)`:
//!
//! * rough: `k** − Σ_d Σ_i min(f(x_d), f(x_i,d))² / λ_max`, dropping the mixed
//!   terms of `|k*|²` and bounding the inverse by its smallest eigenvalue
//! * fine: `k** − Σ_{j≤k} (u_jᵀ k*)² / λ_j` with the top eigenpairs
//! * exact: one conjugate gradient solve per query
//!
//! Rough and fine answer a query from per-dimension tables, so their cost does
//! not depend on the number of training examples.

use crate::core::{GpHikError, Result, SparseVector};
use crate::kernel::{FeatureStore, KernelSum, ParameterizedTransform, PartialSums, Quantizer};
use crate::optimizer::tables::{lookup, lookup_table};
use crate::solver::dense::dot;
use crate::solver::{ConjugateGradient, EigenApproximation};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Prior variance `k(x, x)` of the transformed histogram intersection kernel
pub fn prior_variance(transform: &ParameterizedTransform, query: &SparseVector) -> f64 {
    query
        .iter()
        .filter(|&(_, raw)| raw > 0.0)
        .map(|(dim, raw)| transform.apply(dim, raw))
        .sum()
}

fn table_sum(
    sums: &PartialSums,
    store: &FeatureStore,
    transform: &ParameterizedTransform,
    query: &SparseVector,
    squared: bool,
) -> f64 {
    query
        .iter()
        .filter(|&(_, raw)| raw > 0.0)
        .map(|(dim, raw)| {
            let rank = store.rank(dim, raw);
            let value = transform.apply(dim, raw);
            if squared {
                sums.evaluate_squared(dim, rank, value)
            } else {
                sums.evaluate(dim, rank, value)
            }
        })
        .sum()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoughVariance {
    squared: PartialSums,
    lut: Option<Vec<f64>>,
    largest_eigenvalue: f64,
}

impl RoughVariance {
    pub fn prepare(
        store: &FeatureStore,
        transform: &ParameterizedTransform,
        eigen: &EigenApproximation,
        quantizer: Option<&Quantizer>,
    ) -> Result<Self> {
        let largest_eigenvalue = eigen
            .largest()
            .filter(|v| *v > 0.0)
            .ok_or_else(|| {
                GpHikError::VarianceNotPrepared("no positive eigenvalue available".to_string())
            })?;
        let squared = store.squared_partial_sums();
        let lut = quantizer.map(|q| {
            lookup_table(store, transform, q, |dim, rank, value| {
                squared.evaluate_squared(dim, rank, value)
            })
        });
        debug!("rough variance prepared with λ_max = {largest_eigenvalue:.6}");
        Ok(Self {
            squared,
            lut,
            largest_eigenvalue,
        })
    }

    pub fn largest_eigenvalue(&self) -> f64 {
        self.largest_eigenvalue
    }

    pub fn estimate(
        &self,
        store: &FeatureStore,
        transform: &ParameterizedTransform,
        quantizer: Option<&Quantizer>,
        query: &SparseVector,
    ) -> f64 {
        let squares = match (quantizer, &self.lut) {
            (Some(q), Some(lut)) => lookup(lut, q, query),
            _ => table_sum(&self.squared, store, transform, query, true),
        };
        prior_variance(transform, query) - squares / self.largest_eigenvalue
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FineVariance {
    eigen: EigenApproximation,
    /// Partial sums of every eigenvector, giving `u_jᵀ k*` per query
    projections: Vec<PartialSums>,
    luts: Option<Vec<Vec<f64>>>,
}

impl FineVariance {
    pub fn prepare(
        store: &FeatureStore,
        transform: &ParameterizedTransform,
        eigen: &EigenApproximation,
        rank: usize,
        quantizer: Option<&Quantizer>,
    ) -> Result<Self> {
        if rank == 0 {
            return Err(GpHikError::VarianceNotPrepared(
                "fine variance needs a positive rank".to_string(),
            ));
        }
        if eigen.rank() < rank.min(store.n_examples()) {
            return Err(GpHikError::VarianceNotPrepared(format!(
                "fine variance of rank {rank} needs {rank} eigenpairs, {} available",
                eigen.rank()
            )));
        }
        let eigen = eigen.truncated(rank);
        let projections: Vec<PartialSums> = eigen
            .vectors
            .iter()
            .map(|u| store.partial_sums(u))
            .collect();
        let luts = quantizer.map(|q| {
            projections
                .iter()
                .map(|sums| {
                    lookup_table(store, transform, q, |dim, rank, value| {
                        sums.evaluate(dim, rank, value)
                    })
                })
                .collect()
        });
        debug!("fine variance prepared with {} eigenpairs", eigen.rank());
        Ok(Self {
            eigen,
            projections,
            luts,
        })
    }

    pub fn rank(&self) -> usize {
        self.eigen.rank()
    }

    pub fn estimate(
        &self,
        store: &FeatureStore,
        transform: &ParameterizedTransform,
        quantizer: Option<&Quantizer>,
        query: &SparseVector,
    ) -> f64 {
        let explained: f64 = self
            .eigen
            .values
            .iter()
            .enumerate()
            .filter(|(_, &lambda)| lambda > 0.0)
            .map(|(j, &lambda)| {
                let projection = match (quantizer, &self.luts) {
                    (Some(q), Some(luts)) => lookup(&luts[j], q, query),
                    _ => table_sum(&self.projections[j], store, transform, query, false),
                };
                projection * projection / lambda
            })
            .sum();
        prior_variance(transform, query) - explained
    }
}

/// Exact predictive variance through one linear solve
pub fn exact_variance(
    kernel: &KernelSum<'_>,
    solver: &ConjugateGradient,
    query: &SparseVector,
) -> f64 {
    let transform = kernel.transform();
    let k_star = kernel.store().kernel_vector(query, transform);
    let report = solver.solve(kernel, &k_star, None);
    if !report.converged {
        warn!(
            "exact variance: solve stopped with residual {:.3e}",
            report.residual_norm
        );
    }
    prior_variance(transform, query) - dot(&k_star, &report.solution)
}
