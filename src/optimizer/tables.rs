//! Per-class classification tables
//!
//! With `α_c` solved for class `c`, the score of a query is
//! `Σ_d Σ_i α_c,i min(f(x_d), f(x_i,d))`. [`PartialSums`] give each inner sum
//! in `O(log m_d)`; with a [`Quantizer`] the inner sums are tabulated once per
//! bin prototype, making each dimension a single lookup.

use crate::core::{GpHikError, Result, SparseVector};
use crate::kernel::{FeatureStore, ParameterizedTransform, PartialSums, Quantizer};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tables A/B and, when quantized, T for one class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassTables {
    pub sums: PartialSums,
    /// `lut[d * bins + b]`, score contribution of dimension `d` at prototype `b`
    pub lut: Option<Vec<f64>>,
}

impl ClassTables {
    pub fn build(
        store: &FeatureStore,
        transform: &ParameterizedTransform,
        alpha: &[f64],
        quantizer: Option<&Quantizer>,
    ) -> Self {
        let sums = store.partial_sums(alpha);
        let lut = quantizer.map(|q| {
            lookup_table(store, transform, q, |dim, rank, value| {
                sums.evaluate(dim, rank, value)
            })
        });
        Self { sums, lut }
    }

    /// Score from A/B, exact up to floating point
    pub fn score(
        &self,
        store: &FeatureStore,
        transform: &ParameterizedTransform,
        query: &SparseVector,
    ) -> f64 {
        query
            .iter()
            .filter(|&(_, raw)| raw > 0.0)
            .map(|(dim, raw)| {
                self.sums
                    .evaluate(dim, store.rank(dim, raw), transform.apply(dim, raw))
            })
            .sum()
    }

    /// Score from T; `None` if the class has no lookup table
    pub fn score_quantized(&self, quantizer: &Quantizer, query: &SparseVector) -> Option<f64> {
        self.lut
            .as_deref()
            .map(|lut| lookup(lut, quantizer, query))
    }
}

/// Tabulate `entry(dim, rank, f(prototype))` for every dimension and bin
pub(crate) fn lookup_table<F>(
    store: &FeatureStore,
    transform: &ParameterizedTransform,
    quantizer: &Quantizer,
    entry: F,
) -> Vec<f64>
where
    F: Fn(usize, usize, f64) -> f64,
{
    let bins = quantizer.bins();
    let mut lut = vec![0.0; store.n_dims() * bins];
    for dim in 0..store.n_dims() {
        for bin in 0..bins {
            let raw = quantizer.prototype(bin);
            lut[dim * bins + bin] = entry(dim, store.rank(dim, raw), transform.apply(dim, raw));
        }
    }
    lut
}

/// Sum of table entries for the non-zero query dimensions
#[inline]
pub(crate) fn lookup(lut: &[f64], quantizer: &Quantizer, query: &SparseVector) -> f64 {
    let bins = quantizer.bins();
    query
        .iter()
        .filter_map(|(dim, raw)| lut.get(dim * bins + quantizer.value_to_bin(raw)))
        .sum()
}

/// Build tables for `classes` from the solved `alphas`
///
/// Nothing is returned unless every requested class could be built, so callers
/// can swap the result in without ever holding a half-updated table set.
pub fn build_tables(
    store: &FeatureStore,
    transform: &ParameterizedTransform,
    quantizer: Option<&Quantizer>,
    alphas: &BTreeMap<u32, Vec<f64>>,
    classes: &[u32],
) -> Result<BTreeMap<u32, ClassTables>> {
    let mut tables = BTreeMap::new();
    for &class in classes {
        let alpha = alphas.get(&class).ok_or_else(|| {
            GpHikError::InvalidState(format!("no solution for class {class}"))
        })?;
        if alpha.len() != store.n_examples() {
            return Err(GpHikError::InvalidState(format!(
                "solution for class {class} has {} entries, store has {} examples",
                alpha.len(),
                store.n_examples()
            )));
        }
        tables.insert(class, ClassTables::build(store, transform, alpha, quantizer));
    }
    info!(
        "built classification tables for {} classes ({} dimensions{})",
        tables.len(),
        store.n_dims(),
        quantizer.map_or(String::new(), |q| format!(", {} bins", q.bins()))
    );
    Ok(tables)
}
