//! Sorted feature storage for fast histogram intersection arithmetic
//!
//! For non-negative features the histogram intersection kernel decomposes into
//! independent one-dimensional `min` kernels. Within one dimension, with the
//! non-zero values sorted ascending as v_0 ≤ v_1 ≤ … ≤ v_{m-1}, the weighted sum
//!
//! Σ_s w_s · min(x, v_s) = Σ_{s<r} w_s v_s + x · Σ_{s≥r} w_s,   r = #{s : v_s ≤ x}
//!
//! needs only two cumulative sums. Kernel-vector products, the classification
//! tables A/B and the variance tables are all built from that identity, so the
//! full n×n kernel matrix is never formed.
//!
//! Zeros are never stored: `min(0, v) = 0` for non-negative values.

use crate::core::{GpHikError, Result, Sample, SparseVector};
use crate::kernel::ParameterizedTransform;
use serde::{Deserialize, Serialize};

/// One stored non-zero feature value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SortedEntry {
    /// Index of the training example
    pub example: usize,
    /// Value as given
    pub raw: f64,
    /// Value after the current transform
    pub value: f64,
}

/// Cumulative sums of a weight vector along the sorted order of every dimension
///
/// `a[d][r] = Σ_{s<r} w_s v_s` and `b[d][r] = Σ_{s≥r} w_s`, both of length
/// `m_d + 1` where `m_d` is the number of non-zeros in dimension `d`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialSums {
    pub a: Vec<Vec<f64>>,
    pub b: Vec<Vec<f64>>,
}

impl PartialSums {
    /// `Σ_s w_s min(value, v_s)` for one dimension; `rank` comes from
    /// [`FeatureStore::rank`] and `value` is the transformed query value.
    #[inline]
    pub fn evaluate(&self, dim: usize, rank: usize, value: f64) -> f64 {
        match (self.a.get(dim), self.b.get(dim)) {
            (Some(a), Some(b)) => a[rank] + value * b[rank],
            _ => 0.0,
        }
    }

    /// Same as [`evaluate`](Self::evaluate) for tables built from squared values,
    /// where the upper part scales with `value²`.
    #[inline]
    pub fn evaluate_squared(&self, dim: usize, rank: usize, value: f64) -> f64 {
        self.evaluate(dim, rank, value * value)
    }

    pub fn n_dims(&self) -> usize {
        self.a.len()
    }

    /// Largest absolute difference to another table set of the same shape
    pub fn max_abs_diff(&self, other: &PartialSums) -> f64 {
        let diff = |x: &[Vec<f64>], y: &[Vec<f64>]| {
            x.iter()
                .zip(y)
                .flat_map(|(u, v)| u.iter().zip(v).map(|(p, q)| (p - q).abs()))
                .fold(0.0, f64::max)
        };
        if self.a.len() != other.a.len()
            || self.a.iter().zip(&other.a).any(|(u, v)| u.len() != v.len())
        {
            return f64::INFINITY;
        }
        diff(&self.a, &other.a).max(diff(&self.b, &other.b))
    }
}

/// Training examples kept sorted per dimension
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureStore {
    n_examples: usize,
    dimensions: Vec<Vec<SortedEntry>>,
    examples: Vec<SparseVector>,
}

impl FeatureStore {
    /// Build a store from raw examples; values are left untransformed
    pub fn from_examples(examples: &[SparseVector]) -> Result<Self> {
        let mut store = Self::default();
        for example in examples {
            validate_example(example)?;
        }
        for example in examples {
            store.push_unsorted(example);
        }
        for entries in &mut store.dimensions {
            entries.sort_by(|x, y| x.raw.total_cmp(&y.raw).then(x.example.cmp(&y.example)));
        }
        Ok(store)
    }

    pub fn from_samples(samples: &[Sample]) -> Result<Self> {
        let examples: Vec<SparseVector> = samples.iter().map(|s| s.features.clone()).collect();
        Self::from_examples(&examples)
    }

    fn push_unsorted(&mut self, example: &SparseVector) {
        let index = self.n_examples;
        for (dim, raw) in example.iter().filter(|&(_, v)| v != 0.0) {
            if dim >= self.dimensions.len() {
                self.dimensions.resize_with(dim + 1, Vec::new);
            }
            self.dimensions[dim].push(SortedEntry {
                example: index,
                raw,
                value: raw,
            });
        }
        self.examples.push(example.clone());
        self.n_examples += 1;
    }

    pub fn n_examples(&self) -> usize {
        self.n_examples
    }

    pub fn n_dims(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_examples == 0
    }

    /// Raw training example `i`
    pub fn example(&self, i: usize) -> &SparseVector {
        &self.examples[i]
    }

    pub fn examples(&self) -> &[SparseVector] {
        &self.examples
    }

    /// Sorted non-zero entries of one dimension
    pub fn dimension(&self, dim: usize) -> &[SortedEntry] {
        self.dimensions.get(dim).map_or(&[], Vec::as_slice)
    }

    /// Total number of stored non-zeros
    pub fn nnz(&self) -> usize {
        self.dimensions.iter().map(Vec::len).sum()
    }

    /// Largest raw value over all dimensions (0 for an empty store)
    pub fn max_raw_value(&self) -> f64 {
        self.dimensions
            .iter()
            .filter_map(|entries| entries.last())
            .map(|e| e.raw)
            .fold(0.0, f64::max)
    }

    /// Recompute every cached transformed value
    pub fn apply_transform(&mut self, transform: &ParameterizedTransform) {
        for (dim, entries) in self.dimensions.iter_mut().enumerate() {
            for entry in entries.iter_mut() {
                entry.value = transform.apply(dim, entry.raw);
            }
        }
    }

    /// Insert a new example at the sorted position of each of its values and
    /// return its example index. Equal values go after the existing ones.
    pub fn insert(
        &mut self,
        example: &SparseVector,
        transform: &ParameterizedTransform,
    ) -> Result<usize> {
        validate_example(example)?;
        let index = self.n_examples;
        for (dim, raw) in example.iter().filter(|&(_, v)| v != 0.0) {
            if dim >= self.dimensions.len() {
                self.dimensions.resize_with(dim + 1, Vec::new);
            }
            let entries = &mut self.dimensions[dim];
            let position = entries.partition_point(|e| e.raw <= raw);
            entries.insert(
                position,
                SortedEntry {
                    example: index,
                    raw,
                    value: transform.apply(dim, raw),
                },
            );
        }
        self.examples.push(example.clone());
        self.n_examples += 1;
        Ok(index)
    }

    /// Number of stored values in `dim` that are ≤ `raw`
    #[inline]
    pub fn rank(&self, dim: usize, raw: f64) -> usize {
        self.dimension(dim).partition_point(|e| e.raw <= raw)
    }

    /// `K α` for the transformed histogram intersection kernel
    pub fn multiply(&self, alpha: &[f64]) -> Vec<f64> {
        self.multiply_weighted(alpha, |_, entry| entry.value)
    }

    /// `K_w α` for the kernel `K_w[i][j] = Σ_d weight(d, argmin)`, i.e. the weight
    /// of whichever of the two entries has the smaller raw value. With transform
    /// derivatives as weights this is the derivative of the kernel matrix.
    pub fn multiply_weighted<F>(&self, alpha: &[f64], weight: F) -> Vec<f64>
    where
        F: Fn(usize, &SortedEntry) -> f64,
    {
        debug_assert_eq!(alpha.len(), self.n_examples);
        let mut result = vec![0.0; self.n_examples];
        let mut suffix = Vec::new();
        for (dim, entries) in self.dimensions.iter().enumerate() {
            let m = entries.len();
            suffix.clear();
            suffix.resize(m + 1, 0.0);
            for r in (0..m).rev() {
                suffix[r] = suffix[r + 1] + alpha[entries[r].example];
            }
            let mut prefix = 0.0;
            for (r, entry) in entries.iter().enumerate() {
                let w = weight(dim, entry);
                prefix += alpha[entry.example] * w;
                result[entry.example] += prefix + w * suffix[r + 1];
            }
        }
        result
    }

    /// Tables A/B for the weight vector `alpha`
    pub fn partial_sums(&self, alpha: &[f64]) -> PartialSums {
        debug_assert_eq!(alpha.len(), self.n_examples);
        let mut a = Vec::with_capacity(self.dimensions.len());
        let mut b = Vec::with_capacity(self.dimensions.len());
        for entries in &self.dimensions {
            let m = entries.len();
            let mut a_dim = vec![0.0; m + 1];
            let mut b_dim = vec![0.0; m + 1];
            for (r, entry) in entries.iter().enumerate() {
                a_dim[r + 1] = a_dim[r] + alpha[entry.example] * entry.value;
            }
            for r in (0..m).rev() {
                b_dim[r] = b_dim[r + 1] + alpha[entries[r].example];
            }
            a.push(a_dim);
            b.push(b_dim);
        }
        PartialSums { a, b }
    }

    /// Tables for `Σ_i min(x, v_i)²` with unit weights, read with
    /// [`PartialSums::evaluate_squared`]
    pub fn squared_partial_sums(&self) -> PartialSums {
        let mut a = Vec::with_capacity(self.dimensions.len());
        let mut b = Vec::with_capacity(self.dimensions.len());
        for entries in &self.dimensions {
            let m = entries.len();
            let mut a_dim = vec![0.0; m + 1];
            for (r, entry) in entries.iter().enumerate() {
                a_dim[r + 1] = a_dim[r] + entry.value * entry.value;
            }
            let b_dim = (0..=m).map(|r| (m - r) as f64).collect();
            a.push(a_dim);
            b.push(b_dim);
        }
        PartialSums { a, b }
    }

    /// Exact kernel vector `k*_i = Σ_d min(f(x_d), f(x_{i,d}))`
    pub fn kernel_vector(
        &self,
        query: &SparseVector,
        transform: &ParameterizedTransform,
    ) -> Vec<f64> {
        let mut k = vec![0.0; self.n_examples];
        for (dim, raw) in query.iter().filter(|&(_, v)| v > 0.0) {
            let value = transform.apply(dim, raw);
            for entry in self.dimension(dim) {
                k[entry.example] += value.min(entry.value);
            }
        }
        k
    }

    /// Kernel diagonal `K_ii`
    pub fn diagonal(&self) -> Vec<f64> {
        self.diagonal_weighted(|_, entry| entry.value)
    }

    /// Diagonal of the kernel built from `weight(dim, entry)`
    pub fn diagonal_weighted<F>(&self, weight: F) -> Vec<f64>
    where
        F: Fn(usize, &SortedEntry) -> f64,
    {
        let mut diag = vec![0.0; self.n_examples];
        for (dim, entries) in self.dimensions.iter().enumerate() {
            for entry in entries {
                diag[entry.example] += weight(dim, entry);
            }
        }
        diag
    }

    /// Sum of the kernel diagonal
    pub fn trace(&self) -> f64 {
        self.dimensions
            .iter()
            .flat_map(|entries| entries.iter().map(|e| e.value))
            .sum()
    }
}

fn validate_example(example: &SparseVector) -> Result<()> {
    for (dimension, value) in example.iter() {
        if !(value >= 0.0) || !value.is_finite() {
            return Err(GpHikError::NegativeFeature { dimension, value });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{HistogramIntersectionKernel, Kernel};
    use approx::assert_relative_eq;

    fn examples() -> Vec<SparseVector> {
        vec![
            SparseVector::new(vec![0, 1], vec![0.2, 0.7]),
            SparseVector::new(vec![0, 2], vec![0.5, 0.1]),
            SparseVector::new(vec![1, 2], vec![0.3, 0.9]),
            SparseVector::new(vec![0, 1, 2], vec![0.5, 0.4, 0.2]),
        ]
    }

    fn dense_multiply(examples: &[SparseVector], alpha: &[f64]) -> Vec<f64> {
        let kernel = HistogramIntersectionKernel::standard();
        examples
            .iter()
            .map(|x| {
                examples
                    .iter()
                    .zip(alpha)
                    .map(|(y, a)| a * kernel.compute(x, y))
                    .sum()
            })
            .collect()
    }

    #[test]
    fn test_dimensions_are_sorted() {
        let store = FeatureStore::from_examples(&examples()).unwrap();
        assert_eq!(store.n_examples(), 4);
        assert_eq!(store.n_dims(), 3);
        assert_eq!(store.nnz(), 9);
        for dim in 0..store.n_dims() {
            let entries = store.dimension(dim);
            assert!(entries.windows(2).all(|w| w[0].raw <= w[1].raw));
        }
        assert_eq!(store.max_raw_value(), 0.9);
    }

    #[test]
    fn test_multiply_matches_dense_kernel() {
        let data = examples();
        let store = FeatureStore::from_examples(&data).unwrap();
        let alpha = vec![0.5, -1.0, 2.0, 0.25];

        let fast = store.multiply(&alpha);
        let slow = dense_multiply(&data, &alpha);
        for (f, s) in fast.iter().zip(&slow) {
            assert_relative_eq!(f, s, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_partial_sums_reproduce_weighted_kernel_sum() {
        let data = examples();
        let store = FeatureStore::from_examples(&data).unwrap();
        let alpha = vec![1.0, -0.5, 0.3, 2.0];
        let sums = store.partial_sums(&alpha);

        let query = SparseVector::new(vec![0, 1, 2], vec![0.5, 0.35, 1.5]);
        let fast: f64 = query
            .iter()
            .map(|(d, x)| sums.evaluate(d, store.rank(d, x), x))
            .sum();
        let transform = ParameterizedTransform::Identity;
        let k = store.kernel_vector(&query, &transform);
        let slow: f64 = k.iter().zip(&alpha).map(|(k, a)| k * a).sum();
        assert_relative_eq!(fast, slow, epsilon = 1e-12);
    }

    #[test]
    fn test_squared_partial_sums() {
        let store = FeatureStore::from_examples(&examples()).unwrap();
        let sums = store.squared_partial_sums();
        let x = 0.45;
        let expected: f64 = store
            .dimension(0)
            .iter()
            .map(|e| e.value.min(x).powi(2))
            .sum();
        assert_relative_eq!(
            sums.evaluate_squared(0, store.rank(0, x), x),
            expected,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_insert_keeps_order_and_matches_rebuild() {
        let data = examples();
        let transform = ParameterizedTransform::Power { exponent: 2.0 };
        let mut store = FeatureStore::from_examples(&data[..3]).unwrap();
        store.apply_transform(&transform);
        let index = store.insert(&data[3], &transform).unwrap();
        assert_eq!(index, 3);

        let mut rebuilt = FeatureStore::from_examples(&data).unwrap();
        rebuilt.apply_transform(&transform);
        let alpha = vec![0.1, 0.2, -0.3, 0.4];
        let a = store.multiply(&alpha);
        let b = rebuilt.multiply(&alpha);
        for (x, y) in a.iter().zip(&b) {
            assert_relative_eq!(x, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_insert_grows_dimensions() {
        let mut store = FeatureStore::from_examples(&examples()).unwrap();
        let wide = SparseVector::new(vec![6], vec![1.0]);
        store
            .insert(&wide, &ParameterizedTransform::Identity)
            .unwrap();
        assert_eq!(store.n_dims(), 7);
        assert_eq!(store.dimension(6).len(), 1);
        assert!(store.dimension(4).is_empty());
    }

    #[test]
    fn test_rank_with_ties() {
        let data = vec![
            SparseVector::new(vec![0], vec![0.5]),
            SparseVector::new(vec![0], vec![0.5]),
            SparseVector::new(vec![0], vec![0.8]),
        ];
        let store = FeatureStore::from_examples(&data).unwrap();
        assert_eq!(store.rank(0, 0.1), 0);
        assert_eq!(store.rank(0, 0.5), 2);
        assert_eq!(store.rank(0, 0.9), 3);
        assert_eq!(store.rank(5, 0.9), 0);
    }

    #[test]
    fn test_transform_changes_diagonal() {
        let mut store = FeatureStore::from_examples(&examples()).unwrap();
        assert_relative_eq!(store.diagonal()[0], 0.9, epsilon = 1e-12);
        store.apply_transform(&ParameterizedTransform::Power { exponent: 2.0 });
        assert_relative_eq!(store.diagonal()[0], 0.04 + 0.49, epsilon = 1e-12);
        assert_relative_eq!(
            store.trace(),
            store.diagonal().iter().sum::<f64>(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_rejects_negative_values() {
        let data = vec![SparseVector::new(vec![0, 3], vec![0.5, -0.1])];
        let err = FeatureStore::from_examples(&data).unwrap_err();
        assert!(matches!(
            err,
            GpHikError::NegativeFeature { dimension: 3, .. }
        ));
    }
}
