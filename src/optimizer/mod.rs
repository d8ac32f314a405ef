//! GP-HIK training and inference engine
//!
//! [`HikGpOptimizer`] owns everything derived from the training data: the
//! sorted feature store, the optimized transform and noise, the label vectors
//! per class, the solved weights, the classification tables and the variance
//! tables. Training replaces all of it at once; queries only read it.

pub mod incremental;
pub mod likelihood;
pub mod search;
pub mod tables;
pub mod variance;

pub use self::likelihood::*;
pub use self::search::*;
pub use self::tables::*;
pub use self::variance::*;

use crate::core::{
    Classification, GpHikConfig, GpHikError, OptimizationMethod, Result, SparseVector,
    VarianceMethod,
};
use crate::kernel::{FeatureStore, KernelSum, ParameterizedTransform, Quantizer};
use crate::solver::{ConjugateGradient, EigenApproximation, EigenEstimator};
use crate::utils::validation::{class_from_label, validate_binary_vector};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Class ids of a two-class problem; only `positive` owns tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryClasses {
    pub positive: u32,
    pub negative: u32,
}

/// Label vectors and class bookkeeping of one training run
#[derive(Debug, Clone)]
pub(crate) struct LabelSet {
    pub(crate) vectors: BTreeMap<u32, Vec<f64>>,
    pub(crate) binary: Option<BinaryClasses>,
    pub(crate) known: BTreeSet<u32>,
}

/// Gaussian process classifier with a histogram intersection kernel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HikGpOptimizer {
    config: GpHikConfig,
    store: Option<FeatureStore>,
    transform: ParameterizedTransform,
    noise: f64,
    quantizer: Option<Quantizer>,
    /// `{+1, −1, 0}` vectors per class, or the targets under key 0 for regression
    labels: BTreeMap<u32, Vec<f64>>,
    binary: Option<BinaryClasses>,
    known_classes: BTreeSet<u32>,
    /// Last solution per class, reused as solver warm start
    alphas: BTreeMap<u32, Vec<f64>>,
    tables: BTreeMap<u32, ClassTables>,
    eigen: EigenApproximation,
    rough: Option<RoughVariance>,
    fine: Option<FineVariance>,
    trained: bool,
}

impl HikGpOptimizer {
    /// Create an untrained engine; the configuration is validated up front
    pub fn new(config: GpHikConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transform: config.transform.clone(),
            noise: config.noise,
            config,
            store: None,
            quantizer: None,
            labels: BTreeMap::new(),
            binary: None,
            known_classes: BTreeSet::new(),
            alphas: BTreeMap::new(),
            tables: BTreeMap::new(),
            eigen: EigenApproximation::default(),
            rough: None,
            fine: None,
            trained: false,
        })
    }

    /// Create an engine bound to the training features
    pub fn initialize(config: GpHikConfig, store: FeatureStore) -> Result<Self> {
        let mut engine = Self::new(config)?;
        engine.store = Some(store);
        Ok(engine)
    }

    /// Configuration the engine was created with, plus accepted setter changes
    pub fn config(&self) -> &GpHikConfig {
        &self.config
    }

    /// Whether tables have been built by an optimization
    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Whether labels are treated as real-valued targets
    pub fn performs_regression(&self) -> bool {
        self.config.performs_regression
    }

    /// Training features, transformed with the current parameters
    pub fn feature_store(&self) -> Option<&FeatureStore> {
        self.store.as_ref()
    }

    /// Number of training examples, 0 without a feature store
    pub fn n_examples(&self) -> usize {
        self.store.as_ref().map_or(0, FeatureStore::n_examples)
    }

    /// Transform with the optimized parameters
    pub fn transform(&self) -> &ParameterizedTransform {
        &self.transform
    }

    /// Noise on the kernel diagonal, optimized or as configured
    pub fn noise(&self) -> f64 {
        self.noise
    }

    /// Quantizer frozen at the first training, if lookup tables are enabled
    pub fn quantizer(&self) -> Option<&Quantizer> {
        self.quantizer.as_ref()
    }

    /// Top eigenpairs of `K + σI` at the final parameters
    pub fn eigen_approximation(&self) -> &EigenApproximation {
        &self.eigen
    }

    /// Every class id seen so far
    pub fn known_classes(&self) -> &BTreeSet<u32> {
        &self.known_classes
    }

    /// Positive and negative class of a binary model
    pub fn binary_classes(&self) -> Option<BinaryClasses> {
        self.binary
    }

    /// Label vectors the model was trained on
    pub fn label_vectors(&self) -> &BTreeMap<u32, Vec<f64>> {
        &self.labels
    }

    /// Solved weights per class
    pub fn alphas(&self) -> &BTreeMap<u32, Vec<f64>> {
        &self.alphas
    }

    /// A/B and lookup tables per class
    pub fn class_tables(&self) -> &BTreeMap<u32, ClassTables> {
        &self.tables
    }

    /// Bind training features; only allowed before training
    pub fn set_feature_store(&mut self, store: FeatureStore) -> Result<()> {
        self.ensure_untrained("replace the feature store")?;
        self.store = Some(store);
        Ok(())
    }

    /// Switch between classification and regression; only allowed before training
    pub fn set_performs_regression(&mut self, regression: bool) -> Result<()> {
        if regression != self.config.performs_regression {
            self.ensure_untrained("switch between classification and regression")?;
        }
        self.config.performs_regression = regression;
        Ok(())
    }

    /// Eigenpairs kept for the fine variance; only allowed before training
    pub fn set_variance_rank(&mut self, rank: usize) -> Result<()> {
        if rank != self.config.variance_rank {
            self.ensure_untrained("change the variance approximation rank")?;
        }
        self.config.variance_rank = rank;
        Ok(())
    }

    /// Bounds used by the next optimization
    pub fn set_parameter_bounds(&mut self, lower: f64, upper: f64) -> Result<()> {
        let mut config = self.config.clone();
        config.parameter_lower_bound = lower;
        config.parameter_upper_bound = upper;
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Search strategy for the next optimization, validated before it is stored
    pub fn set_optimization_method(&mut self, method: OptimizationMethod) -> Result<()> {
        let mut config = self.config.clone();
        config.optimization = method;
        config.validate()?;
        self.config = config;
        Ok(())
    }

    fn ensure_untrained(&self, action: &str) -> Result<()> {
        if self.trained {
            Err(GpHikError::InvalidState(format!(
                "cannot {action} of a trained model"
            )))
        } else {
            Ok(())
        }
    }

    fn require_store(&self) -> Result<&FeatureStore> {
        self.store.as_ref().ok_or(GpHikError::MissingFeatureStore)
    }

    fn solver(&self) -> ConjugateGradient {
        ConjugateGradient::new(self.config.solver_max_iterations, self.config.solver_tolerance)
    }

    fn approximator(&self) -> LikelihoodApproximator {
        LikelihoodApproximator::new(
            self.solver(),
            EigenEstimator::new(self.config.eigen_max_iterations, self.config.eigen_tolerance),
            self.config.likelihood_eigenvalues,
        )
        .with_verification(self.config.verify_approximation)
    }

    /// Train from one label per example
    ///
    /// Labels are class numbers (non-negative integers), or real targets in
    /// regression mode. Two classes give a binary problem, more give
    /// one-vs-rest.
    pub fn optimize(&mut self, labels: &[f64]) -> Result<SearchReport> {
        self.config.validate()?;
        let store = self.require_store()?;
        if labels.len() != store.n_examples() {
            return Err(GpHikError::InvalidDataset(format!(
                "{} labels for {} examples",
                labels.len(),
                store.n_examples()
            )));
        }

        let label_set = if self.config.performs_regression {
            if let Some(bad) = labels.iter().find(|y| !y.is_finite()) {
                return Err(GpHikError::InvalidLabel(*bad));
            }
            LabelSet {
                vectors: BTreeMap::from([(0, labels.to_vec())]),
                binary: None,
                known: BTreeSet::new(),
            }
        } else {
            let classes = labels
                .iter()
                .map(|&y| class_from_label(y))
                .collect::<Result<Vec<u32>>>()?;
            let known: BTreeSet<u32> = classes.iter().copied().collect();
            if known.len() < 2 {
                return Err(GpHikError::InvalidDataset(format!(
                    "classification needs at least two classes, found {}",
                    known.len()
                )));
            }
            let one_vs_rest = |class: u32| -> Vec<f64> {
                classes
                    .iter()
                    .map(|&c| if c == class { 1.0 } else { -1.0 })
                    .collect()
            };
            if known.len() == 2 {
                let negative = *known.iter().next().unwrap_or(&0);
                let positive = *known.iter().next_back().unwrap_or(&0);
                LabelSet {
                    vectors: BTreeMap::from([(positive, one_vs_rest(positive))]),
                    binary: Some(BinaryClasses { positive, negative }),
                    known,
                }
            } else {
                LabelSet {
                    vectors: known.iter().map(|&c| (c, one_vs_rest(c))).collect(),
                    binary: None,
                    known,
                }
            }
        };

        let store = store.clone();
        let method = self.config.optimization;
        self.train(store, label_set, self.warm_start(), method)
    }

    /// Train from caller-built label vectors with entries in `{+1, −1, 0}`
    ///
    /// A map with two entries is a binary problem: the larger class id is
    /// trained and the smaller one scores as its negation.
    pub fn optimize_binary_labels(
        &mut self,
        binary_labels: BTreeMap<u32, Vec<f64>>,
    ) -> Result<SearchReport> {
        self.config.validate()?;
        if self.config.performs_regression {
            return Err(GpHikError::InvalidState(
                "binary label vectors need a classification model".to_string(),
            ));
        }
        let store = self.require_store()?;
        if binary_labels.is_empty() {
            return Err(GpHikError::EmptyDataset);
        }
        for y in binary_labels.values() {
            validate_binary_vector(y, store.n_examples())?;
        }

        let known: BTreeSet<u32> = binary_labels.keys().copied().collect();
        let label_set = if binary_labels.len() == 2 {
            let negative = *known.iter().next().unwrap_or(&0);
            let positive = *known.iter().next_back().unwrap_or(&0);
            let mut vectors = binary_labels;
            vectors.remove(&negative);
            LabelSet {
                vectors,
                binary: Some(BinaryClasses { positive, negative }),
                known,
            }
        } else {
            LabelSet {
                vectors: binary_labels,
                binary: None,
                known,
            }
        };

        let store = store.clone();
        let method = self.config.optimization;
        self.train(store, label_set, self.warm_start(), method)
    }

    fn warm_start(&self) -> BTreeMap<u32, Vec<f64>> {
        if self.config.use_previous_alphas {
            self.alphas.clone()
        } else {
            BTreeMap::new()
        }
    }

    /// Search parameters, solve every class and rebuild all derived tables
    ///
    /// State is only written after everything succeeded.
    pub(crate) fn train(
        &mut self,
        mut store: FeatureStore,
        label_set: LabelSet,
        mut warm: BTreeMap<u32, Vec<f64>>,
        method: OptimizationMethod,
    ) -> Result<SearchReport> {
        if store.is_empty() {
            return Err(GpHikError::EmptyDataset);
        }

        let mut transform = self.transform.clone();
        transform.fit_dimensions(store.n_dims());

        let quantizer = match (&self.quantizer, &self.config.quantization) {
            (Some(q), _) => Some(q.clone()),
            (None, Some(settings)) => {
                let upper = settings.upper_bound.unwrap_or_else(|| store.max_raw_value());
                let upper = if upper > 0.0 { upper } else { 1.0 };
                Some(Quantizer::new(settings.bins, upper)?)
            }
            (None, None) => None,
        };

        let optimize_noise = self.config.optimize_noise;
        let n_transform = transform.n_parameters();
        let mut space = SearchSpace {
            lower: vec![self.config.parameter_lower_bound; n_transform],
            upper: vec![self.config.parameter_upper_bound; n_transform],
        };
        let mut start = transform.parameters();
        if optimize_noise {
            space.lower.push(self.config.noise_lower_bound);
            space.upper.push(self.config.noise_upper_bound);
            start.push(self.noise);
        }

        info!(
            "optimizing {} transform with {} over {} examples, {} label vectors",
            transform.name(),
            method.name(),
            store.n_examples(),
            label_set.vectors.len()
        );

        let approximator = self.approximator();
        let use_previous = self.config.use_previous_alphas;
        let fixed_noise = self.noise;
        let report = {
            let mut candidate = transform.clone();
            let labels = &label_set.vectors;
            let store = &mut store;
            let warm = &mut warm;
            minimize(&method, &space, &start, |point: &[f64]| {
                if candidate.set_parameters(&point[..n_transform]).is_err()
                    || candidate.validate().is_err()
                {
                    return f64::INFINITY;
                }
                let noise = if optimize_noise {
                    point[n_transform]
                } else {
                    fixed_noise
                };
                store.apply_transform(&candidate);
                let kernel = KernelSum::new(store, &candidate, noise, optimize_noise);
                let value = approximator.evaluate(&kernel, labels, warm, 0, false);
                if use_previous {
                    *warm = value.alphas;
                }
                value.value
            })
        };

        transform.set_parameters(&report.best[..n_transform])?;
        transform.validate()?;
        let noise = if optimize_noise {
            report.best[n_transform]
        } else {
            fixed_noise
        };
        store.apply_transform(&transform);

        let (final_value, tables, rough, fine) = {
            let kernel = KernelSum::new(&store, &transform, noise, optimize_noise);
            let final_value = approximator.evaluate(
                &kernel,
                &label_set.vectors,
                &warm,
                self.config.variance_rank,
                false,
            );
            if !final_value.converged {
                warn!("final solve did not converge, tables use the best available weights");
            }
            let classes: Vec<u32> = label_set.vectors.keys().copied().collect();
            let tables = build_tables(
                &store,
                &transform,
                quantizer.as_ref(),
                &final_value.alphas,
                &classes,
            )?;
            let rough =
                RoughVariance::prepare(&store, &transform, &final_value.eigen, quantizer.as_ref());
            let fine = FineVariance::prepare(
                &store,
                &transform,
                &final_value.eigen,
                self.config.variance_rank,
                quantizer.as_ref(),
            );
            (final_value, tables, rough, fine)
        };

        info!(
            "training finished: parameters {:?}, noise {noise:.4e}, objective {:.6}",
            transform.parameters(),
            final_value.value
        );

        self.rough = rough
            .map_err(|e| warn!("rough variance unavailable: {e}"))
            .ok();
        self.fine = if self.config.variance_rank > 0 {
            fine.map_err(|e| warn!("fine variance unavailable: {e}")).ok()
        } else {
            None
        };
        self.store = Some(store);
        self.transform = transform;
        self.noise = noise;
        self.quantizer = quantizer;
        self.labels = label_set.vectors;
        self.binary = label_set.binary;
        self.known_classes = label_set.known;
        self.alphas = final_value.alphas;
        self.tables = tables;
        self.eigen = final_value.eigen;
        self.trained = true;

        Ok(report)
    }

    /// Check a query against the trained feature space
    fn check_query(&self, query: &SparseVector) -> Result<&FeatureStore> {
        if !self.trained {
            return Err(GpHikError::ModelNotTrained);
        }
        let store = self.require_store()?;
        for (dimension, value) in query.iter() {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(GpHikError::NegativeFeature { dimension, value });
            }
        }
        let width = query
            .iter()
            .filter(|&(_, v)| v != 0.0)
            .map(|(d, _)| d + 1)
            .max()
            .unwrap_or(0);
        if width > store.n_dims() {
            return Err(GpHikError::DimensionMismatch {
                expected: store.n_dims(),
                actual: width,
            });
        }
        Ok(store)
    }

    fn scores(&self, query: &SparseVector, use_lookup: bool) -> Result<BTreeMap<u32, f64>> {
        let store = self.check_query(query)?;
        let mut scores = BTreeMap::new();
        for (&class, tables) in &self.tables {
            let quantized = match (&self.quantizer, use_lookup) {
                (Some(q), true) => tables.score_quantized(q, query),
                _ => None,
            };
            let score =
                quantized.unwrap_or_else(|| tables.score(store, &self.transform, query));
            scores.insert(class, score);
        }
        if let Some(pair) = self.binary {
            let positive = scores.get(&pair.positive).copied().unwrap_or(0.0);
            scores.insert(pair.negative, -positive);
        }
        Ok(scores)
    }

    fn require_classification(&self) -> Result<()> {
        if self.config.performs_regression {
            Err(GpHikError::InvalidState(
                "regression model has no classes, use regress".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    /// Best class and every class score; uses lookup tables when quantized
    pub fn classify(&self, query: &SparseVector) -> Result<Classification> {
        self.require_classification()?;
        let scores = self.scores(query, true)?;
        Classification::from_scores(scores).ok_or(GpHikError::ModelNotTrained)
    }

    /// Like [`classify`](Self::classify) but always from the exact tables A/B
    pub fn classify_exact(&self, query: &SparseVector) -> Result<Classification> {
        self.require_classification()?;
        let scores = self.scores(query, false)?;
        Classification::from_scores(scores).ok_or(GpHikError::ModelNotTrained)
    }

    pub fn classify_dense(&self, query: &[f64]) -> Result<Classification> {
        self.classify(&SparseVector::from_dense(query))
    }

    pub fn classify_batch(&self, queries: &[SparseVector]) -> Result<Vec<Classification>> {
        queries.iter().map(|q| self.classify(q)).collect()
    }

    /// Predictive mean of a regression model
    pub fn regress(&self, query: &SparseVector) -> Result<f64> {
        if !self.config.performs_regression {
            return Err(GpHikError::InvalidState(
                "classification model, use classify".to_string(),
            ));
        }
        let scores = self.scores(query, true)?;
        scores.get(&0).copied().ok_or(GpHikError::ModelNotTrained)
    }

    /// Build the rough variance table, estimating `λ_max` if needed
    pub fn prepare_variance_approximation_rough(&mut self) -> Result<()> {
        if !self.trained {
            return Err(GpHikError::ModelNotTrained);
        }
        self.ensure_eigenpairs(1)?;
        let store = self.require_store()?;
        let rough =
            RoughVariance::prepare(store, &self.transform, &self.eigen, self.quantizer.as_ref())?;
        self.rough = Some(rough);
        Ok(())
    }

    /// Build the fine variance tables for the configured rank
    pub fn prepare_variance_approximation_fine(&mut self) -> Result<()> {
        if !self.trained {
            return Err(GpHikError::ModelNotTrained);
        }
        let rank = self.config.variance_rank;
        if rank == 0 {
            return Err(GpHikError::VarianceNotPrepared(
                "variance rank is 0".to_string(),
            ));
        }
        self.ensure_eigenpairs(rank)?;
        let store = self.require_store()?;
        let fine = FineVariance::prepare(
            store,
            &self.transform,
            &self.eigen,
            rank,
            self.quantizer.as_ref(),
        )?;
        self.fine = Some(fine);
        Ok(())
    }

    fn ensure_eigenpairs(&mut self, k: usize) -> Result<()> {
        let store = self.require_store()?;
        let k = k.min(store.n_examples());
        if self.eigen.rank() >= k {
            return Ok(());
        }
        let kernel = KernelSum::new(store, &self.transform, self.noise, false);
        let (eigen, _) =
            EigenEstimator::new(self.config.eigen_max_iterations, self.config.eigen_tolerance)
                .estimate(&kernel, k);
        self.eigen = eigen;
        Ok(())
    }

    pub fn predictive_variance_rough(&self, query: &SparseVector) -> Result<f64> {
        let store = self.check_query(query)?;
        let rough = self.rough.as_ref().ok_or_else(|| {
            GpHikError::VarianceNotPrepared("rough variance tables missing".to_string())
        })?;
        Ok(rough.estimate(store, &self.transform, self.quantizer.as_ref(), query))
    }

    pub fn predictive_variance_fine(&self, query: &SparseVector) -> Result<f64> {
        let store = self.check_query(query)?;
        let fine = self.fine.as_ref().ok_or_else(|| {
            GpHikError::VarianceNotPrepared("fine variance tables missing".to_string())
        })?;
        Ok(fine.estimate(store, &self.transform, self.quantizer.as_ref(), query))
    }

    pub fn predictive_variance_exact(&self, query: &SparseVector) -> Result<f64> {
        let store = self.check_query(query)?;
        let kernel = KernelSum::new(store, &self.transform, self.noise, false);
        Ok(exact_variance(&kernel, &self.solver(), query))
    }

    pub fn predictive_variance(&self, method: VarianceMethod, query: &SparseVector) -> Result<f64> {
        match method {
            VarianceMethod::Rough => self.predictive_variance_rough(query),
            VarianceMethod::Fine => self.predictive_variance_fine(query),
            VarianceMethod::Exact => self.predictive_variance_exact(query),
        }
    }

    pub fn predictive_variance_dense(&self, method: VarianceMethod, query: &[f64]) -> Result<f64> {
        self.predictive_variance(method, &SparseVector::from_dense(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn one_dim(values: &[f64]) -> FeatureStore {
        let examples: Vec<SparseVector> = values
            .iter()
            .map(|&v| SparseVector::new(vec![0], vec![v]))
            .collect();
        FeatureStore::from_examples(&examples).unwrap()
    }

    fn scenario_config() -> GpHikConfig {
        GpHikConfig {
            noise: 0.1,
            optimization: OptimizationMethod::Greedy { step_size: 1.0 },
            ..GpHikConfig::default()
        }
    }

    fn point(x: f64) -> SparseVector {
        SparseVector::new(vec![0], vec![x])
    }

    #[test]
    fn test_binary_scenario() {
        let mut engine =
            HikGpOptimizer::initialize(scenario_config(), one_dim(&[0.1, 0.5, 0.9])).unwrap();
        engine.optimize(&[1.0, 1.0, 2.0]).unwrap();

        assert_eq!(
            engine.binary_classes(),
            Some(BinaryClasses {
                positive: 2,
                negative: 1
            })
        );
        let result = engine.classify(&point(0.4)).unwrap();
        assert_eq!(result.class, 1);
        assert_relative_eq!(result.score(2).unwrap(), -0.609375, epsilon = 1e-8);
        assert_relative_eq!(result.score(1).unwrap(), 0.609375, epsilon = 1e-8);

        assert_eq!(engine.classify(&point(0.9)).unwrap().class, 2);
        assert_eq!(
            engine.known_classes().iter().copied().collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_optimize_without_store() {
        let mut engine = HikGpOptimizer::new(GpHikConfig::default()).unwrap();
        assert!(matches!(
            engine.optimize(&[1.0, 2.0]),
            Err(GpHikError::MissingFeatureStore)
        ));
    }

    #[test]
    fn test_invalid_configuration_fails_fast() {
        let config = GpHikConfig {
            parameter_lower_bound: 3.0,
            parameter_upper_bound: 1.0,
            ..GpHikConfig::default()
        };
        assert!(matches!(
            HikGpOptimizer::new(config),
            Err(GpHikError::InvalidConfiguration(_))
        ));

        let mut engine = HikGpOptimizer::new(GpHikConfig::default()).unwrap();
        assert!(engine.set_parameter_bounds(2.0, 2.0).is_err());
        assert!(engine.set_parameter_bounds(0.5, 2.0).is_ok());
    }

    #[test]
    fn test_bounds_outside_transform_domain_rejected_before_search() {
        let config = GpHikConfig {
            transform: ParameterizedTransform::Power { exponent: 1.0 },
            parameter_lower_bound: -2.0,
            parameter_upper_bound: -1.0,
            optimization: OptimizationMethod::Greedy { step_size: 0.5 },
            ..scenario_config()
        };
        assert!(matches!(
            HikGpOptimizer::initialize(config, one_dim(&[0.1, 0.5, 0.9])),
            Err(GpHikError::InvalidConfiguration(_))
        ));

        let power = GpHikConfig {
            transform: ParameterizedTransform::Power { exponent: 1.0 },
            ..scenario_config()
        };
        let mut engine = HikGpOptimizer::initialize(power, one_dim(&[0.1, 0.5, 0.9])).unwrap();
        assert!(engine.set_parameter_bounds(-2.0, -1.0).is_err());
        assert_eq!(engine.config().parameter_lower_bound, 1.0);
    }

    #[test]
    fn test_unusable_search_settings_fail_before_training() {
        let power = ParameterizedTransform::Power { exponent: 1.0 };
        for optimization in [
            OptimizationMethod::Greedy { step_size: 1e-300 },
            OptimizationMethod::DownhillSimplex {
                max_iterations: 5,
                time_limit_secs: 1e300,
                parameter_tolerance: 1e-4,
            },
        ] {
            let config = GpHikConfig {
                transform: power.clone(),
                optimization,
                ..scenario_config()
            };
            assert!(matches!(
                HikGpOptimizer::initialize(config, one_dim(&[0.1, 0.5, 0.9])),
                Err(GpHikError::InvalidConfiguration(_))
            ));
        }

        let mut engine = HikGpOptimizer::initialize(
            GpHikConfig {
                transform: power,
                ..scenario_config()
            },
            one_dim(&[0.1, 0.5, 0.9]),
        )
        .unwrap();
        assert!(engine
            .set_optimization_method(OptimizationMethod::Greedy { step_size: 1e-300 })
            .is_err());
        assert!(engine.optimize(&[1.0, 1.0, 2.0]).is_ok());
    }

    #[test]
    fn test_guarded_setters_after_training() {
        let mut engine =
            HikGpOptimizer::initialize(scenario_config(), one_dim(&[0.1, 0.5, 0.9])).unwrap();
        assert!(engine.set_variance_rank(2).is_ok());
        engine.optimize(&[1.0, 1.0, 2.0]).unwrap();

        assert!(matches!(
            engine.set_performs_regression(true),
            Err(GpHikError::InvalidState(_))
        ));
        assert!(matches!(
            engine.set_variance_rank(3),
            Err(GpHikError::InvalidState(_))
        ));
        assert!(matches!(
            engine.set_feature_store(one_dim(&[0.2])),
            Err(GpHikError::InvalidState(_))
        ));
        assert!(engine.set_variance_rank(2).is_ok());
    }

    #[test]
    fn test_query_validation() {
        let mut engine =
            HikGpOptimizer::initialize(scenario_config(), one_dim(&[0.1, 0.5, 0.9])).unwrap();
        assert!(matches!(
            engine.classify(&point(0.4)),
            Err(GpHikError::ModelNotTrained)
        ));
        engine.optimize(&[1.0, 1.0, 2.0]).unwrap();

        let wide = SparseVector::new(vec![0, 3], vec![0.4, 0.2]);
        assert!(matches!(
            engine.classify(&wide),
            Err(GpHikError::DimensionMismatch {
                expected: 1,
                actual: 4
            })
        ));
        assert!(matches!(
            engine.classify(&point(-0.4)),
            Err(GpHikError::NegativeFeature { .. })
        ));
        assert!(engine.regress(&point(0.4)).is_err());
    }

    #[test]
    fn test_labels_are_checked() {
        let mut engine =
            HikGpOptimizer::initialize(scenario_config(), one_dim(&[0.1, 0.5, 0.9])).unwrap();
        assert!(matches!(
            engine.optimize(&[1.0, 1.5, 2.0]),
            Err(GpHikError::InvalidLabel(_))
        ));
        assert!(matches!(
            engine.optimize(&[1.0, 1.0, 1.0]),
            Err(GpHikError::InvalidDataset(_))
        ));
        assert!(engine.optimize(&[1.0, 2.0]).is_err());
        assert!(!engine.is_trained());
    }

    #[test]
    fn test_multiclass_one_vs_rest() {
        let store = one_dim(&[0.1, 0.3, 0.5, 0.9]);
        let mut engine = HikGpOptimizer::initialize(scenario_config(), store).unwrap();
        engine.optimize(&[1.0, 3.0, 1.0, 2.0]).unwrap();

        assert!(engine.binary_classes().is_none());
        assert_eq!(engine.class_tables().len(), 3);
        let result = engine.classify(&point(0.3)).unwrap();
        assert_eq!(result.class, 3);
        assert_eq!(result.scores.len(), 3);
    }

    #[test]
    fn test_binary_label_map() {
        let mut engine =
            HikGpOptimizer::initialize(scenario_config(), one_dim(&[0.1, 0.5, 0.9])).unwrap();
        let map = BTreeMap::from([(4, vec![1.0, 1.0, -1.0]), (7, vec![-1.0, -1.0, 1.0])]);
        engine.optimize_binary_labels(map).unwrap();
        assert_eq!(engine.class_tables().len(), 1);
        assert_eq!(engine.classify(&point(0.4)).unwrap().class, 4);

        let bad = BTreeMap::from([(1, vec![1.0, 0.5, -1.0])]);
        assert!(engine.optimize_binary_labels(bad).is_err());
    }

    #[test]
    fn test_regression() {
        let config = GpHikConfig {
            performs_regression: true,
            ..scenario_config()
        };
        let mut engine =
            HikGpOptimizer::initialize(config, one_dim(&[0.1, 0.5, 0.9])).unwrap();
        engine.optimize(&[0.2, 1.0, 1.8]).unwrap();

        assert!(engine.known_classes().is_empty());
        let mean = engine.regress(&point(0.5)).unwrap();
        assert!(mean > 0.5 && mean < 1.5);
        assert!(engine.classify(&point(0.5)).is_err());
    }

    #[test]
    fn test_grid_search_picks_parameter_within_bounds() {
        let config = GpHikConfig {
            transform: ParameterizedTransform::Power { exponent: 1.0 },
            optimization: OptimizationMethod::Greedy { step_size: 0.5 },
            ..scenario_config()
        };
        let mut engine =
            HikGpOptimizer::initialize(config, one_dim(&[0.1, 0.2, 0.6, 0.9])).unwrap();
        let report = engine.optimize(&[1.0, 1.0, 2.0, 2.0]).unwrap();

        assert_eq!(report.evaluations, 9);
        assert_eq!(report.termination, Termination::GridExhausted);
        let exponent = engine.transform().parameters()[0];
        assert!((1.0..=5.0).contains(&exponent));
        assert_eq!(engine.classify(&point(0.15)).unwrap().class, 1);
        assert_eq!(engine.classify(&point(0.8)).unwrap().class, 2);
    }

    #[test]
    fn test_variance_estimates() {
        let mut engine =
            HikGpOptimizer::initialize(scenario_config(), one_dim(&[0.1, 0.5, 0.9])).unwrap();
        engine.optimize(&[1.0, 1.0, 2.0]).unwrap();

        let query = point(0.4);
        let exact = engine.predictive_variance_exact(&query).unwrap();
        let rough = engine.predictive_variance_rough(&query).unwrap();
        let fine = engine.predictive_variance_fine(&query).unwrap();
        assert!(exact > 0.0 && exact < 0.4);
        assert!(rough >= exact - 1e-10);
        assert!(fine >= exact - 1e-10);
        assert_relative_eq!(
            engine.predictive_variance_dense(VarianceMethod::Exact, &[0.4]).unwrap(),
            exact,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_fine_variance_needs_rank() {
        let config = GpHikConfig {
            variance_rank: 0,
            ..scenario_config()
        };
        let mut engine =
            HikGpOptimizer::initialize(config, one_dim(&[0.1, 0.5, 0.9])).unwrap();
        engine.optimize(&[1.0, 1.0, 2.0]).unwrap();
        assert!(matches!(
            engine.predictive_variance_fine(&point(0.4)),
            Err(GpHikError::VarianceNotPrepared(_))
        ));
        assert!(engine.prepare_variance_approximation_fine().is_err());
        assert!(engine.prepare_variance_approximation_rough().is_ok());
    }
}
