//! High-level API for GP-HIK classification and regression
//!
//! This module provides a builder over [`HikGpOptimizer`] for the common
//! tasks: training from a dataset or file, classification, predictive
//! variance, incremental updates and evaluation.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use gphik::api::GpHik;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Train a model on histogram data
//! let model = GpHik::new()
//!     .with_noise(0.1)
//!     .with_quantization(100, None)
//!     .train_from_file("train.libsvm")?;
//!
//! // Evaluate on held-out data
//! let metrics = model.evaluate_from_file("test.libsvm")?;
//! println!("Accuracy: {:.2}%", metrics.accuracy() * 100.0);
//! # Ok(())
//! # }
//! ```

use crate::core::{
    Classification, Dataset, GpHikConfig, GpHikError, OptimizationMethod, QuantizationConfig,
    Result, Sample, SparseVector, VarianceMethod,
};
use crate::data::LibSVMDataset;
use crate::kernel::{FeatureStore, ParameterizedTransform};
use crate::optimizer::{HikGpOptimizer, SearchReport};
use crate::utils::validation::{class_from_label, validate_histograms};
use std::collections::BTreeMap;
use std::path::Path;

/// High-level GP-HIK interface with builder pattern
#[derive(Debug, Clone, Default)]
pub struct GpHik {
    config: GpHikConfig,
}

impl GpHik {
    /// Create a classifier with default parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifier without hyperparameter search
    ///
    /// Identity transform and fixed noise; tables are built exactly as for an
    /// optimized model.
    pub fn raw() -> Self {
        Self::new()
            .with_transform(ParameterizedTransform::Identity)
            .with_optimization(OptimizationMethod::None)
    }

    /// Start from a complete configuration
    pub fn with_config(config: GpHikConfig) -> Self {
        Self { config }
    }

    /// Set the noise added to the kernel diagonal
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.config.noise = noise;
        self
    }

    /// Search the noise together with the transform parameters
    pub fn optimize_noise(mut self, lower: f64, upper: f64) -> Self {
        self.config.optimize_noise = true;
        self.config.noise_lower_bound = lower;
        self.config.noise_upper_bound = upper;
        self
    }

    pub fn with_optimization(mut self, method: OptimizationMethod) -> Self {
        self.config.optimization = method;
        self
    }

    pub fn with_transform(mut self, transform: ParameterizedTransform) -> Self {
        self.config.transform = transform;
        self
    }

    /// Bounds for every transform parameter
    pub fn with_parameter_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.config.parameter_lower_bound = lower;
        self.config.parameter_upper_bound = upper;
        self
    }

    /// Enable lookup-table classification with `bins` quantization levels
    pub fn with_quantization(mut self, bins: usize, upper_bound: Option<f64>) -> Self {
        self.config.quantization = Some(QuantizationConfig { bins, upper_bound });
        self
    }

    /// Number of eigenpairs used by the fine variance estimate
    pub fn with_variance_rank(mut self, rank: usize) -> Self {
        self.config.variance_rank = rank;
        self
    }

    /// Refuse incremental updates that introduce a third class
    pub fn strict_binary(mut self) -> Self {
        self.config.strict_binary = true;
        self
    }

    /// Treat labels as real-valued targets
    pub fn regression(mut self) -> Self {
        self.config.performs_regression = true;
        self
    }

    pub fn config(&self) -> &GpHikConfig {
        &self.config
    }

    /// Train on a dataset
    pub fn train<D: Dataset>(self, dataset: &D) -> Result<TrainedModel> {
        let indices: Vec<usize> = (0..dataset.len()).collect();
        self.train_samples(&dataset.get_batch(&indices))
    }

    /// Train on samples
    pub fn train_samples(self, samples: &[Sample]) -> Result<TrainedModel> {
        if samples.is_empty() {
            return Err(GpHikError::EmptyDataset);
        }
        validate_histograms(samples)?;
        let store = FeatureStore::from_samples(samples)?;
        let labels: Vec<f64> = samples.iter().map(|s| s.label).collect();
        let mut model = HikGpOptimizer::initialize(self.config, store)?;
        let report = model.optimize(&labels)?;
        Ok(TrainedModel {
            model,
            report: Some(report),
        })
    }

    /// Train from LibSVM format file
    pub fn train_from_file<P: AsRef<Path>>(self, path: P) -> Result<TrainedModel> {
        let dataset = LibSVMDataset::from_file(path)?;
        self.train(&dataset)
    }
}

/// Trained GP-HIK model with high-level prediction interface
#[derive(Debug, Clone)]
pub struct TrainedModel {
    model: HikGpOptimizer,
    report: Option<SearchReport>,
}

impl TrainedModel {
    /// Wrap an engine that has already been trained
    pub fn from_optimizer(model: HikGpOptimizer) -> Result<Self> {
        if !model.is_trained() {
            return Err(GpHikError::ModelNotTrained);
        }
        Ok(Self {
            model,
            report: None,
        })
    }

    /// Classify a single example
    pub fn classify(&self, features: &SparseVector) -> Result<Classification> {
        self.model.classify(features)
    }

    /// Classify multiple examples
    pub fn classify_batch(&self, features: &[SparseVector]) -> Result<Vec<Classification>> {
        self.model.classify_batch(features)
    }

    /// Classify every sample of a dataset
    pub fn classify_dataset<D: Dataset>(&self, dataset: &D) -> Result<Vec<Classification>> {
        (0..dataset.len())
            .map(|i| self.classify(&dataset.get_sample(i).features))
            .collect()
    }

    /// Classify from LibSVM file; labels in the file are ignored
    pub fn classify_from_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<Classification>> {
        let dataset = LibSVMDataset::from_file(path)?;
        self.classify_dataset(&dataset)
    }

    /// Predictive mean of a regression model
    pub fn regress(&self, features: &SparseVector) -> Result<f64> {
        self.model.regress(features)
    }

    /// Predictive variance with the chosen estimator
    pub fn variance(&self, method: VarianceMethod, features: &SparseVector) -> Result<f64> {
        self.model.predictive_variance(method, features)
    }

    /// Add labeled samples, optionally re-running the parameter search
    pub fn add_samples(&mut self, samples: &[Sample], reoptimize: bool) -> Result<()> {
        let features: Vec<SparseVector> = samples.iter().map(|s| s.features.clone()).collect();
        let labels: Vec<f64> = samples.iter().map(|s| s.label).collect();
        self.model
            .add_multiple_examples(&features, &labels, reoptimize)
    }

    /// Add every sample of a dataset
    pub fn add_dataset<D: Dataset>(&mut self, dataset: &D, reoptimize: bool) -> Result<()> {
        let samples: Vec<Sample> = (0..dataset.len()).map(|i| dataset.get_sample(i)).collect();
        self.add_samples(&samples, reoptimize)
    }

    /// Accuracy and per-class counts on a labeled dataset
    pub fn evaluate<D: Dataset>(&self, dataset: &D) -> Result<EvaluationMetrics> {
        let predictions = self.classify_dataset(dataset)?;
        let mut metrics = EvaluationMetrics::default();
        for (prediction, label) in predictions.iter().zip(dataset.get_labels()) {
            metrics.record(class_from_label(label)?, prediction.class);
        }
        Ok(metrics)
    }

    /// Evaluate from LibSVM file
    pub fn evaluate_from_file<P: AsRef<Path>>(&self, path: P) -> Result<EvaluationMetrics> {
        let dataset = LibSVMDataset::from_file(path)?;
        self.evaluate(&dataset)
    }

    /// Mean squared error of a regression model on a dataset
    pub fn mean_squared_error<D: Dataset>(&self, dataset: &D) -> Result<f64> {
        if dataset.is_empty() {
            return Err(GpHikError::EmptyDataset);
        }
        let mut total = 0.0;
        for i in 0..dataset.len() {
            let sample = dataset.get_sample(i);
            let error = self.regress(&sample.features)? - sample.label;
            total += error * error;
        }
        Ok(total / dataset.len() as f64)
    }

    /// Get model information
    pub fn info(&self) -> ModelInfo {
        let model = &self.model;
        ModelInfo {
            n_examples: model.n_examples(),
            n_dims: model.feature_store().map_or(0, FeatureStore::n_dims),
            classes: model.known_classes().iter().copied().collect(),
            binary: model.binary_classes().is_some(),
            regression: model.performs_regression(),
            transform: model.transform().name().to_string(),
            parameters: model.transform().parameters(),
            noise: model.noise(),
            quantization_bins: model.quantizer().map(|q| q.bins()),
            largest_eigenvalue: model.eigen_approximation().largest(),
        }
    }

    /// Outcome of the parameter search, if this model was trained in this process
    pub fn search_report(&self) -> Option<&SearchReport> {
        self.report.as_ref()
    }

    /// Get the underlying engine
    pub fn inner(&self) -> &HikGpOptimizer {
        &self.model
    }

    pub fn into_inner(self) -> HikGpOptimizer {
        self.model
    }
}

/// Prediction counts of one class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassCounts {
    /// Examples whose true class is this one
    pub support: usize,
    /// Examples predicted as this class
    pub predicted: usize,
    /// Examples of this class predicted correctly
    pub correct: usize,
}

/// Detailed evaluation metrics
#[derive(Debug, Clone, Default)]
pub struct EvaluationMetrics {
    pub total: usize,
    pub correct: usize,
    pub per_class: BTreeMap<u32, ClassCounts>,
}

impl EvaluationMetrics {
    fn record(&mut self, actual: u32, predicted: u32) {
        self.total += 1;
        self.per_class.entry(actual).or_default().support += 1;
        self.per_class.entry(predicted).or_default().predicted += 1;
        if actual == predicted {
            self.correct += 1;
            self.per_class.entry(actual).or_default().correct += 1;
        }
    }

    /// Fraction of correctly classified examples
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    /// correct / predicted for one class
    pub fn precision(&self, class: u32) -> f64 {
        match self.per_class.get(&class) {
            Some(c) if c.predicted > 0 => c.correct as f64 / c.predicted as f64,
            _ => 0.0,
        }
    }

    /// correct / support for one class
    pub fn recall(&self, class: u32) -> f64 {
        match self.per_class.get(&class) {
            Some(c) if c.support > 0 => c.correct as f64 / c.support as f64,
            _ => 0.0,
        }
    }

    /// Unweighted mean of the per-class recalls
    pub fn average_recall(&self) -> f64 {
        let supported: Vec<u32> = self
            .per_class
            .iter()
            .filter(|(_, c)| c.support > 0)
            .map(|(&class, _)| class)
            .collect();
        if supported.is_empty() {
            return 0.0;
        }
        supported.iter().map(|&c| self.recall(c)).sum::<f64>() / supported.len() as f64
    }
}

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub n_examples: usize,
    pub n_dims: usize,
    pub classes: Vec<u32>,
    pub binary: bool,
    pub regression: bool,
    pub transform: String,
    pub parameters: Vec<f64>,
    pub noise: f64,
    pub quantization_bins: Option<usize>,
    pub largest_eigenvalue: Option<f64>,
}

/// Convenience functions for quick operations
pub mod quick {
    use super::*;

    /// Train with default parameters on LibSVM data
    pub fn train_libsvm<P: AsRef<Path>>(path: P) -> Result<TrainedModel> {
        GpHik::new().train_from_file(path)
    }

    /// Train with fixed noise and no parameter search
    pub fn train_libsvm_raw<P: AsRef<Path>>(path: P, noise: f64) -> Result<TrainedModel> {
        GpHik::raw().with_noise(noise).train_from_file(path)
    }

    /// Quick evaluation: train on training file, test on test file
    pub fn evaluate_split<P1: AsRef<Path>, P2: AsRef<Path>>(
        train_path: P1,
        test_path: P2,
    ) -> Result<f64> {
        let model = train_libsvm(train_path)?;
        Ok(model.evaluate_from_file(test_path)?.accuracy())
    }

    /// Sequential split validation (not randomized for reproducibility)
    pub fn simple_validation<D: Dataset>(
        dataset: &D,
        train_ratio: f64,
        builder: GpHik,
    ) -> Result<f64> {
        if train_ratio <= 0.0 || train_ratio >= 1.0 {
            return Err(GpHikError::InvalidConfiguration(format!(
                "Train ratio must be between 0 and 1, got: {train_ratio}"
            )));
        }

        let n = dataset.len();
        let train_size = (n as f64 * train_ratio) as usize;
        if train_size == 0 || train_size == n {
            return Err(GpHikError::InvalidDataset(format!(
                "split of {n} samples at ratio {train_ratio} leaves one side empty"
            )));
        }

        let train_samples: Vec<Sample> = (0..train_size).map(|i| dataset.get_sample(i)).collect();
        let test_samples: Vec<Sample> = (train_size..n).map(|i| dataset.get_sample(i)).collect();

        let model = builder.train_samples(&train_samples)?;
        let test = LibSVMDataset::from_samples(test_samples)?;
        Ok(model.evaluate(&test)?.accuracy())
    }
}
