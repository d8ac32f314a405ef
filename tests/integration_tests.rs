//! Integration tests for the gphik library
//!
//! These tests verify end-to-end functionality across multiple modules
//! and validate real-world usage scenarios.

use approx::assert_relative_eq;
use gphik::api::GpHik;
use gphik::core::{
    GpHikConfig, OptimizationMethod, QuantizationConfig, Sample, SparseVector, VarianceMethod,
};
use gphik::kernel::{FeatureStore, ParameterizedTransform};
use gphik::optimizer::{FineVariance, HikGpOptimizer, Termination};
use gphik::persistence::SerializableModel;
use gphik::{Dataset, LibSVMDataset};
use std::io::Write;
use tempfile::NamedTempFile;

fn point(x: f64) -> SparseVector {
    SparseVector::new(vec![0], vec![x])
}

fn one_dim(values: &[f64]) -> FeatureStore {
    let examples: Vec<SparseVector> = values.iter().map(|&v| point(v)).collect();
    FeatureStore::from_examples(&examples).expect("valid features")
}

fn scenario_config() -> GpHikConfig {
    GpHikConfig {
        noise: 0.1,
        transform: ParameterizedTransform::Identity,
        optimization: OptimizationMethod::Greedy { step_size: 1.0 },
        ..GpHikConfig::default()
    }
}

/// Three classes, each concentrating its mass in one bin
fn three_class_samples() -> Vec<Sample> {
    let rows = [
        ([0.7, 0.2, 0.1], 1.0),
        ([0.2, 0.7, 0.1], 2.0),
        ([0.1, 0.2, 0.7], 3.0),
        ([0.6, 0.3, 0.1], 1.0),
        ([0.1, 0.8, 0.1], 2.0),
        ([0.1, 0.1, 0.8], 3.0),
        ([0.8, 0.1, 0.1], 1.0),
        ([0.3, 0.6, 0.1], 2.0),
        ([0.2, 0.2, 0.6], 3.0),
    ];
    rows.iter()
        .map(|(x, y)| Sample::new(SparseVector::from_dense(x), *y))
        .collect()
}

fn write_libsvm(samples: &[Sample]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    for sample in samples {
        let features: Vec<String> = sample
            .features
            .iter()
            .map(|(i, v)| format!("{}:{}", i + 1, v))
            .collect();
        writeln!(file, "{} {}", sample.label, features.join(" ")).expect("Failed to write");
    }
    file.flush().expect("Failed to flush");
    file
}

/// Two classes, values {0.1, 0.5, 0.9} labeled {1, 1, 2}
#[test]
fn test_binary_scenario() {
    let mut engine = HikGpOptimizer::initialize(scenario_config(), one_dim(&[0.1, 0.5, 0.9]))
        .expect("valid configuration");
    engine.optimize(&[1.0, 1.0, 2.0]).expect("training succeeds");

    let result = engine.classify(&point(0.4)).expect("trained model");
    assert_eq!(result.class, 1);
    let s1 = result.score(1).unwrap();
    let s2 = result.score(2).unwrap();
    assert!(s1.is_finite() && s2.is_finite());
    assert!(s1 != s2);
    assert_relative_eq!(s2, -0.609375, epsilon = 1e-8);
}

/// A third class label turns the binary model into a three-class one
#[test]
fn test_third_class_added_incrementally() {
    let mut engine = HikGpOptimizer::initialize(scenario_config(), one_dim(&[0.1, 0.5, 0.9]))
        .expect("valid configuration");
    engine.optimize(&[1.0, 1.0, 2.0]).expect("training succeeds");
    engine
        .add_example(&point(0.3), 3.0, false)
        .expect("update succeeds");

    let known: Vec<u32> = engine.known_classes().iter().copied().collect();
    assert_eq!(known, vec![1, 2, 3]);

    let result = engine.classify(&point(0.3)).expect("trained model");
    assert_eq!(result.class, 3);
    assert_relative_eq!(result.score(1).unwrap(), -0.322, epsilon = 1e-3);
    assert_relative_eq!(result.score(2).unwrap(), -0.819, epsilon = 1e-3);
    assert_relative_eq!(result.score(3).unwrap(), 0.255, epsilon = 1e-3);
}

/// The returned class always carries the maximal score, ties going to the lowest id
#[test]
fn test_classify_returns_best_scoring_class() {
    let model = GpHik::new()
        .with_noise(0.1)
        .train_samples(&three_class_samples())
        .expect("training succeeds");

    for i in 0..=10 {
        for j in 0..=(10 - i) {
            let a = i as f64 / 10.0;
            let b = j as f64 / 10.0;
            let query = SparseVector::from_dense(&[a, b, 1.0 - a - b]);
            let result = model.classify(&query).expect("valid query");
            let best = result
                .scores
                .values()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max);
            assert_eq!(result.best_score(), best);
            let first_best = result
                .scores
                .iter()
                .find(|(_, &s)| s == best)
                .map(|(&c, _)| c)
                .unwrap();
            assert_eq!(result.class, first_best);
        }
    }
}

/// Complete workflow: data loading -> training -> evaluation
#[test]
fn test_complete_workflow_libsvm() {
    let samples = three_class_samples();
    let file = write_libsvm(&samples);

    let model = GpHik::new()
        .with_noise(0.1)
        .with_transform(ParameterizedTransform::Power { exponent: 1.0 })
        .with_optimization(OptimizationMethod::Greedy { step_size: 1.0 })
        .train_from_file(file.path())
        .expect("Training should succeed");

    let report = model.search_report().expect("fresh model has a report");
    assert_eq!(report.evaluations, 5);
    assert_eq!(report.termination, Termination::GridExhausted);

    let info = model.info();
    assert_eq!(info.classes, vec![1, 2, 3]);
    assert!(!info.binary);
    assert_eq!(info.n_dims, 3);
    assert!((1.0..=5.0).contains(&info.parameters[0]));

    let metrics = model
        .evaluate_from_file(file.path())
        .expect("Evaluation should succeed");
    assert_eq!(metrics.accuracy(), 1.0);
    for class in 1..=3 {
        assert_eq!(metrics.per_class[&class].support, 3);
        assert_eq!(metrics.recall(class), 1.0);
    }

    let dataset = LibSVMDataset::from_file(file.path()).expect("Failed to load dataset");
    assert_eq!(dataset.len(), 9);
}

/// Downhill simplex over exponent and noise stays inside the bounds
#[test]
fn test_simplex_search_with_noise() {
    let model = GpHik::new()
        .with_noise(0.1)
        .with_transform(ParameterizedTransform::Power { exponent: 2.0 })
        .with_optimization(OptimizationMethod::DownhillSimplex {
            max_iterations: 25,
            time_limit_secs: 30.0,
            parameter_tolerance: 1e-3,
        })
        .optimize_noise(1e-3, 1.0)
        .train_samples(&three_class_samples())
        .expect("training succeeds");

    let report = model.search_report().unwrap();
    assert!(matches!(
        report.termination,
        Termination::Converged | Termination::MaxIterations | Termination::TimeLimit
    ));
    assert!(report.value.is_finite());

    let info = model.info();
    assert!((1.0..=5.0).contains(&info.parameters[0]));
    assert!((1e-3..=1.0).contains(&info.noise));
    let query = SparseVector::from_dense(&[0.1, 0.75, 0.15]);
    assert_eq!(model.classify(&query).unwrap().class, 2);
}

/// Store then restore gives the same scores on held-out queries
#[test]
fn test_persistence_round_trip() {
    let model = GpHik::new()
        .with_noise(0.1)
        .with_quantization(32, Some(1.0))
        .with_variance_rank(3)
        .train_samples(&three_class_samples())
        .expect("training succeeds");

    let file = NamedTempFile::new().expect("Failed to create temp file");
    SerializableModel::from_trained_model(&model)
        .save_to_file(file.path())
        .expect("save succeeds");
    let restored = SerializableModel::load_from_file(file.path())
        .and_then(SerializableModel::into_trained_model)
        .expect("load succeeds");

    assert_eq!(restored.inner().quantizer(), model.inner().quantizer());
    assert_eq!(restored.inner().known_classes(), model.inner().known_classes());

    let queries = [
        [0.5, 0.25, 0.25],
        [0.05, 0.9, 0.05],
        [0.33, 0.33, 0.34],
        [0.0, 0.4, 0.6],
    ];
    for q in &queries {
        let query = SparseVector::from_dense(q);
        let before = model.classify(&query).unwrap();
        let after = restored.classify(&query).unwrap();
        assert_eq!(before.class, after.class);
        for (class, score) in &before.scores {
            assert!((score - after.scores[class]).abs() < 1e-9);
        }
        for method in [VarianceMethod::Rough, VarianceMethod::Fine] {
            let v1 = model.variance(method, &query).unwrap();
            let v2 = restored.variance(method, &query).unwrap();
            assert!((v1 - v2).abs() < 1e-9);
        }
    }
}

/// Adding an example matches rebuilding that class from scratch
#[test]
fn test_incremental_equivalence() {
    let config = GpHikConfig {
        noise: 0.1,
        optimization: OptimizationMethod::None,
        quantization: Some(QuantizationConfig {
            bins: 16,
            upper_bound: Some(1.0),
        }),
        ..GpHikConfig::default()
    };
    let samples = three_class_samples();
    let extra = Sample::new(SparseVector::from_dense(&[0.5, 0.4, 0.1]), 1.0);

    let store = FeatureStore::from_samples(&samples).unwrap();
    let labels: Vec<f64> = samples.iter().map(|s| s.label).collect();
    let mut incremental = HikGpOptimizer::initialize(config.clone(), store).unwrap();
    incremental.optimize(&labels).unwrap();
    incremental
        .add_example(&extra.features, extra.label, false)
        .unwrap();

    let mut all = samples.clone();
    all.push(extra);
    let store = FeatureStore::from_samples(&all).unwrap();
    let labels: Vec<f64> = all.iter().map(|s| s.label).collect();
    let mut scratch = HikGpOptimizer::initialize(config, store).unwrap();
    scratch.optimize(&labels).unwrap();

    assert_eq!(incremental.label_vectors(), scratch.label_vectors());
    for class in [1, 2, 3] {
        let a = &incremental.class_tables()[&class];
        let b = &scratch.class_tables()[&class];
        assert!(a.sums.max_abs_diff(&b.sums) < 1e-7);
        let (lut_a, lut_b) = (a.lut.as_ref().unwrap(), b.lut.as_ref().unwrap());
        assert_eq!(lut_a.len(), lut_b.len());
        for (x, y) in lut_a.iter().zip(lut_b) {
            assert!((x - y).abs() < 1e-7);
        }
    }
}

/// Lookup-table scores approach the exact scores as bins are added
#[test]
fn test_quantization_error_shrinks_with_bins() {
    let values = [0.05, 0.2, 0.35, 0.5, 0.65, 0.8, 0.95];
    let labels = [1.0, 1.0, 2.0, 1.0, 2.0, 2.0, 1.0];
    let queries: Vec<f64> = (0..=200).map(|i| i as f64 / 200.0).collect();

    let mut errors = Vec::new();
    for bins in [3, 9, 33, 129] {
        let config = GpHikConfig {
            quantization: Some(QuantizationConfig {
                bins,
                upper_bound: Some(1.0),
            }),
            ..scenario_config()
        };
        let mut engine = HikGpOptimizer::initialize(config, one_dim(&values)).unwrap();
        engine.optimize(&labels).unwrap();

        let alpha = &engine.alphas()[&2];
        let lipschitz: f64 = alpha.iter().map(|a| a.abs()).sum();
        let step = 1.0 / (bins - 1) as f64;

        let mut worst: f64 = 0.0;
        for &q in &queries {
            let fast = engine.classify(&point(q)).unwrap().score(2).unwrap();
            let exact = engine.classify_exact(&point(q)).unwrap().score(2).unwrap();
            worst = worst.max((fast - exact).abs());
        }
        assert!(worst <= lipschitz * step / 2.0 + 1e-12);
        errors.push(worst);
    }

    for pair in errors.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-12, "errors {errors:?}");
    }
    assert!(errors[3] < errors[0]);
}

/// More eigenpairs never move the fine estimate away from the exact variance
#[test]
fn test_fine_variance_converges_with_rank() {
    let samples = three_class_samples();
    let query = SparseVector::from_dense(&[0.4, 0.35, 0.25]);

    let model = GpHik::raw()
        .with_noise(0.1)
        .with_variance_rank(samples.len())
        .train_samples(&samples)
        .unwrap();
    let engine = model.inner();
    let store = engine.feature_store().unwrap();
    let exact = model.variance(VarianceMethod::Exact, &query).unwrap();
    let rough = model.variance(VarianceMethod::Rough, &query).unwrap();
    assert!(exact > 0.0);
    assert!(rough >= exact - 1e-8);

    let mut errors = Vec::new();
    for rank in 1..=samples.len() {
        let fine = FineVariance::prepare(
            store,
            engine.transform(),
            engine.eigen_approximation(),
            rank,
            None,
        )
        .unwrap()
        .estimate(store, engine.transform(), None, &query);
        assert!(fine >= exact - 1e-8);
        errors.push(fine - exact);
    }

    for pair in errors.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-12, "errors {errors:?}");
    }
    assert!(errors.last().unwrap().abs() < 1e-6);
    assert_relative_eq!(
        model.variance(VarianceMethod::Fine, &query).unwrap(),
        exact,
        epsilon = 1e-6
    );
}

/// Dense and sparse queries agree
#[test]
fn test_dense_queries() {
    let model = GpHik::new()
        .with_noise(0.1)
        .train_samples(&three_class_samples())
        .unwrap();
    let engine = model.inner();
    let dense = [0.2, 0.0, 0.7];
    let sparse = SparseVector::from_dense(&dense);

    assert_eq!(
        engine.classify_dense(&dense).unwrap(),
        engine.classify(&sparse).unwrap()
    );
    assert_eq!(
        engine
            .predictive_variance_dense(VarianceMethod::Fine, &dense)
            .unwrap(),
        engine.predictive_variance_fine(&sparse).unwrap()
    );
}

/// Updates to a restored model work without re-optimizing
#[test]
fn test_restored_model_grows() {
    let model = GpHik::new()
        .with_noise(0.1)
        .train_samples(&three_class_samples()[..6])
        .unwrap();
    let json = SerializableModel::from_trained_model(&model).to_json().unwrap();
    let mut restored = SerializableModel::from_json(&json)
        .and_then(SerializableModel::into_trained_model)
        .unwrap();

    restored
        .add_samples(&three_class_samples()[6..], false)
        .unwrap();
    assert_eq!(restored.info().n_examples, 9);
    let query = SparseVector::from_dense(&[0.15, 0.15, 0.7]);
    assert_eq!(restored.classify(&query).unwrap().class, 3);
}

/// Data errors abort the call and keep the model usable
#[test]
fn test_error_paths() {
    let mut model = GpHik::new()
        .with_noise(0.1)
        .strict_binary()
        .train_samples(&three_class_samples()[..6])
        .unwrap();

    let too_wide = SparseVector::new(vec![5], vec![0.3]);
    assert!(model.classify(&too_wide).is_err());

    let bad = Sample::new(SparseVector::from_dense(&[0.2, -0.1, 0.9]), 1.0);
    assert!(model.add_samples(&[bad], false).is_err());
    assert_eq!(model.info().n_examples, 6);

    // strict binary only guards binary models
    let extra = Sample::new(SparseVector::from_dense(&[0.5, 0.5, 0.0]), 4.0);
    assert!(model.add_samples(&[extra], false).is_ok());
    assert_eq!(model.info().classes, vec![1, 2, 3, 4]);
}
