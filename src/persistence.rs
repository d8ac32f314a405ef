//! Model serialization and persistence
//!
//! A trained model is stored as JSON: the complete engine state (feature
//! store, optimized transform, weights, tables and variance tables) plus a
//! small metadata block. A restored model classifies exactly like the saved
//! one and accepts further incremental updates.

use crate::api::TrainedModel;
use crate::core::{GpHikError, Result};
use crate::optimizer::HikGpOptimizer;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Serializable representation of a trained model
#[derive(Serialize, Deserialize)]
pub struct SerializableModel {
    /// Model metadata
    pub metadata: ModelMetadata,
    /// Engine state
    pub model: HikGpOptimizer,
}

/// Model metadata for tracking and validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Library version used to create the model
    pub library_version: String,
    /// Known class ids (empty for regression)
    pub classes: Vec<u32>,
    pub n_examples: usize,
    pub regression: bool,
    /// Transform name and its optimized parameters
    pub transform: String,
    pub parameters: Vec<f64>,
    pub noise: f64,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
}

impl SerializableModel {
    /// Create a serializable model from a trained model
    pub fn from_trained_model(model: &TrainedModel) -> Self {
        let info = model.info();
        Self {
            metadata: ModelMetadata {
                library_version: env!("CARGO_PKG_VERSION").to_string(),
                classes: info.classes,
                n_examples: info.n_examples,
                regression: info.regression,
                transform: info.transform,
                parameters: info.parameters,
                noise: info.noise,
                created_at: chrono::Utc::now().to_rfc3339(),
            },
            model: model.inner().clone(),
        }
    }

    /// Save model to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path).map_err(GpHikError::IoError)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer(writer, self)
            .map_err(|e| GpHikError::SerializationError(e.to_string()))?;
        Ok(())
    }

    /// Load model from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path).map_err(GpHikError::IoError)?;
        let reader = BufReader::new(file);
        let model: Self = serde_json::from_reader(reader)
            .map_err(|e| GpHikError::SerializationError(e.to_string()))?;
        model.check_version();
        Ok(model)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| GpHikError::SerializationError(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let model: Self = serde_json::from_str(json)
            .map_err(|e| GpHikError::SerializationError(e.to_string()))?;
        model.check_version();
        Ok(model)
    }

    fn check_version(&self) {
        let current = env!("CARGO_PKG_VERSION");
        if self.metadata.library_version != current {
            warn!(
                "model was written by gphik {}, reading with {current}",
                self.metadata.library_version
            );
        }
    }

    /// Convert back to a trained model
    pub fn to_trained_model(&self) -> Result<TrainedModel> {
        TrainedModel::from_optimizer(self.model.clone())
    }

    /// Consume the stored form without copying the engine
    pub fn into_trained_model(self) -> Result<TrainedModel> {
        TrainedModel::from_optimizer(self.model)
    }

    /// Print model summary
    pub fn print_summary(&self) {
        let metadata = &self.metadata;
        println!("=== GP-HIK Model Summary ===");
        if metadata.regression {
            println!("Task: regression");
        } else {
            let classes: Vec<String> = metadata.classes.iter().map(u32::to_string).collect();
            println!("Task: classification");
            println!("Classes: {}", classes.join(", "));
        }
        println!("Training Examples: {}", metadata.n_examples);
        println!("Transform: {} {:?}", metadata.transform, metadata.parameters);
        println!("Noise: {:.6e}", metadata.noise);
        if let Some(q) = self.model.quantizer() {
            println!("Quantization: {} bins over [0, {}]", q.bins(), q.upper());
        }
        if let Some(lambda) = self.model.eigen_approximation().largest() {
            println!("Largest Eigenvalue: {lambda:.6}");
        }
        println!("Library Version: {}", metadata.library_version);
        println!("Created: {}", metadata.created_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::GpHik;
    use crate::core::{Sample, SparseVector, VarianceMethod};
    use tempfile::NamedTempFile;

    fn trained() -> TrainedModel {
        let samples: Vec<Sample> = [(0.1, 1.0), (0.5, 1.0), (0.9, 2.0), (0.3, 3.0)]
            .iter()
            .map(|&(x, y)| Sample::new(SparseVector::new(vec![0, 1], vec![x, 1.0 - x]), y))
            .collect();
        GpHik::raw()
            .with_noise(0.1)
            .with_quantization(20, None)
            .train_samples(&samples)
            .unwrap()
    }

    #[test]
    fn test_model_serialization() -> Result<()> {
        let model = trained();
        let serializable = SerializableModel::from_trained_model(&model);
        assert_eq!(serializable.metadata.classes, vec![1, 2, 3]);
        assert_eq!(serializable.metadata.n_examples, 4);
        assert!(chrono::DateTime::parse_from_rfc3339(&serializable.metadata.created_at).is_ok());

        // Test saving and loading
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        serializable.save_to_file(temp_file.path())?;
        let restored = SerializableModel::load_from_file(temp_file.path())?.into_trained_model()?;

        for x in [0.05, 0.35, 0.6, 0.95] {
            let query = SparseVector::new(vec![0, 1], vec![x, 1.0 - x]);
            let before = model.classify(&query)?;
            let after = restored.classify(&query)?;
            assert_eq!(before.class, after.class);
            for (class, score) in &before.scores {
                assert!((score - after.scores[class]).abs() < 1e-9);
            }
            let v1 = model.variance(VarianceMethod::Fine, &query)?;
            let v2 = restored.variance(VarianceMethod::Fine, &query)?;
            assert!((v1 - v2).abs() < 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_restored_model_accepts_updates() -> Result<()> {
        let json = SerializableModel::from_trained_model(&trained()).to_json()?;
        let mut restored = SerializableModel::from_json(&json)?.to_trained_model()?;
        let extra = Sample::new(SparseVector::new(vec![0, 1], vec![0.7, 0.3]), 4.0);
        restored.add_samples(&[extra], false)?;
        assert_eq!(restored.info().classes, vec![1, 2, 3, 4]);
        assert_eq!(restored.info().n_examples, 5);
        Ok(())
    }

    #[test]
    fn test_load_errors() {
        assert!(matches!(
            SerializableModel::load_from_file("/non/existent/model.json"),
            Err(GpHikError::IoError(_))
        ));
        assert!(matches!(
            SerializableModel::from_json("{\"metadata\": 3}"),
            Err(GpHikError::SerializationError(_))
        ));
    }
}
