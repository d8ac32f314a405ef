//! Adding labeled examples to a trained model
//!
//! New examples are inserted into a copy of the feature store and every label
//! vector grows by one entry per example. The model is then re-solved, either
//! at the current parameters or after a fresh parameter search, and all tables
//! are rebuilt. Any validation failure leaves the model untouched.

use super::{HikGpOptimizer, LabelSet};
use crate::core::{GpHikError, OptimizationMethod, Result, SparseVector};
use crate::utils::validation::class_from_label;
use log::info;

impl HikGpOptimizer {
    /// Add one example; see [`add_multiple_examples`](Self::add_multiple_examples)
    pub fn add_example(
        &mut self,
        example: &SparseVector,
        label: f64,
        reoptimize: bool,
    ) -> Result<()> {
        self.add_multiple_examples(std::slice::from_ref(example), &[label], reoptimize)
    }

    /// Add examples with their labels (class numbers, or targets in regression)
    ///
    /// An unseen class gets a new one-vs-rest label vector, −1 for every older
    /// example. A binary model that meets a third class becomes one-vs-rest,
    /// unless `strict_binary` is configured, which rejects the update.
    /// With `reoptimize` the parameter search runs again, warm-started from the
    /// previous weights; otherwise parameters stay fixed.
    pub fn add_multiple_examples(
        &mut self,
        examples: &[SparseVector],
        labels: &[f64],
        reoptimize: bool,
    ) -> Result<()> {
        if !self.trained {
            return Err(GpHikError::ModelNotTrained);
        }
        if examples.len() != labels.len() {
            return Err(GpHikError::InvalidDataset(format!(
                "{} examples with {} labels",
                examples.len(),
                labels.len()
            )));
        }
        if examples.is_empty() {
            return Ok(());
        }

        let mut store = self.require_store()?.clone();
        let mut vectors = self.labels.clone();
        let mut binary = self.binary;
        let mut known = self.known_classes.clone();
        let mut warm = self.warm_start();

        for (example, &label) in examples.iter().zip(labels) {
            if self.config.performs_regression {
                if !label.is_finite() {
                    return Err(GpHikError::InvalidLabel(label));
                }
                vectors.entry(0).or_default().push(label);
            } else {
                let class = class_from_label(label)?;
                if !known.contains(&class) {
                    if let Some(pair) = binary {
                        if self.config.strict_binary {
                            return Err(GpHikError::InvalidState(format!(
                                "class {class} would turn the binary model ({} vs {}) into a multi-class one",
                                pair.positive, pair.negative
                            )));
                        }
                        let negated: Vec<f64> = vectors
                            .get(&pair.positive)
                            .map(|y| y.iter().map(|v| -v).collect())
                            .unwrap_or_default();
                        vectors.insert(pair.negative, negated);
                        if let Some(alpha) = warm.get(&pair.positive) {
                            let negated_alpha = alpha.iter().map(|a| -a).collect();
                            warm.insert(pair.negative, negated_alpha);
                        }
                        binary = None;
                        info!(
                            "class {class} turns the binary model into one-vs-rest over {} classes",
                            known.len() + 1
                        );
                    }
                    vectors.insert(class, vec![-1.0; store.n_examples()]);
                    known.insert(class);
                }
                for (&c, y) in vectors.iter_mut() {
                    y.push(if c == class { 1.0 } else { -1.0 });
                }
            }
            store.insert(example, &self.transform)?;
        }

        let method = if reoptimize {
            self.config.optimization
        } else {
            OptimizationMethod::None
        };
        info!(
            "adding {} examples ({} total), {}",
            examples.len(),
            store.n_examples(),
            if reoptimize {
                "re-optimizing parameters"
            } else {
                "keeping parameters"
            }
        );
        let label_set = LabelSet {
            vectors,
            binary,
            known,
        };
        self.train(store, label_set, warm, method)?;
        Ok(())
    }
}
