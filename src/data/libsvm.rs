//! Sparse histogram files in LibSVM text format
//!
//! One example per line, `label index:value index:value ...`, with 1-based
//! feature indices. Everything after `#` is ignored. Labels are kept as
//! written: class numbers for classification, real targets for regression.
//!
//! ```text
//! 1 1:0.5 3:1.2 7:0.8
//! 3 2:0.3 5:2.1
//! ```

use crate::core::{Dataset, GpHikError, Result, Sample, SparseVector};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Labeled sparse histograms read from a LibSVM file
#[derive(Debug, Clone)]
pub struct LibSVMDataset {
    samples: Vec<Sample>,
    dimensions: usize,
}

impl LibSVMDataset {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut samples = Vec::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            let record = match line.split_once('#') {
                Some((record, _)) => record,
                None => line.as_str(),
            };
            if record.trim().is_empty() {
                continue;
            }
            let sample = Self::parse_line(record).map_err(|e| {
                GpHikError::ParseError(format!("line {}: {e}", number + 1))
            })?;
            samples.push(sample);
        }
        Self::from_samples(samples)
    }

    /// Build a dataset from samples already in memory
    pub fn from_samples(samples: Vec<Sample>) -> Result<Self> {
        if samples.is_empty() {
            return Err(GpHikError::EmptyDataset);
        }
        let dimensions = samples.iter().map(|s| s.features.dim()).max().unwrap_or(0);
        Ok(Self {
            samples,
            dimensions,
        })
    }

    /// Parse one record. Explicit zeros are dropped; a bin listed twice is an
    /// error.
    fn parse_line(record: &str) -> Result<Sample> {
        let mut fields = record.split_whitespace();
        let label_field = fields
            .next()
            .ok_or_else(|| GpHikError::ParseError("missing label".to_string()))?;
        let label: f64 = label_field
            .parse()
            .map_err(|_| GpHikError::ParseError(format!("invalid label '{label_field}'")))?;

        let mut bins = BTreeMap::new();
        for field in fields {
            let (index, value) = parse_feature(field)?;
            if bins.insert(index, value).is_some() {
                return Err(GpHikError::ParseError(format!(
                    "feature {} listed twice",
                    index + 1
                )));
            }
        }
        bins.retain(|_, value| *value != 0.0);

        let (indices, values) = bins.into_iter().unzip();
        Ok(Sample::new(SparseVector::new(indices, values), label))
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Feature vectors without labels
    pub fn features(&self) -> Vec<SparseVector> {
        self.samples.iter().map(|s| s.features.clone()).collect()
    }
}

/// `index:value` with a 1-based index; returns the 0-based index
fn parse_feature(field: &str) -> Result<(usize, f64)> {
    let invalid = || GpHikError::ParseError(format!("invalid feature '{field}'"));
    let (index, value) = field.split_once(':').ok_or_else(invalid)?;
    let index: usize = index.parse().map_err(|_| invalid())?;
    let value: f64 = value.parse().map_err(|_| invalid())?;
    if index == 0 {
        return Err(GpHikError::ParseError(format!(
            "feature indices start at 1, got '{field}'"
        )));
    }
    if !value.is_finite() {
        return Err(invalid());
    }
    Ok((index - 1, value))
}

impl Dataset for LibSVMDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn dim(&self) -> usize {
        self.dimensions
    }

    fn get_sample(&self, i: usize) -> Sample {
        self.samples[i].clone()
    }

    fn get_labels(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.label).collect()
    }
}
