//! Data loading and dataset implementations
//!
//! This module provides the LibSVM sparse text format used for histogram
//! features throughout the crate.

pub mod libsvm;

pub use self::libsvm::*;
