//! Error types for Dike core operations.
//!
//! This module defines the error types used throughout the `dike-core` crate.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::validation::ValidationErrors;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Dike core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// One or more policy sources could not be loaded.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// A loaded policy failed validation.
    #[error("validating policy {policy}: {source}")]
    Validation {
        /// Name of the offending policy.
        policy: String,
        /// Every validation failure found.
        #[source]
        source: ValidationErrors,
    },

    /// A policy could not be converted to or from its canonical text form.
    #[error("converting policy {policy}: {reason}")]
    Serialization {
        /// Name of the policy, or `<unknown>` when decoding.
        policy: String,
        /// Reason for the failure.
        reason: String,
    },
}

/// A single failure encountered while reading a policy source.
#[derive(Error, Debug)]
pub enum LoadFailure {
    /// The path could not be read.
    #[error("reading {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A document in the file is not well-formed YAML/JSON.
    #[error("parsing {path}: {source}")]
    Parse {
        /// File containing the document.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_yaml::Error,
    },

    /// A document declares a policy kind but does not match the policy shape.
    #[error("decoding policy document {index} in {path}: {reason}")]
    Decode {
        /// File containing the document.
        path: PathBuf,
        /// Zero-based position of the document within the file.
        index: usize,
        /// Reason for the failure.
        reason: String,
    },

    /// A directory walk failed.
    #[error("walking {path}: {source}")]
    Walk {
        /// Root of the walk.
        path: PathBuf,
        /// Underlying walk error.
        #[source]
        source: walkdir::Error,
    },
}

/// Aggregate of every failure encountered while loading policies.
///
/// Loading is all-or-nothing: if this error is returned, no policies are.
#[derive(Debug)]
pub struct LoadError {
    failures: Vec<LoadFailure>,
}

impl LoadError {
    /// Creates a load error from a non-empty list of failures.
    #[must_use]
    pub const fn new(failures: Vec<LoadFailure>) -> Self {
        Self { failures }
    }

    /// Returns the individual failures.
    #[must_use]
    pub fn failures(&self) -> &[LoadFailure] {
        &self.failures
    }

    /// Returns the number of failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Returns true if there are no failures.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for failure in &self.failures {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for LoadError {}
