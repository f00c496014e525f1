//! Error types for the filtering pipeline.
//!
//! Data-quality outcomes are not errors; they live on [`crate::sample::Validity`].
//! Only setup problems and malformed input surface here.

use chrono::NaiveDateTime;
use thiserror::Error;

/// A configured device or rule cannot be used with the data at hand.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("{role} tag '{tag}' is not present in the input columns")]
    MissingTag { role: String, tag: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The sample stream violates the ordering the wind-stow detector relies on.
#[derive(Debug, Error, PartialEq)]
pub enum StreamError {
    #[error("duplicate timestamp {0} in sample stream")]
    DuplicateTimestamp(NaiveDateTime),

    #[error("sample stream out of order: {current} follows {previous}")]
    OutOfOrder {
        previous: NaiveDateTime,
        current: NaiveDateTime,
    },
}

/// The raw SCADA table could not be turned into samples.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("input has no header row")]
    MissingHeader,

    #[error("line {line}: unrecognised timestamp '{value}'")]
    Timestamp { line: u64, value: String },

    #[error("line {line}: column '{column}' holds non-numeric value '{value}'")]
    Numeric {
        line: u64,
        column: String,
        value: String,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
