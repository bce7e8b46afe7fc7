//! Error types for model construction, checkpoint handling and detection filtering.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModelError>;

/// Invalid detector configuration. Raised before any tensor is allocated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("weights `{given}` not available; the available weights are {available:?}")]
    UnknownWeights {
        given: String,
        available: Vec<&'static str>,
    },
    #[error("num_classes must be specified when custom_head_classifier is set or no checkpoint provides it")]
    MissingNumClasses,
    #[error("a custom head does not make sense when training from scratch; disable custom_head_classifier or pick checkpoint weights")]
    CustomHeadWithoutCheckpoint,
    #[error("weights `{weights}` have {checkpoint} classes but num_classes is {requested}; leave it unset or request a custom head")]
    NumClassesMismatch {
        weights: String,
        checkpoint: usize,
        requested: usize,
    },
    #[error("compound coefficient D{0} is out of range (0..=7)")]
    InvalidCompoundCoefficient(usize),
    #[error("checkpoint {0} is neither a directory nor a known weights identifier")]
    UnknownCheckpoint(PathBuf),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("hyper-parameter file {path} is invalid: {source}")]
    HyperParams {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read or write weights at {path}: {msg}")]
    Record { path: PathBuf, msg: String },
    #[error("shape mismatch: {0}")]
    Shape(String),
}
