use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid annotation {path}: {source}")]
    Annotation {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("anchor state must be -1, 0 or 1, got {0}")]
    InvalidAnchorState(f32),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Model(#[from] models::ModelError),
}
