//! Local checkpoint directories: `hp.json` hyper-parameters plus `model.bin` weights.

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ModelError, Result};

pub const HYPER_PARAMS_FILE: &str = "hp.json";
/// Stem of the weights file; the recorder appends `.bin`.
pub const WEIGHTS_STEM: &str = "model";

/// Identifiers accepted for the `weights` option. `None` means random init.
pub const AVAILABLE_WEIGHTS: [&str; 2] = ["imagenet", "D0-VOC"];

/// What the `weights` option resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightsSpec {
    /// Everything randomly initialized.
    Scratch,
    /// Backbone initialized from ImageNet classification weights, rest random.
    ImageNet,
    /// A full detector checkpoint known by name.
    Pretrained(String),
}

impl WeightsSpec {
    pub fn parse(weights: Option<&str>) -> std::result::Result<Self, ConfigError> {
        match weights {
            None => Ok(Self::Scratch),
            Some("imagenet") => Ok(Self::ImageNet),
            Some(id) if AVAILABLE_WEIGHTS.contains(&id) => Ok(Self::Pretrained(id.to_string())),
            Some(other) => Err(ConfigError::UnknownWeights {
                given: other.to_string(),
                available: AVAILABLE_WEIGHTS.to_vec(),
            }),
        }
    }

    /// Training from scratch, as far as the detector heads are concerned.
    pub fn is_from_scratch(&self) -> bool {
        matches!(self, Self::Scratch | Self::ImageNet)
    }

    /// Directory of a named checkpoint under `weights_root`.
    pub fn checkpoint_dir(&self, weights_root: &Path) -> Option<PathBuf> {
        match self {
            Self::Pretrained(id) => Some(weights_root.join(id)),
            _ => None,
        }
    }
}

/// Contents of `hp.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    /// Compound coefficient.
    pub efficientdet: usize,
    pub bidirectional: bool,
    pub n_classes: usize,
    /// Comma separated class names, index order.
    #[serde(default)]
    pub classes_names: String,
    /// Square input size the weights were trained at; absent means the D-table size.
    #[serde(default)]
    pub input_size: Option<usize>,
}

impl HyperParams {
    pub fn class_names(&self) -> Vec<String> {
        self.classes_names
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(HYPER_PARAMS_FILE);
        let raw = fs::read(&path).map_err(|source| ModelError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| ModelError::HyperParams { path, source })
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|source| ModelError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(HYPER_PARAMS_FILE);
        let json = serde_json::to_vec_pretty(self).map_err(|source| ModelError::HyperParams {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| ModelError::Io { path, source })
    }
}

pub fn weights_path(dir: &Path) -> PathBuf {
    dir.join(WEIGHTS_STEM)
}

/// Save module weights with the full-precision binary recorder.
pub fn save_weights<B: Backend, M: Module<B>>(module: M, path: &Path) -> Result<()> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    module
        .save_file(path, &recorder)
        .map_err(|e| ModelError::Record {
            path: path.to_path_buf(),
            msg: format!("{e:?}"),
        })
}

/// Load weights into an already-built module of the matching architecture.
pub fn load_weights<B: Backend, M: Module<B>>(
    module: M,
    path: &Path,
    device: &B::Device,
) -> Result<M> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    module
        .load_file(path, &recorder, device)
        .map_err(|e| ModelError::Record {
            path: path.to_path_buf(),
            msg: format!("{e:?}"),
        })
}
