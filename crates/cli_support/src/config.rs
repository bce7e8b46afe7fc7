use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const DEFAULT_CONFIG_NAME: &str = "efficientdet.toml";
pub const CONFIG_ENV: &str = "EFFICIENTDET_CONFIG";

/// Detection filter section of the settings file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSettings {
    pub score_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections_per_class: usize,
    pub class_agnostic: bool,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            score_threshold: 0.4,
            iou_threshold: 0.5,
            max_detections_per_class: 200,
            class_agnostic: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    /// Directory holding named checkpoints (`<root>/<id>/hp.json`).
    pub weights_root: PathBuf,
    pub filter: FilterSettings,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            weights_root: PathBuf::from("weights"),
            filter: FilterSettings::default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct SettingsFile {
    weights_root: Option<String>,
    filter: Option<FilterSection>,
}

#[derive(Debug, Deserialize, Default)]
struct FilterSection {
    score_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    max_detections_per_class: Option<usize>,
    class_agnostic: Option<bool>,
}

impl DetectorSettings {
    /// `$EFFICIENTDET_CONFIG` if set, else `./efficientdet.toml`, else defaults.
    pub fn load() -> Self {
        let cfg = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_path(Path::new(&path)).unwrap_or_default(),
            Err(_) => Self::from_path(Path::new(DEFAULT_CONFIG_NAME)).unwrap_or_default(),
        };
        cfg.warn_if_invalid();
        cfg
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let raw = std::fs::read_to_string(path).ok()?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Option<Self> {
        match toml::from_str::<SettingsFile>(raw) {
            Ok(file) => Some(Self::from_file(file)),
            Err(err) => {
                tracing::warn!(%err, "invalid settings file");
                None
            }
        }
    }

    fn from_file(file: SettingsFile) -> Self {
        let defaults = FilterSettings::default();
        let filter = file.filter.unwrap_or_default();
        DetectorSettings {
            weights_root: file
                .weights_root
                .map(|v| expand_path(&v))
                .unwrap_or_else(|| PathBuf::from("weights")),
            filter: FilterSettings {
                score_threshold: filter.score_threshold.unwrap_or(defaults.score_threshold),
                iou_threshold: filter.iou_threshold.unwrap_or(defaults.iou_threshold),
                max_detections_per_class: filter
                    .max_detections_per_class
                    .unwrap_or(defaults.max_detections_per_class),
                class_agnostic: filter.class_agnostic.unwrap_or(defaults.class_agnostic),
            },
        }
    }

    fn warn_if_invalid(&self) {
        if !(0.0..=1.0).contains(&self.filter.iou_threshold) {
            tracing::warn!(
                iou_threshold = self.filter.iou_threshold,
                "iou_threshold outside [0, 1]"
            );
        }
        if self.filter.max_detections_per_class == 0 {
            tracing::warn!("max_detections_per_class is 0; every detection will be dropped");
        }
    }
}

fn expand_path(raw: &str) -> PathBuf {
    match raw.strip_prefix('~') {
        Some(stripped) => match std::env::var("HOME") {
            Ok(home) => PathBuf::from(format!("{home}{stripped}")),
            Err(_) => PathBuf::from(raw),
        },
        None => PathBuf::from(raw),
    }
}
