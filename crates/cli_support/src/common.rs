use clap::Args;
use std::path::PathBuf;

use crate::config::{DetectorSettings, FilterSettings};
use crate::logging::LogFormat;

/// Detection filter thresholds shared by inference-related tools.
///
/// Flags left out fall back to the `[filter]` section of the settings file.
#[derive(Debug, Clone, Copy, Default, Args)]
pub struct ThresholdArgs {
    /// Minimum class score for a detection [default: settings file, else 0.4].
    #[arg(long = "score")]
    pub score_thresh: Option<f32>,
    /// IoU above which a lower-scored box of the same class is suppressed
    /// [default: settings file, else 0.5].
    #[arg(long = "iou")]
    pub iou_thresh: Option<f32>,
}

impl ThresholdArgs {
    pub fn resolve(&self, settings: &FilterSettings) -> ThresholdOpts {
        let fallback = ThresholdOpts::from(settings);
        ThresholdOpts::new(
            self.score_thresh.unwrap_or(fallback.score_thresh),
            self.iou_thresh.unwrap_or(fallback.iou_thresh),
        )
    }
}

/// Resolved thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdOpts {
    pub score_thresh: f32,
    pub iou_thresh: f32,
}

impl ThresholdOpts {
    pub fn new(score_thresh: f32, iou_thresh: f32) -> Self {
        Self {
            score_thresh,
            iou_thresh,
        }
    }
}

impl From<&FilterSettings> for ThresholdOpts {
    fn from(settings: &FilterSettings) -> Self {
        ThresholdOpts::new(settings.score_threshold, settings.iou_threshold)
    }
}

/// Settings file and log format, shared by every binary.
#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    /// Settings file; falls back to $EFFICIENTDET_CONFIG, then ./efficientdet.toml.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl RuntimeArgs {
    pub fn settings(&self) -> DetectorSettings {
        match &self.config {
            Some(path) => DetectorSettings::from_path(path).unwrap_or_else(|| {
                tracing::warn!(path = %path.display(), "settings file unreadable, using defaults");
                DetectorSettings::default()
            }),
            None => DetectorSettings::load(),
        }
    }
}
