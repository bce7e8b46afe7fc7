use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A frame of image data and associated metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: u64,
    /// Capture timestamp (seconds).
    pub timestamp: f64,
    /// Optional raw RGBA8 data; can be `None` when operating on file-based frames.
    pub rgba: Option<Vec<u8>>,
    /// Image dimensions (width, height).
    pub size: (u32, u32),
    /// Optional on-disk location for lazy loading.
    pub path: Option<PathBuf>,
}

/// A single decoded detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Absolute box \[x1,y1,x2,y2\] in input-image pixels.
    pub bbox: [f32; 4],
    pub label: usize,
    pub score: f32,
}

/// Detections surviving thresholding and suppression for one image.
///
/// `boxes`, `labels` and `scores` are aligned and sorted by descending score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageDetections {
    pub boxes: Vec<[f32; 4]>,
    pub labels: Vec<usize>,
    pub scores: Vec<f32>,
}

impl ImageDetections {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn push(&mut self, det: Detection) {
        self.boxes.push(det.bbox);
        self.labels.push(det.label);
        self.scores.push(det.score);
    }

    pub fn iter(&self) -> impl Iterator<Item = Detection> + '_ {
        self.boxes
            .iter()
            .zip(self.labels.iter())
            .zip(self.scores.iter())
            .map(|((bbox, label), score)| Detection {
                bbox: *bbox,
                label: *label,
                score: *score,
            })
    }

    /// Build from unordered detections, sorting by descending score.
    pub fn from_unsorted(mut dets: Vec<Detection>) -> Self {
        dets.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut out = Self::default();
        for det in dets {
            out.push(det);
        }
        out
    }
}

/// Result of running a detector on a frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub frame_id: u64,
    /// Highest score among the detections, 0 when there are none.
    pub confidence: f32,
    pub detections: ImageDetections,
}

/// Runs inference on a frame.
pub trait Detector {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<DetectionResult>;
    /// Optional: adjust the score threshold at runtime.
    fn set_score_threshold(&mut self, _score: f32) {}
}
