//! Post-inference filtering: decode, score threshold, non-max suppression, emit.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use vision_core::boxes::{clip_xyxy, iou_xyxy};
use vision_core::interfaces::{Detection, ImageDetections};

use crate::anchors::Anchors;
use crate::codec::BoxCodec;
use crate::error::{ModelError, Result};

/// Filtering knobs. `score_threshold` is the only one expected to change at runtime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterConfig {
    pub score_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections_per_class: usize,
    /// Suppress across classes using each anchor's best class only.
    pub class_agnostic: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.1,
            iou_threshold: 0.5,
            max_detections_per_class: 200,
            class_agnostic: false,
        }
    }
}

/// Owns the anchors of one input resolution and turns raw head outputs into detections.
///
/// Stateless across calls apart from the configuration; `set_score_threshold`
/// assumes a single writer.
#[derive(Debug, Clone)]
pub struct DetectionFilter {
    anchors: Anchors,
    codec: BoxCodec,
    config: FilterConfig,
}

impl DetectionFilter {
    pub fn new(anchors: Anchors, config: FilterConfig) -> Self {
        Self {
            anchors,
            codec: BoxCodec::default(),
            config,
        }
    }

    pub fn anchors(&self) -> &Anchors {
        &self.anchors
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn score_threshold(&self) -> f32 {
        self.config.score_threshold
    }

    pub fn set_score_threshold(&mut self, value: f32) {
        self.config.score_threshold = value;
    }

    /// Filter a batch of raw predictions: `boxes [B, A, 4]`, `scores [B, A, C]`.
    pub fn filter<B: Backend>(
        &self,
        boxes: Tensor<B, 3>,
        scores: Tensor<B, 3>,
    ) -> Result<Vec<ImageDetections>> {
        let [batch, anchors, coords] = boxes.dims();
        let [score_batch, score_anchors, num_classes] = scores.dims();
        if coords != 4 || batch != score_batch || anchors != score_anchors {
            return Err(ModelError::Shape(format!(
                "boxes {:?} and scores {:?} are not co-indexed",
                boxes.dims(),
                scores.dims()
            )));
        }
        let boxes = boxes
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| ModelError::Shape(format!("box tensor: {e:?}")))?;
        let scores = scores
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| ModelError::Shape(format!("score tensor: {e:?}")))?;
        self.filter_slices(&boxes, &scores, batch, num_classes)
    }

    /// Same as [`filter`](Self::filter) on flat row-major buffers.
    pub fn filter_slices(
        &self,
        boxes: &[f32],
        scores: &[f32],
        batch: usize,
        num_classes: usize,
    ) -> Result<Vec<ImageDetections>> {
        let anchors = self.anchors.len();
        if boxes.len() != batch * anchors * 4 || scores.len() != batch * anchors * num_classes {
            return Err(ModelError::Shape(format!(
                "expected {anchors} anchors per image for batch {batch} ({} box values, {} score values given)",
                boxes.len(),
                scores.len()
            )));
        }
        let size = self.anchors.input_size() as f32;
        let mut out = Vec::with_capacity(batch);
        for b in 0..batch {
            let candidates = self.candidates(
                &boxes[b * anchors * 4..(b + 1) * anchors * 4],
                &scores[b * anchors * num_classes..(b + 1) * anchors * num_classes],
                num_classes,
                size,
            );
            out.push(self.suppress(candidates, num_classes));
        }
        Ok(out)
    }

    fn candidates(
        &self,
        boxes: &[f32],
        scores: &[f32],
        num_classes: usize,
        size: f32,
    ) -> Vec<Detection> {
        let threshold = self.config.score_threshold;
        let mut candidates = Vec::new();
        for (idx, anchor) in self.anchors.iter().enumerate() {
            let row = &scores[idx * num_classes..(idx + 1) * num_classes];
            let (best_label, best_score) = row.iter().copied().enumerate().fold(
                (0usize, f32::NEG_INFINITY),
                |acc, (label, score)| if score > acc.1 { (label, score) } else { acc },
            );
            if best_score.is_nan() || best_score < threshold {
                continue;
            }
            let deltas = [
                boxes[idx * 4],
                boxes[idx * 4 + 1],
                boxes[idx * 4 + 2],
                boxes[idx * 4 + 3],
            ];
            let bbox = clip_xyxy(self.codec.decode(anchor, deltas), size, size);
            if self.config.class_agnostic {
                candidates.push(Detection {
                    bbox,
                    label: best_label,
                    score: best_score,
                });
                continue;
            }
            for (label, score) in row.iter().copied().enumerate() {
                if score >= threshold {
                    candidates.push(Detection { bbox, label, score });
                }
            }
        }
        candidates
    }

    fn suppress(&self, candidates: Vec<Detection>, num_classes: usize) -> ImageDetections {
        let iou = self.config.iou_threshold;
        let keep = self.config.max_detections_per_class;
        let kept = if self.config.class_agnostic {
            nms(candidates, iou, keep)
        } else {
            let mut per_class: Vec<Vec<Detection>> = vec![Vec::new(); num_classes];
            for det in candidates {
                per_class[det.label].push(det);
            }
            per_class
                .into_iter()
                .flat_map(|group| nms(group, iou, keep))
                .collect()
        };
        ImageDetections::from_unsorted(kept)
    }
}

/// Greedy non-max suppression. Keeps at most `max_keep` detections, highest score first;
/// a detection is dropped when its IoU with an already kept one exceeds `iou_threshold`.
pub fn nms(mut dets: Vec<Detection>, iou_threshold: f32, max_keep: usize) -> Vec<Detection> {
    dets.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut kept: Vec<Detection> = Vec::new();
    for det in dets {
        if kept.len() >= max_keep {
            break;
        }
        if kept
            .iter()
            .all(|k| iou_xyxy(k.bbox, det.bbox) <= iou_threshold)
        {
            kept.push(det);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], score: f32) -> Detection {
        Detection {
            bbox,
            label: 0,
            score,
        }
    }

    #[test]
    fn nms_drops_heavy_overlap_and_keeps_disjoint() {
        let kept = nms(
            vec![
                det([0.0, 0.0, 10.0, 10.0], 0.8),
                det([1.0, 0.0, 11.0, 10.0], 0.9),
                det([50.0, 50.0, 60.0, 60.0], 0.3),
            ],
            0.5,
            200,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.3);
    }

    #[test]
    fn nms_respects_max_keep() {
        let dets = (0..5)
            .map(|i| det([i as f32 * 20.0, 0.0, i as f32 * 20.0 + 10.0, 10.0], 0.5))
            .collect();
        assert_eq!(nms(dets, 0.5, 3).len(), 3);
    }
}
