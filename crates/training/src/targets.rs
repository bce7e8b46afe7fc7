//! Ground truth → per-anchor training targets with anchor states.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use models::anchors::Anchors;
use models::codec::BoxCodec;
use vision_core::boxes::iou_xyxy;

use crate::error::{TrainingError, TrainingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorState {
    Ignore,
    Negative,
    Positive,
}

impl AnchorState {
    pub fn value(self) -> f32 {
        match self {
            AnchorState::Ignore => -1.0,
            AnchorState::Negative => 0.0,
            AnchorState::Positive => 1.0,
        }
    }
}

impl TryFrom<f32> for AnchorState {
    type Error = TrainingError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        if value == -1.0 {
            Ok(AnchorState::Ignore)
        } else if value == 0.0 {
            Ok(AnchorState::Negative)
        } else if value == 1.0 {
            Ok(AnchorState::Positive)
        } else {
            Err(TrainingError::InvalidAnchorState(value))
        }
    }
}

/// One labelled box in model input pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundTruth {
    pub bbox: [f32; 4],
    pub label: usize,
}

/// Targets of one image, flat and anchor-ordered.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorTargets {
    /// `A * (C + 1)`: one-hot labels followed by the state.
    pub classification: Vec<f32>,
    /// `A * (4 + 1)`: encoded offsets followed by the state.
    pub regression: Vec<f32>,
    pub states: Vec<AnchorState>,
}

impl AnchorTargets {
    pub fn num_positive(&self) -> usize {
        self.states
            .iter()
            .filter(|s| **s == AnchorState::Positive)
            .count()
    }
}

/// IoU based matcher: `>= positive_iou` positive, `< negative_iou` negative, ignore
/// in between. Each ground truth also claims its best-overlapping anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetAssigner {
    pub positive_iou: f32,
    pub negative_iou: f32,
    pub codec: BoxCodec,
}

impl Default for TargetAssigner {
    fn default() -> Self {
        Self {
            positive_iou: 0.5,
            negative_iou: 0.4,
            codec: BoxCodec::default(),
        }
    }
}

impl TargetAssigner {
    pub fn assign(
        &self,
        anchors: &Anchors,
        ground_truth: &[GroundTruth],
        num_classes: usize,
    ) -> TrainingResult<AnchorTargets> {
        if let Some(gt) = ground_truth.iter().find(|gt| gt.label >= num_classes) {
            return Err(TrainingError::Validation(format!(
                "label {} out of range for {num_classes} classes",
                gt.label
            )));
        }
        let count = anchors.len();
        let mut states = vec![AnchorState::Negative; count];
        let mut matched = vec![None::<usize>; count];

        if !ground_truth.is_empty() {
            let mut best_for_gt = vec![(0usize, 0.0f32); ground_truth.len()];
            for (idx, anchor) in anchors.iter().enumerate() {
                let abox = anchor.to_xyxy();
                let mut best = (0usize, 0.0f32);
                for (g, gt) in ground_truth.iter().enumerate() {
                    let iou = iou_xyxy(abox, gt.bbox);
                    if iou > best.1 {
                        best = (g, iou);
                    }
                    if iou > best_for_gt[g].1 {
                        best_for_gt[g] = (idx, iou);
                    }
                }
                if best.1 >= self.positive_iou {
                    states[idx] = AnchorState::Positive;
                    matched[idx] = Some(best.0);
                } else if best.1 >= self.negative_iou {
                    states[idx] = AnchorState::Ignore;
                }
            }
            for (g, (idx, iou)) in best_for_gt.into_iter().enumerate() {
                if iou > 0.0 {
                    states[idx] = AnchorState::Positive;
                    matched[idx] = Some(g);
                }
            }
        }

        let mut classification = vec![0.0; count * (num_classes + 1)];
        let mut regression = vec![0.0; count * 5];
        for (idx, anchor) in anchors.iter().enumerate() {
            let state = states[idx].value();
            let cls = &mut classification[idx * (num_classes + 1)..(idx + 1) * (num_classes + 1)];
            cls[num_classes] = state;
            let reg = &mut regression[idx * 5..(idx + 1) * 5];
            reg[4] = state;
            if let Some(g) = matched[idx] {
                let gt = ground_truth[g];
                cls[gt.label] = 1.0;
                reg[..4].copy_from_slice(&self.codec.encode(anchor, gt.bbox));
            }
        }

        Ok(AnchorTargets {
            classification,
            regression,
            states,
        })
    }

    /// Packed `([B, A, C + 1], [B, A, 5])` target tensors for a batch.
    pub fn assign_batch<B: Backend>(
        &self,
        anchors: &Anchors,
        batch: &[Vec<GroundTruth>],
        num_classes: usize,
        device: &B::Device,
    ) -> TrainingResult<(Tensor<B, 3>, Tensor<B, 3>)> {
        let count = anchors.len();
        let mut classification = Vec::with_capacity(batch.len() * count * (num_classes + 1));
        let mut regression = Vec::with_capacity(batch.len() * count * 5);
        for ground_truth in batch {
            let targets = self.assign(anchors, ground_truth, num_classes)?;
            classification.extend(targets.classification);
            regression.extend(targets.regression);
        }
        let classification = Tensor::from_data(
            TensorData::new(classification, [batch.len(), count, num_classes + 1]),
            device,
        );
        let regression =
            Tensor::from_data(TensorData::new(regression, [batch.len(), count, 5]), device);
        Ok((classification, regression))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::anchors::AnchorsConfig;

    fn anchors() -> Anchors {
        Anchors::generate(&AnchorsConfig::default(), 128)
    }

    #[test]
    fn anchor_state_round_trips_through_f32() {
        for state in [
            AnchorState::Ignore,
            AnchorState::Negative,
            AnchorState::Positive,
        ] {
            assert_eq!(AnchorState::try_from(state.value()).unwrap(), state);
        }
        assert!(matches!(
            AnchorState::try_from(0.5),
            Err(TrainingError::InvalidAnchorState(_))
        ));
    }

    #[test]
    fn exact_anchor_match_is_positive_and_encodes_to_zero() {
        let anchors = anchors();
        // Template 3 of the first P3 cell is the 32x32 square centered at (4, 4); use
        // the cell at row 5, column 5 instead so the box lies inside the image.
        let cell = 5 * 16 + 5;
        let target = anchors.as_slice()[cell * 9 + 3];
        let gt = GroundTruth {
            bbox: target.to_xyxy(),
            label: 1,
        };
        let out = TargetAssigner::default()
            .assign(&anchors, &[gt], 2)
            .unwrap();
        let idx = cell * 9 + 3;
        assert_eq!(out.states[idx], AnchorState::Positive);
        assert_eq!(&out.classification[idx * 3..idx * 3 + 3], &[0.0, 1.0, 1.0]);
        assert!(out.regression[idx * 5..idx * 5 + 4]
            .iter()
            .all(|v| v.abs() < 1e-5));
        assert_eq!(out.regression[idx * 5 + 4], 1.0);
    }

    #[test]
    fn states_follow_iou_bands() {
        let anchors = anchors();
        let gt = GroundTruth {
            bbox: [30.0, 30.0, 70.0, 70.0],
            label: 0,
        };
        let assigner = TargetAssigner::default();
        let out = assigner.assign(&anchors, &[gt], 1).unwrap();
        assert!(out.num_positive() >= 1);
        for (idx, anchor) in anchors.iter().enumerate() {
            let iou = iou_xyxy(anchor.to_xyxy(), gt.bbox);
            match out.states[idx] {
                AnchorState::Negative => assert!(iou < assigner.negative_iou),
                AnchorState::Ignore => {
                    assert!(iou >= assigner.negative_iou && iou < assigner.positive_iou)
                }
                AnchorState::Positive => {}
            }
            if iou >= assigner.positive_iou {
                assert_eq!(out.states[idx], AnchorState::Positive);
            }
        }
    }

    #[test]
    fn small_box_still_gets_its_best_anchor() {
        let anchors = anchors();
        let gt = GroundTruth {
            bbox: [60.0, 60.0, 64.0, 64.0],
            label: 0,
        };
        let out = TargetAssigner::default()
            .assign(&anchors, &[gt], 1)
            .unwrap();
        assert_eq!(out.num_positive(), 1);
    }

    #[test]
    fn empty_image_is_all_negative_and_bad_labels_fail() {
        let anchors = anchors();
        let assigner = TargetAssigner::default();
        let out = assigner.assign(&anchors, &[], 3).unwrap();
        assert!(out.states.iter().all(|s| *s == AnchorState::Negative));
        assert!(assigner
            .assign(
                &anchors,
                &[GroundTruth {
                    bbox: [0.0, 0.0, 10.0, 10.0],
                    label: 3
                }],
                3
            )
            .is_err());
    }
}
