//! Focal and Huber losses, elementwise and with anchor-state masking.
//!
//! The EfficientDet wrappers take packed targets whose last channel is the anchor
//! state: `-1` ignore, `0` negative, `1` positive. Focal loss keeps negatives and
//! positives; Huber loss keeps positives only, regression has no target otherwise.
//! Any other state value is rejected with [`TrainingError::InvalidAnchorState`].

use burn::nn::loss::Reduction;
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::error::{TrainingError, TrainingResult};
use crate::targets::AnchorState;

/// Probabilities are clipped into `[EPSILON, 1 - EPSILON]` before the log.
pub const FOCAL_EPSILON: f32 = 1e-6;
/// Multiplier applied to the normalized regression loss.
pub const REGRESSION_LOSS_SCALE: f32 = 50.0;

/// Elementwise focal loss `-α_t (1 - p_t)^γ log(p_t)`.
///
/// `targets` hold 1 for the positive class and 0 elsewhere.
pub fn focal_loss<B: Backend, const D: usize>(
    targets: Tensor<B, D>,
    predictions: Tensor<B, D>,
    gamma: f32,
    alpha: f32,
    from_logits: bool,
) -> Tensor<B, D> {
    let probs = if from_logits {
        sigmoid(predictions)
    } else {
        predictions
    };
    let probs = probs.clamp(FOCAL_EPSILON, 1.0 - FOCAL_EPSILON);
    let positive = targets.equal_elem(1.0);

    let p_t = probs.clone().neg().add_scalar(1.0).mask_where(positive.clone(), probs);
    let alpha_t = p_t.zeros_like().add_scalar(1.0 - alpha).mask_fill(positive, alpha);
    let modulation = p_t.clone().neg().add_scalar(1.0).powf_scalar(gamma);
    alpha_t.neg() * modulation * p_t.log()
}

/// Elementwise Huber loss averaged over the last axis (kept with size 1).
pub fn huber_loss<B: Backend, const D: usize>(
    targets: Tensor<B, D>,
    predictions: Tensor<B, D>,
    delta: f32,
) -> Tensor<B, D> {
    let error = targets - predictions;
    let abs = error.clone().abs();
    let squared = error.clone() * error * 0.5;
    let linear = abs.clone().sub_scalar(0.5 * delta) * delta;
    let small = abs.lower_elem(delta);
    linear.mask_where(small, squared).mean_dim(D - 1)
}

fn reduce<B: Backend, const D: usize>(loss: Tensor<B, D>, reduction: Reduction) -> Tensor<B, 1> {
    match reduction {
        Reduction::Mean => loss.mean(),
        // Sum is the default for both losses.
        Reduction::Sum | Reduction::Auto => loss.sum(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocalLoss {
    pub gamma: f32,
    pub alpha: f32,
    /// Apply a sigmoid to the predictions first.
    pub from_logits: bool,
}

impl Default for FocalLoss {
    fn default() -> Self {
        Self {
            gamma: 1.5,
            alpha: 0.25,
            from_logits: false,
        }
    }
}

impl FocalLoss {
    pub fn forward<B: Backend, const D: usize>(
        &self,
        targets: Tensor<B, D>,
        predictions: Tensor<B, D>,
        reduction: Reduction,
    ) -> Tensor<B, 1> {
        reduce(self.forward_no_reduction(targets, predictions), reduction)
    }

    pub fn forward_no_reduction<B: Backend, const D: usize>(
        &self,
        targets: Tensor<B, D>,
        predictions: Tensor<B, D>,
    ) -> Tensor<B, D> {
        focal_loss(targets, predictions, self.gamma, self.alpha, self.from_logits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HuberLoss {
    pub delta: f32,
}

impl Default for HuberLoss {
    fn default() -> Self {
        Self { delta: 1.0 }
    }
}

impl HuberLoss {
    pub fn forward<B: Backend, const D: usize>(
        &self,
        targets: Tensor<B, D>,
        predictions: Tensor<B, D>,
        reduction: Reduction,
    ) -> Tensor<B, 1> {
        reduce(self.forward_no_reduction(targets, predictions), reduction)
    }

    pub fn forward_no_reduction<B: Backend, const D: usize>(
        &self,
        targets: Tensor<B, D>,
        predictions: Tensor<B, D>,
    ) -> Tensor<B, D> {
        huber_loss(targets, predictions, self.delta)
    }
}

/// Split `[B, A, K + 1]` into `[B, A, K]` values and `[B, A]` anchor states.
pub fn split_states<B: Backend>(packed: Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 2>) {
    let [batch, anchors, channels] = packed.dims();
    let values = packed
        .clone()
        .slice([0..batch, 0..anchors, 0..channels - 1]);
    let states = packed
        .slice([0..batch, 0..anchors, channels - 1..channels])
        .reshape([batch, anchors]);
    (values, states)
}

/// Every state must be `-1`, `0` or `1`.
pub fn check_states<B: Backend>(states: &Tensor<B, 2>) -> TrainingResult<()> {
    let values = states
        .clone()
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| TrainingError::Validation(format!("anchor states: {e:?}")))?;
    values
        .into_iter()
        .try_for_each(|value| AnchorState::try_from(value).map(|_| ()))
}

/// `max(1, #positive anchors)` over the whole batch.
fn positive_normalizer<B: Backend>(states: Tensor<B, 2>) -> Tensor<B, 1> {
    states.equal_elem(1.0).float().sum().clamp_min(1.0)
}

/// Classification loss over non-ignored anchors, normalized by the positive count.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EfficientDetFocalLoss {
    pub focal: FocalLoss,
}

impl EfficientDetFocalLoss {
    pub fn new(alpha: f32, gamma: f32, from_logits: bool) -> Self {
        Self {
            focal: FocalLoss {
                gamma,
                alpha,
                from_logits,
            },
        }
    }

    /// `targets [B, A, C + 1]` (last channel = state), `predictions [B, A, C]`.
    pub fn forward<B: Backend>(
        &self,
        targets: Tensor<B, 3>,
        predictions: Tensor<B, 3>,
    ) -> TrainingResult<Tensor<B, 1>> {
        let (labels, states) = split_states(targets);
        self.forward_with_states(labels, predictions, states)
    }

    pub fn forward_with_states<B: Backend>(
        &self,
        labels: Tensor<B, 3>,
        predictions: Tensor<B, 3>,
        states: Tensor<B, 2>,
    ) -> TrainingResult<Tensor<B, 1>> {
        check_states(&states)?;
        let [batch, anchors, classes] = labels.dims();
        let keep: Tensor<B, 3> = states
            .clone()
            .equal_elem(-1.0)
            .bool_not()
            .float()
            .reshape([batch, anchors, 1])
            .expand([batch, anchors, classes]);
        let loss = self.focal.forward_no_reduction(labels, predictions) * keep;
        Ok(loss.sum() / positive_normalizer(states))
    }
}

/// Box regression loss over positive anchors, normalized by `4 * max(1, #positive)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EfficientDetHuberLoss {
    pub huber: HuberLoss,
}

impl EfficientDetHuberLoss {
    pub fn new(delta: f32) -> Self {
        Self {
            huber: HuberLoss { delta },
        }
    }

    /// `targets [B, A, 4 + 1]` (last channel = state), `predictions [B, A, 4]`.
    pub fn forward<B: Backend>(
        &self,
        targets: Tensor<B, 3>,
        predictions: Tensor<B, 3>,
    ) -> TrainingResult<Tensor<B, 1>> {
        let (offsets, states) = split_states(targets);
        self.forward_with_states(offsets, predictions, states)
    }

    pub fn forward_with_states<B: Backend>(
        &self,
        offsets: Tensor<B, 3>,
        predictions: Tensor<B, 3>,
        states: Tensor<B, 2>,
    ) -> TrainingResult<Tensor<B, 1>> {
        check_states(&states)?;
        let per_anchor: Tensor<B, 2> = self
            .huber
            .forward_no_reduction(offsets, predictions)
            .squeeze(2);
        let positive = states.clone().equal_elem(1.0).float();
        let normalizer = positive_normalizer(states).mul_scalar(4.0);
        Ok((per_anchor * positive)
            .sum()
            .div(normalizer)
            .mul_scalar(REGRESSION_LOSS_SCALE))
    }
}
