//! RetinaNet-style prediction heads shared across pyramid levels.

use burn::module::{Module, Param};
use burn::tensor::activation::{sigmoid, silu};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::layers::{flatten_anchor_outputs, Phase, PredictionHead, SeparableConv};

/// Prior foreground probability used to initialize the classifier bias.
pub const CLASS_PRIOR: f32 = 0.01;

#[derive(Debug, Module)]
struct HeadTower<B: Backend> {
    convs: Vec<SeparableConv<B>>,
    output: SeparableConv<B>,
    per_anchor: usize,
}

impl<B: Backend> HeadTower<B> {
    fn new(
        width: usize,
        depth: usize,
        anchors: usize,
        per_anchor: usize,
        device: &B::Device,
    ) -> Self {
        let convs = (0..depth)
            .map(|_| SeparableConv::new(width, width, device))
            .collect();
        let output = SeparableConv::new(width, anchors * per_anchor, device);
        Self {
            convs,
            output,
            per_anchor,
        }
    }

    fn forward(&self, feature: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = feature;
        for conv in &self.convs {
            x = silu(conv.forward(x));
        }
        self.output.forward(x)
    }
}

/// Per-anchor class probabilities (sigmoid applied).
#[derive(Debug, Module)]
pub struct ClassHead<B: Backend> {
    tower: HeadTower<B>,
}

impl<B: Backend> ClassHead<B> {
    pub fn new(
        width: usize,
        depth: usize,
        anchors: usize,
        num_classes: usize,
        device: &B::Device,
    ) -> Self {
        let mut tower = HeadTower::new(width, depth, anchors, num_classes, device);
        let bias = -((1.0 - CLASS_PRIOR) / CLASS_PRIOR).ln();
        tower.output.pointwise.bias = Some(Param::from_tensor(Tensor::full(
            [anchors * num_classes],
            bias,
            device,
        )));
        Self { tower }
    }

    pub fn num_classes(&self) -> usize {
        self.tower.per_anchor
    }
}

impl<B: Backend> PredictionHead<B> for ClassHead<B> {
    fn predict(&self, feature: Tensor<B, 4>, _phase: Phase) -> Tensor<B, 3> {
        let logits = flatten_anchor_outputs(self.tower.forward(feature), self.tower.per_anchor);
        sigmoid(logits)
    }
}

/// Per-anchor box offsets `[dx, dy, dw, dh]`.
#[derive(Debug, Module)]
pub struct BoxHead<B: Backend> {
    tower: HeadTower<B>,
}

impl<B: Backend> BoxHead<B> {
    pub fn new(width: usize, depth: usize, anchors: usize, device: &B::Device) -> Self {
        Self {
            tower: HeadTower::new(width, depth, anchors, 4, device),
        }
    }
}

impl<B: Backend> PredictionHead<B> for BoxHead<B> {
    fn predict(&self, feature: Tensor<B, 4>, _phase: Phase) -> Tensor<B, 3> {
        flatten_anchor_outputs(self.tower.forward(feature), 4)
    }
}
