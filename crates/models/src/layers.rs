//! Capability traits composed by the detector, plus the conv blocks they share.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::silu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Call-time phase. Whether training behaviour actually applies also depends on the
/// model mode, see [`crate::detector::effective_phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Infer,
}

impl Phase {
    pub fn is_train(self) -> bool {
        self == Phase::Train
    }
}

/// Image → multi-scale features (C3, C4, C5).
pub trait FeatureExtractor<B: Backend> {
    fn extract(&self, images: Tensor<B, 4>, phase: Phase) -> Vec<Tensor<B, 4>>;
}

/// Backbone features → fused pyramid (P3..P7), all with the same channel count.
pub trait FeatureFusion<B: Backend> {
    fn fuse(&self, features: Vec<Tensor<B, 4>>, phase: Phase) -> Vec<Tensor<B, 4>>;
}

/// One pyramid level `[B, C, H, W]` → per-anchor outputs `[B, H*W*anchors, K]`.
pub trait PredictionHead<B: Backend> {
    fn predict(&self, feature: Tensor<B, 4>, phase: Phase) -> Tensor<B, 3>;
}

/// 3x3 conv + swish, optionally strided.
#[derive(Debug, Module)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(channels_in: usize, channels_out: usize, stride: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([channels_in, channels_out], [3, 3])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        Self { conv }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        silu(self.conv.forward(x))
    }
}

/// Depthwise 3x3 followed by pointwise 1x1. No activation.
#[derive(Debug, Module)]
pub struct SeparableConv<B: Backend> {
    depthwise: Conv2d<B>,
    pub(crate) pointwise: Conv2d<B>,
}

impl<B: Backend> SeparableConv<B> {
    pub fn new(channels_in: usize, channels_out: usize, device: &B::Device) -> Self {
        let depthwise = Conv2dConfig::new([channels_in, channels_in], [3, 3])
            .with_groups(channels_in)
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let pointwise = Conv2dConfig::new([channels_in, channels_out], [1, 1]).init(device);
        Self {
            depthwise,
            pointwise,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pointwise.forward(self.depthwise.forward(x))
    }
}

/// 1x1 projection, used to bring backbone features to the pyramid width.
pub fn pointwise<B: Backend>(
    channels_in: usize,
    channels_out: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new([channels_in, channels_out], [1, 1]).init(device)
}

/// `[B, A*K, H, W]` → `[B, H*W*A, K]`, matching the anchor order.
pub fn flatten_anchor_outputs<B: Backend>(x: Tensor<B, 4>, per_anchor: usize) -> Tensor<B, 3> {
    let [batch, channels, height, width] = x.dims();
    let anchors = channels / per_anchor;
    x.permute([0, 2, 3, 1])
        .reshape([batch, height * width * anchors, per_anchor])
}
