//! Compact EfficientNet-style backbone producing C3 (stride 8), C4 (16) and C5 (32).
//!
//! Depth and width follow the compound coefficient but the block structure is a
//! simplified separable-conv residual stack, not the published EfficientNet.

use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig};
use burn::tensor::activation::silu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::config::CompoundScaling;
use crate::layers::{ConvBlock, FeatureExtractor, Phase, SeparableConv};

#[derive(Debug, Module)]
struct ResidualBlock<B: Backend> {
    conv: SeparableConv<B>,
}

impl<B: Backend> ResidualBlock<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        x.clone() + silu(self.conv.forward(x))
    }
}

#[derive(Debug, Module)]
struct Stage<B: Backend> {
    down: ConvBlock<B>,
    blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> Stage<B> {
    fn new(channels_in: usize, channels_out: usize, repeats: usize, device: &B::Device) -> Self {
        let down = ConvBlock::new(channels_in, channels_out, 2, device);
        let blocks = (0..repeats)
            .map(|_| ResidualBlock {
                conv: SeparableConv::new(channels_out, channels_out, device),
            })
            .collect();
        Self { down, blocks }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.down.forward(x);
        for block in &self.blocks {
            x = block.forward(x);
        }
        x
    }
}

#[derive(Debug, Module)]
pub struct EfficientNetBackbone<B: Backend> {
    stem: ConvBlock<B>,
    stages: Vec<Stage<B>>,
    dropout: Dropout,
}

impl<B: Backend> EfficientNetBackbone<B> {
    pub fn new(scaling: &CompoundScaling, device: &B::Device) -> Self {
        let [c3, c4, c5] = scaling.backbone_channels();
        let depth_mult = 1.2f32.powi(scaling.backbone as i32);
        let repeats = |base: usize| ((base as f32) * depth_mult).ceil() as usize;

        let stem = ConvBlock::new(3, 32, 2, device);
        let stages = vec![
            Stage::new(32, 24, repeats(1), device),
            Stage::new(24, c3, repeats(2), device),
            Stage::new(c3, c4, repeats(3), device),
            Stage::new(c4, c5, repeats(1), device),
        ];
        let dropout = DropoutConfig::new(0.2).init();
        Self {
            stem,
            stages,
            dropout,
        }
    }
}

impl<B: Backend> FeatureExtractor<B> for EfficientNetBackbone<B> {
    fn extract(&self, images: Tensor<B, 4>, phase: Phase) -> Vec<Tensor<B, 4>> {
        let mut x = self.stem.forward(images);
        let mut features = Vec::with_capacity(3);
        for (idx, stage) in self.stages.iter().enumerate() {
            x = stage.forward(x);
            // Stages 1..=3 end at strides 8, 16 and 32.
            if idx >= 1 {
                features.push(x.clone());
            }
        }
        if phase.is_train() {
            if let Some(last) = features.pop() {
                features.push(self.dropout.forward(last));
            }
        }
        features
    }
}
