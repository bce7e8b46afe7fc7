//! BiFPN feature fusion over P3..P7 with fast normalized fusion weights.
//!
//! With `bidirectional == false` only the top-down path runs, which is a plain FPN.

use burn::module::{Module, Param};
use burn::nn::conv::Conv2d;
use burn::nn::interpolate::{Interpolate2dConfig, InterpolateMode};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::{relu, silu};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::config::CompoundScaling;
use crate::layers::{pointwise, FeatureFusion, Phase, SeparableConv};

const LEVELS: usize = 5;
const FUSION_EPS: f32 = 1e-4;

fn downsample() -> MaxPool2d {
    MaxPool2dConfig::new([3, 3])
        .with_strides([2, 2])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init()
}

fn upsample_to<B: Backend>(x: Tensor<B, 4>, like: &Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, h, w] = like.dims();
    Interpolate2dConfig::new()
        .with_output_size(Some([h, w]))
        .with_mode(InterpolateMode::Nearest)
        .init()
        .forward(x)
}

/// Weighted sum of same-shaped inputs followed by swish + separable conv.
#[derive(Debug, Module)]
struct FusionNode<B: Backend> {
    weights: Param<Tensor<B, 1>>,
    conv: SeparableConv<B>,
}

impl<B: Backend> FusionNode<B> {
    fn new(inputs: usize, channels: usize, device: &B::Device) -> Self {
        Self {
            weights: Param::from_tensor(Tensor::ones([inputs], device)),
            conv: SeparableConv::new(channels, channels, device),
        }
    }

    fn forward(&self, inputs: Vec<Tensor<B, 4>>) -> Tensor<B, 4> {
        let n = inputs.len();
        let w = relu(self.weights.val());
        let w = w.clone() / w.sum().add_scalar(FUSION_EPS);
        let fused = Tensor::stack::<5>(inputs, 0) * w.reshape([n, 1, 1, 1, 1]);
        let fused: Tensor<B, 4> = fused.sum_dim(0).squeeze(0);
        self.conv.forward(silu(fused))
    }
}

#[derive(Debug, Module)]
struct BiFpnLayer<B: Backend> {
    /// Top-down nodes for P6..P3 (index 0 = P3).
    top_down: Vec<FusionNode<B>>,
    /// Bottom-up nodes for P4..P7 (index 0 = P4). Empty for the top-down-only variant.
    bottom_up: Vec<FusionNode<B>>,
    pool: MaxPool2d,
}

impl<B: Backend> BiFpnLayer<B> {
    fn new(channels: usize, bidirectional: bool, device: &B::Device) -> Self {
        let top_down = (0..LEVELS - 1)
            .map(|_| FusionNode::new(2, channels, device))
            .collect();
        let bottom_up = if bidirectional {
            (1..LEVELS)
                .map(|level| {
                    let inputs = if level == LEVELS - 1 { 2 } else { 3 };
                    FusionNode::new(inputs, channels, device)
                })
                .collect()
        } else {
            Vec::new()
        };
        Self {
            top_down,
            bottom_up,
            pool: downsample(),
        }
    }

    fn forward(&self, inputs: Vec<Tensor<B, 4>>) -> Vec<Tensor<B, 4>> {
        // Top-down: td[4] = P7, td[i] = node(P_i, up(td[i + 1])).
        let mut td: Vec<Tensor<B, 4>> = inputs.clone();
        for level in (0..LEVELS - 1).rev() {
            let up = upsample_to(td[level + 1].clone(), &inputs[level]);
            td[level] = self.top_down[level].forward(vec![inputs[level].clone(), up]);
        }
        if self.bottom_up.is_empty() {
            return td;
        }

        let mut out = Vec::with_capacity(LEVELS);
        out.push(td[0].clone());
        for level in 1..LEVELS {
            let down = self.pool.forward(out[level - 1].clone());
            let mut node_inputs = vec![inputs[level].clone()];
            if level < LEVELS - 1 {
                node_inputs.push(td[level].clone());
            }
            node_inputs.push(down);
            out.push(self.bottom_up[level - 1].forward(node_inputs));
        }
        out
    }
}

#[derive(Debug, Module)]
pub struct BiFpn<B: Backend> {
    /// 1x1 projections of C3, C4, C5 to the pyramid width.
    laterals: Vec<Conv2d<B>>,
    /// Projection of C5 feeding P6.
    p6_proj: Conv2d<B>,
    pool: MaxPool2d,
    layers: Vec<BiFpnLayer<B>>,
}

impl<B: Backend> BiFpn<B> {
    pub fn new(scaling: &CompoundScaling, bidirectional: bool, device: &B::Device) -> Self {
        let width = scaling.bifpn_width;
        let channels = scaling.backbone_channels();
        let laterals = channels
            .iter()
            .map(|c| pointwise(*c, width, device))
            .collect();
        let p6_proj = pointwise(channels[2], width, device);
        let layers = (0..scaling.bifpn_depth)
            .map(|_| BiFpnLayer::new(width, bidirectional, device))
            .collect();
        Self {
            laterals,
            p6_proj,
            pool: downsample(),
            layers,
        }
    }

    pub fn is_bidirectional(&self) -> bool {
        self.layers
            .first()
            .is_some_and(|layer| !layer.bottom_up.is_empty())
    }
}

impl<B: Backend> FeatureFusion<B> for BiFpn<B> {
    fn fuse(&self, features: Vec<Tensor<B, 4>>, _phase: Phase) -> Vec<Tensor<B, 4>> {
        let c5 = features[2].clone();
        let p6 = self.pool.forward(self.p6_proj.forward(c5));
        let p7 = self.pool.forward(p6.clone());

        let mut pyramid: Vec<Tensor<B, 4>> = self
            .laterals
            .iter()
            .zip(features)
            .map(|(lateral, feature)| lateral.forward(feature))
            .collect();
        pyramid.push(p6);
        pyramid.push(p7);

        for layer in &self.layers {
            pyramid = layer.forward(pyramid);
        }
        pyramid
    }
}
