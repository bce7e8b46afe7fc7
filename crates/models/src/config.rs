//! Compound scaling table for EfficientDet D0..D7.

use crate::error::ConfigError;

const INPUT_SIZES: [usize; 8] = [512, 640, 768, 896, 1024, 1280, 1280, 1536];
const BIFPN_WIDTHS: [usize; 8] = [64, 88, 112, 160, 224, 288, 384, 384];
const BIFPN_DEPTHS: [usize; 8] = [3, 4, 5, 6, 7, 7, 8, 8];
const HEAD_DEPTHS: [usize; 8] = [3, 3, 3, 4, 4, 4, 5, 5];

/// Network dimensions derived from the compound coefficient `D`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompoundScaling {
    pub d: usize,
    /// Square input side in pixels.
    pub input_size: usize,
    /// Channels of every BiFPN level (`W_bifpn`).
    pub bifpn_width: usize,
    /// Number of stacked BiFPN layers (`D_bifpn`).
    pub bifpn_depth: usize,
    /// Number of conv layers in each prediction head (`D_class`).
    pub head_depth: usize,
    /// EfficientNet backbone index (`B`).
    pub backbone: usize,
}

impl CompoundScaling {
    pub fn new(d: usize) -> Result<Self, ConfigError> {
        if d >= INPUT_SIZES.len() {
            return Err(ConfigError::InvalidCompoundCoefficient(d));
        }
        Ok(Self {
            d,
            input_size: INPUT_SIZES[d],
            bifpn_width: BIFPN_WIDTHS[d],
            bifpn_depth: BIFPN_DEPTHS[d],
            head_depth: HEAD_DEPTHS[d],
            backbone: d.min(6),
        })
    }

    pub fn with_input_size(mut self, input_size: usize) -> Self {
        self.input_size = input_size;
        self
    }

    /// Backbone channels of the C3, C4 and C5 outputs.
    ///
    /// Width grows by 1.1 per backbone step, rounded to a multiple of 8.
    pub fn backbone_channels(&self) -> [usize; 3] {
        let mult = 1.1f32.powi(self.backbone as i32);
        let round8 = |c: f32| (((c * mult) / 8.0).round() as usize).max(1) * 8;
        [round8(40.0), round8(112.0), round8(320.0)]
    }
}
