pub mod anchors;
pub mod backbone;
pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod detector;
pub mod error;
pub mod filter;
pub mod heads;
pub mod layers;
pub mod neck;

pub use anchors::{Anchor, Anchors, AnchorsConfig};
pub use codec::BoxCodec;
pub use config::CompoundScaling;
pub use detector::{
    effective_phase, Detector, DetectorOutput, EfficientDet, EfficientDetConfig, ModelMode,
    RawPredictions,
};
pub use error::{ConfigError, ModelError, Result};
pub use filter::{DetectionFilter, FilterConfig};
pub use layers::Phase;

pub mod prelude {
    pub use super::{
        effective_phase, Anchors, AnchorsConfig, BoxCodec, CompoundScaling, ConfigError,
        DetectionFilter, Detector, DetectorOutput, EfficientDet, EfficientDetConfig,
        FilterConfig, ModelError, ModelMode, Phase, RawPredictions,
    };
}
