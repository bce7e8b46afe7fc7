pub mod factory;

#[cfg(feature = "backend-wgpu")]
pub type InferenceBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type InferenceBackend = burn_ndarray::NdArray<f32>;

pub use factory::{EfficientDetDetector, InferenceFactory, InferenceThresholds};

/// Pascal VOC class names in label index order.
pub const VOC_CLASSES: [&str; 20] = [
    "aeroplane",
    "bicycle",
    "bird",
    "boat",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "diningtable",
    "dog",
    "horse",
    "motorbike",
    "person",
    "pottedplant",
    "sheep",
    "sofa",
    "train",
    "tvmonitor",
];

pub mod prelude {
    pub use crate::factory::{EfficientDetDetector, InferenceFactory, InferenceThresholds};
    pub use crate::{InferenceBackend, VOC_CLASSES};
}
