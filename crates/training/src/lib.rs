pub mod dataset;
pub mod error;
pub mod losses;
pub mod targets;
pub mod util;

pub use dataset::{collate, LabelmeDataset, LabelmeSample, TrainBatch};
pub use error::{TrainingError, TrainingResult};
pub use losses::{
    focal_loss, huber_loss, EfficientDetFocalLoss, EfficientDetHuberLoss, FocalLoss, HuberLoss,
    REGRESSION_LOSS_SCALE,
};
pub use targets::{AnchorState, AnchorTargets, GroundTruth, TargetAssigner};
pub use util::{run_train, train_detector, TrainArgs, TrainOptions};

/// Backend alias for training (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
