//! Detector orchestration: network composition, construction-time validation,
//! checkpoint loading and the train/infer output switch.

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use tracing::{info, warn};
use vision_core::interfaces::ImageDetections;

use crate::anchors::{Anchors, AnchorsConfig};
use crate::backbone::EfficientNetBackbone;
use crate::checkpoint::{load_weights, save_weights, weights_path, HyperParams, WeightsSpec};
use crate::config::CompoundScaling;
use crate::error::{ConfigError, ModelError, Result};
use crate::filter::{DetectionFilter, FilterConfig};
use crate::heads::{BoxHead, ClassHead};
use crate::layers::{FeatureExtractor, FeatureFusion, Phase, PredictionHead};
use crate::neck::BiFpn;

/// Whether the model was built for training or for inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelMode {
    Training,
    #[default]
    Inference,
}

/// Training behaviour applies only when the model is in training mode and the call asks for it.
pub fn effective_phase(mode: ModelMode, phase: Phase) -> Phase {
    match (mode, phase) {
        (ModelMode::Training, Phase::Train) => Phase::Train,
        _ => Phase::Infer,
    }
}

/// Head outputs concatenated over P3..P7 in anchor order.
#[derive(Debug, Clone)]
pub struct RawPredictions<B: Backend> {
    /// `[B, A, 4]` offsets relative to the anchors.
    pub boxes: Tensor<B, 3>,
    /// `[B, A, C]` class probabilities.
    pub class_scores: Tensor<B, 3>,
}

#[derive(Debug)]
pub enum DetectorOutput<B: Backend> {
    Raw(RawPredictions<B>),
    Detections(Vec<ImageDetections>),
}

/// Backbone, BiFPN and the two heads.
#[derive(Debug, Module)]
pub struct EfficientDet<B: Backend> {
    pub(crate) backbone: EfficientNetBackbone<B>,
    neck: BiFpn<B>,
    class_head: ClassHead<B>,
    box_head: BoxHead<B>,
    width: usize,
    head_depth: usize,
    anchors_per_location: usize,
}

impl<B: Backend> EfficientDet<B> {
    pub fn new(
        scaling: &CompoundScaling,
        anchors_per_location: usize,
        num_classes: usize,
        bidirectional: bool,
        device: &B::Device,
    ) -> Self {
        let width = scaling.bifpn_width;
        let head_depth = scaling.head_depth;
        Self {
            backbone: EfficientNetBackbone::new(scaling, device),
            neck: BiFpn::new(scaling, bidirectional, device),
            class_head: ClassHead::new(width, head_depth, anchors_per_location, num_classes, device),
            box_head: BoxHead::new(width, head_depth, anchors_per_location, device),
            width,
            head_depth,
            anchors_per_location,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_head.num_classes()
    }

    /// Run every stage and concatenate per-level head outputs along the anchor axis.
    pub fn forward_raw(&self, images: Tensor<B, 4>, phase: Phase) -> RawPredictions<B> {
        let features = self.backbone.extract(images, phase);
        let pyramid = self.neck.fuse(features, phase);
        let boxes: Vec<Tensor<B, 3>> = pyramid
            .iter()
            .map(|level| self.box_head.predict(level.clone(), phase))
            .collect();
        let class_scores: Vec<Tensor<B, 3>> = pyramid
            .into_iter()
            .map(|level| self.class_head.predict(level, phase))
            .collect();
        RawPredictions {
            boxes: Tensor::cat(boxes, 1),
            class_scores: Tensor::cat(class_scores, 1),
        }
    }

    /// Fresh classification head for `num_classes`; everything else is kept.
    pub fn with_class_head(mut self, num_classes: usize, device: &B::Device) -> Self {
        self.class_head = ClassHead::new(
            self.width,
            self.head_depth,
            self.anchors_per_location,
            num_classes,
            device,
        );
        self
    }

    /// Exclude backbone parameters from gradient tracking.
    pub fn freeze_backbone(mut self) -> Self {
        self.backbone = self.backbone.no_grad();
        self
    }
}

/// User-facing construction options.
#[derive(Debug, Clone)]
pub struct EfficientDetConfig {
    pub num_classes: Option<usize>,
    /// Compound coefficient, 0..=7.
    pub d: usize,
    pub bidirectional: bool,
    pub freeze_backbone: bool,
    /// `None`, `"imagenet"` or a named checkpoint under `weights_root`.
    pub weights: Option<String>,
    pub custom_head_classifier: bool,
    pub mode: ModelMode,
    pub weights_root: PathBuf,
    /// Overrides the input size of the compound scaling table.
    pub input_size: Option<usize>,
    pub anchors: AnchorsConfig,
    pub filter: FilterConfig,
}

impl Default for EfficientDetConfig {
    fn default() -> Self {
        Self {
            num_classes: None,
            d: 0,
            bidirectional: true,
            freeze_backbone: false,
            weights: Some("imagenet".to_string()),
            custom_head_classifier: false,
            mode: ModelMode::Inference,
            weights_root: PathBuf::from("weights"),
            input_size: None,
            anchors: AnchorsConfig::default(),
            filter: FilterConfig::default(),
        }
    }
}

/// Outcome of validating an [`EfficientDetConfig`]. No tensors involved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub weights: WeightsSpec,
    pub scaling: CompoundScaling,
    pub bidirectional: bool,
    /// Classes of the final classification head.
    pub num_classes: usize,
    /// Checkpoint directory and its hyper-parameters when loading pretrained weights.
    pub checkpoint: Option<(PathBuf, HyperParams)>,
}

impl EfficientDetConfig {
    pub fn with_score_threshold(mut self, score_threshold: f32) -> Self {
        self.filter.score_threshold = score_threshold;
        self
    }

    /// Scaling for `d`; an explicit `input_size` wins over the one stored in a checkpoint.
    fn scaling_for(
        &self,
        d: usize,
        stored_input_size: Option<usize>,
    ) -> std::result::Result<CompoundScaling, ConfigError> {
        let scaling = CompoundScaling::new(d)?;
        Ok(match self.input_size.or(stored_input_size) {
            Some(size) => scaling.with_input_size(size),
            None => scaling,
        })
    }

    /// Validate the options and read checkpoint hyper-parameters.
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        if self.custom_head_classifier && self.num_classes.is_none() {
            return Err(ConfigError::MissingNumClasses.into());
        }
        let weights = WeightsSpec::parse(self.weights.as_deref())?;
        if self.custom_head_classifier && weights.is_from_scratch() {
            return Err(ConfigError::CustomHeadWithoutCheckpoint.into());
        }

        let mut d = self.d;
        let mut bidirectional = self.bidirectional;
        let mut checkpoint = None;
        if let Some(dir) = weights.checkpoint_dir(&self.weights_root) {
            let hp = HyperParams::load(&dir)?;
            if let Some(requested) = self.num_classes {
                if requested != hp.n_classes && !self.custom_head_classifier {
                    return Err(ConfigError::NumClassesMismatch {
                        weights: self.weights.clone().unwrap_or_default(),
                        checkpoint: hp.n_classes,
                        requested,
                    }
                    .into());
                }
            }
            if hp.efficientdet != d {
                warn!(
                    requested = d,
                    checkpoint = hp.efficientdet,
                    "compound coefficient taken from the checkpoint"
                );
                d = hp.efficientdet;
            }
            if hp.bidirectional != bidirectional {
                warn!(
                    requested = bidirectional,
                    checkpoint = hp.bidirectional,
                    "bidirectional flag taken from the checkpoint"
                );
                bidirectional = hp.bidirectional;
            }
            checkpoint = Some((dir, hp));
        }

        let num_classes = self
            .num_classes
            .or_else(|| checkpoint.as_ref().map(|(_, hp)| hp.n_classes))
            .ok_or(ConfigError::MissingNumClasses)?;

        let stored_input_size = checkpoint.as_ref().and_then(|(_, hp)| hp.input_size);
        Ok(ResolvedConfig {
            weights,
            scaling: self.scaling_for(d, stored_input_size)?,
            bidirectional,
            num_classes,
            checkpoint,
        })
    }

    /// Validate, build the network and load weights.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Detector<B>> {
        let resolved = self.resolve()?;
        let per_location = self.anchors.anchors_per_location();
        let mut class_names = Vec::new();

        let network = match &resolved.checkpoint {
            Some((dir, hp)) => {
                let network = EfficientDet::new(
                    &resolved.scaling,
                    per_location,
                    hp.n_classes,
                    resolved.bidirectional,
                    device,
                );
                info!(checkpoint = %dir.display(), "loading detector weights");
                let network = load_weights(network, &weights_path(dir), device)?;
                if self.custom_head_classifier {
                    info!(
                        num_classes = resolved.num_classes,
                        "replacing the classification head"
                    );
                    network.with_class_head(resolved.num_classes, device)
                } else {
                    class_names = hp.class_names();
                    network
                }
            }
            None => {
                let mut network = EfficientDet::new(
                    &resolved.scaling,
                    per_location,
                    resolved.num_classes,
                    resolved.bidirectional,
                    device,
                );
                if resolved.weights == WeightsSpec::ImageNet {
                    let stem = imagenet_backbone_path(&self.weights_root, resolved.scaling.backbone);
                    if stem.with_extension("bin").is_file() {
                        info!(path = %stem.display(), "loading ImageNet backbone weights");
                        network.backbone = load_weights(network.backbone, &stem, device)?;
                    } else {
                        warn!(
                            path = %stem.display(),
                            "ImageNet backbone weights not found locally, backbone stays randomly initialized"
                        );
                    }
                }
                network
            }
        };

        let network = if self.freeze_backbone {
            network.freeze_backbone()
        } else {
            network
        };
        Ok(Detector::assemble(
            network,
            resolved.scaling,
            &self.anchors,
            self.filter,
            self.mode,
            class_names,
        ))
    }
}

/// Stem of the local ImageNet backbone weights for EfficientNet-B`backbone`.
pub fn imagenet_backbone_path(weights_root: &Path, backbone: usize) -> PathBuf {
    weights_root
        .join("imagenet")
        .join(format!("efficientnet-b{backbone}"))
}

/// A network with its anchors, filter and mode.
#[derive(Debug)]
pub struct Detector<B: Backend> {
    network: EfficientDet<B>,
    filter: DetectionFilter,
    mode: ModelMode,
    scaling: CompoundScaling,
    bidirectional: bool,
    class_names: Vec<String>,
}

impl<B: Backend> Detector<B> {
    fn assemble(
        network: EfficientDet<B>,
        scaling: CompoundScaling,
        anchors: &AnchorsConfig,
        filter: FilterConfig,
        mode: ModelMode,
        class_names: Vec<String>,
    ) -> Self {
        let anchors = Anchors::generate(anchors, scaling.input_size);
        let bidirectional = network.neck.is_bidirectional();
        Self {
            network,
            filter: DetectionFilter::new(anchors, filter),
            mode,
            scaling,
            bidirectional,
            class_names,
        }
    }

    /// Load a checkpoint directory, or a named checkpoint under `base.weights_root`.
    ///
    /// An explicit `num_classes` swaps in a fresh classification head after loading.
    pub fn from_pretrained(
        checkpoint: &str,
        num_classes: Option<usize>,
        base: &EfficientDetConfig,
        device: &B::Device,
    ) -> Result<Self> {
        let dir = resolve_checkpoint_dir(checkpoint, &base.weights_root)?;
        let hp = HyperParams::load(&dir)?;
        let scaling = base.scaling_for(hp.efficientdet, hp.input_size)?;
        let network = EfficientDet::new(
            &scaling,
            base.anchors.anchors_per_location(),
            hp.n_classes,
            hp.bidirectional,
            device,
        );
        info!(checkpoint = %dir.display(), "loading detector weights");
        let mut network = load_weights(network, &weights_path(&dir), device)?;
        let mut class_names = hp.class_names();
        if let Some(n) = num_classes {
            info!(num_classes = n, "loading a custom classification head");
            network = network.with_class_head(n, device);
            class_names.clear();
        }
        if base.freeze_backbone {
            network = network.freeze_backbone();
        }
        Ok(Self::assemble(
            network,
            scaling,
            &base.anchors,
            base.filter,
            base.mode,
            class_names,
        ))
    }

    /// Training mode yields raw predictions, inference mode filtered detections.
    pub fn forward(&self, images: Tensor<B, 4>, phase: Phase) -> Result<DetectorOutput<B>> {
        self.check_input(&images)?;
        let phase = effective_phase(self.mode, phase);
        let raw = self.network.forward_raw(images, phase);
        match self.mode {
            ModelMode::Training => Ok(DetectorOutput::Raw(raw)),
            ModelMode::Inference => self
                .filter
                .filter(raw.boxes, raw.class_scores)
                .map(DetectorOutput::Detections),
        }
    }

    /// Decode and filter regardless of the model mode.
    pub fn detect(&self, images: Tensor<B, 4>) -> Result<Vec<ImageDetections>> {
        self.check_input(&images)?;
        let raw = self.network.forward_raw(images, Phase::Infer);
        self.filter.filter(raw.boxes, raw.class_scores)
    }

    fn check_input(&self, images: &Tensor<B, 4>) -> Result<()> {
        let [_, channels, height, width] = images.dims();
        let size = self.scaling.input_size;
        if channels != 3 || height != size || width != size {
            return Err(ModelError::Shape(format!(
                "expected images [B, 3, {size}, {size}], got {:?}",
                images.dims()
            )));
        }
        Ok(())
    }

    /// Write `hp.json` and the weights into `dir`.
    pub fn save_checkpoint(&self, dir: &Path) -> Result<()> {
        let hp = HyperParams {
            efficientdet: self.scaling.d,
            bidirectional: self.bidirectional,
            n_classes: self.num_classes(),
            classes_names: self.class_names.join(","),
            input_size: Some(self.scaling.input_size),
        };
        hp.save(dir)?;
        save_weights(self.network.clone(), &weights_path(dir))?;
        info!(dir = %dir.display(), "checkpoint saved");
        Ok(())
    }

    pub fn score_threshold(&self) -> f32 {
        self.filter.score_threshold()
    }

    pub fn set_score_threshold(&mut self, value: f32) {
        self.filter.set_score_threshold(value);
    }

    pub fn mode(&self) -> ModelMode {
        self.mode
    }

    pub fn num_classes(&self) -> usize {
        self.network.num_classes()
    }

    pub fn input_size(&self) -> usize {
        self.scaling.input_size
    }

    pub fn scaling(&self) -> &CompoundScaling {
        &self.scaling
    }

    pub fn anchors(&self) -> &Anchors {
        self.filter.anchors()
    }

    pub fn filter(&self) -> &DetectionFilter {
        &self.filter
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn set_class_names(&mut self, names: Vec<String>) {
        self.class_names = names;
    }

    pub fn network(&self) -> &EfficientDet<B> {
        &self.network
    }

    /// Swap in updated parameters, e.g. after an optimizer step.
    pub fn with_network(mut self, network: EfficientDet<B>) -> Self {
        self.network = network;
        self
    }

}

fn resolve_checkpoint_dir(checkpoint: &str, weights_root: &Path) -> Result<PathBuf> {
    let path = Path::new(checkpoint);
    if path.is_dir() {
        return Ok(path.to_path_buf());
    }
    match WeightsSpec::parse(Some(checkpoint)) {
        Ok(named @ WeightsSpec::Pretrained(_)) => named
            .checkpoint_dir(weights_root)
            .ok_or_else(|| ConfigError::UnknownCheckpoint(path.to_path_buf()).into()),
        _ => Err(ConfigError::UnknownCheckpoint(path.to_path_buf()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_phase_requires_both_training_flags() {
        assert_eq!(effective_phase(ModelMode::Training, Phase::Train), Phase::Train);
        assert_eq!(effective_phase(ModelMode::Training, Phase::Infer), Phase::Infer);
        assert_eq!(effective_phase(ModelMode::Inference, Phase::Train), Phase::Infer);
        assert_eq!(effective_phase(ModelMode::Inference, Phase::Infer), Phase::Infer);
    }

    #[test]
    fn custom_head_without_num_classes_is_rejected_first() {
        let cfg = EfficientDetConfig {
            custom_head_classifier: true,
            num_classes: None,
            weights: Some("not-a-checkpoint".into()),
            ..Default::default()
        };
        assert!(matches!(
            cfg.resolve(),
            Err(ModelError::Config(ConfigError::MissingNumClasses))
        ));
    }

    #[test]
    fn custom_head_needs_checkpoint_weights() {
        for weights in [None, Some("imagenet".to_string())] {
            let cfg = EfficientDetConfig {
                custom_head_classifier: true,
                num_classes: Some(3),
                weights,
                ..Default::default()
            };
            assert!(matches!(
                cfg.resolve(),
                Err(ModelError::Config(ConfigError::CustomHeadWithoutCheckpoint))
            ));
        }
    }

    #[test]
    fn scratch_without_num_classes_is_rejected() {
        let cfg = EfficientDetConfig {
            weights: None,
            ..Default::default()
        };
        assert!(matches!(
            cfg.resolve(),
            Err(ModelError::Config(ConfigError::MissingNumClasses))
        ));
    }

    #[test]
    fn unknown_weights_are_rejected() {
        let cfg = EfficientDetConfig {
            num_classes: Some(2),
            weights: Some("D3-COCO".into()),
            ..Default::default()
        };
        assert!(matches!(
            cfg.resolve(),
            Err(ModelError::Config(ConfigError::UnknownWeights { .. }))
        ));
    }

    #[test]
    fn checkpoint_overrides_scaling_and_class_count() {
        let root = tempfile::tempdir().unwrap();
        HyperParams {
            efficientdet: 1,
            bidirectional: false,
            n_classes: 20,
            classes_names: String::new(),
            input_size: Some(256),
        }
        .save(&root.path().join("D0-VOC"))
        .unwrap();

        let cfg = EfficientDetConfig {
            weights: Some("D0-VOC".into()),
            weights_root: root.path().to_path_buf(),
            ..Default::default()
        };
        let resolved = cfg.resolve().unwrap();
        assert_eq!(resolved.scaling.d, 1);
        assert_eq!(resolved.scaling.input_size, 256);
        assert!(!resolved.bidirectional);
        assert_eq!(resolved.num_classes, 20);

        let explicit_size = EfficientDetConfig {
            input_size: Some(384),
            ..cfg.clone()
        };
        assert_eq!(explicit_size.resolve().unwrap().scaling.input_size, 384);

        let mismatch = EfficientDetConfig {
            num_classes: Some(3),
            ..cfg.clone()
        };
        assert!(matches!(
            mismatch.resolve(),
            Err(ModelError::Config(ConfigError::NumClassesMismatch {
                checkpoint: 20,
                requested: 3,
                ..
            }))
        ));

        let custom = EfficientDetConfig {
            num_classes: Some(3),
            custom_head_classifier: true,
            ..cfg
        };
        assert_eq!(custom.resolve().unwrap().num_classes, 3);
    }
}
