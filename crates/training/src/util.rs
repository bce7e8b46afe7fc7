use anyhow::Context;
use burn::backend::Autodiff;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use clap::{ArgAction, Parser, ValueEnum};
use cli_support::{DetectorSettings, RuntimeArgs};
use models::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::dataset::{collate, LabelmeDataset, LabelmeSample, TrainBatch};
use crate::error::{TrainingError, TrainingResult};
use crate::losses::{EfficientDetFocalLoss, EfficientDetHuberLoss};
use crate::targets::TargetAssigner;
use crate::TrainBackend;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train an EfficientDet detector on a labelme dataset")]
pub struct TrainArgs {
    /// Directory with labelme `*.json` annotations.
    #[arg(long)]
    pub dataset_root: PathBuf,
    /// Comma separated class names, in label index order.
    #[arg(long)]
    pub classes: String,
    /// Compound coefficient D (0..=7).
    #[arg(long, default_value_t = 0)]
    pub efficientdet: usize,
    /// BiFPN (true) or top-down FPN (false).
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pub bidirectional: bool,
    /// Keep backbone parameters fixed.
    #[arg(long, default_value_t = false)]
    pub freeze_backbone: bool,
    /// `imagenet`, a named checkpoint, or `none` for random init.
    #[arg(long, default_value = "imagenet")]
    pub weights: String,
    /// Replace the checkpoint's classification head with one for `--classes`.
    #[arg(long, default_value_t = false)]
    pub custom_head: bool,
    /// Number of epochs.
    #[arg(long, default_value_t = 1)]
    pub epochs: usize,
    /// Batch size.
    #[arg(long, default_value_t = 2)]
    pub batch_size: usize,
    /// Learning rate.
    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,
    /// Checkpoint directory to write `hp.json` and the weights into.
    #[arg(long, default_value = "checkpoints/efficientdet")]
    pub checkpoint_out: PathBuf,
    /// Override the input size of the compound scaling table.
    #[arg(long)]
    pub input_size: Option<usize>,
    /// Seed for sample shuffling.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

impl TrainArgs {
    pub fn class_names(&self) -> Vec<String> {
        parse_classes(&self.classes)
    }

    pub fn detector_config(&self, settings: &DetectorSettings, num_classes: usize) -> EfficientDetConfig {
        let weights = match self.weights.as_str() {
            "none" | "" => None,
            other => Some(other.to_string()),
        };
        EfficientDetConfig {
            num_classes: Some(num_classes),
            d: self.efficientdet,
            bidirectional: self.bidirectional,
            freeze_backbone: self.freeze_backbone,
            weights,
            custom_head_classifier: self.custom_head,
            mode: ModelMode::Training,
            weights_root: settings.weights_root.clone(),
            input_size: self.input_size,
            filter: FilterConfig {
                score_threshold: settings.filter.score_threshold,
                iou_threshold: settings.filter.iou_threshold,
                max_detections_per_class: settings.filter.max_detections_per_class,
                class_agnostic: settings.filter.class_agnostic,
            },
            ..Default::default()
        }
    }
}

pub fn parse_classes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct TrainOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub lr: f64,
    pub seed: u64,
}

/// Classification and regression parts of one batch loss.
#[derive(Debug, Clone)]
pub struct BatchLoss<B: Backend> {
    pub classification: Tensor<B, 1>,
    pub regression: Tensor<B, 1>,
}

impl<B: Backend> BatchLoss<B> {
    pub fn total(self) -> Tensor<B, 1> {
        self.classification + self.regression
    }
}

/// Forward a batch, assign anchor targets and evaluate both losses.
pub fn batch_loss<B: Backend>(
    network: &EfficientDet<B>,
    batch: TrainBatch<B>,
    anchors: &Anchors,
    phase: Phase,
    device: &B::Device,
) -> TrainingResult<BatchLoss<B>> {
    let num_classes = network.num_classes();
    let (cls_targets, reg_targets) =
        TargetAssigner::default().assign_batch::<B>(anchors, &batch.boxes, num_classes, device)?;
    let raw = network.forward_raw(batch.images, phase);
    if raw.boxes.dims()[1] != anchors.len() {
        return Err(TrainingError::Validation(format!(
            "network produced {} anchors, expected {}",
            raw.boxes.dims()[1],
            anchors.len()
        )));
    }
    Ok(BatchLoss {
        classification: EfficientDetFocalLoss::default().forward(cls_targets, raw.class_scores)?,
        regression: EfficientDetHuberLoss::default().forward(reg_targets, raw.boxes)?,
    })
}

fn scalar<B: Backend>(t: Tensor<B, 1>) -> f32 {
    t.into_data()
        .to_vec::<f32>()
        .unwrap_or_default()
        .first()
        .copied()
        .unwrap_or(f32::NAN)
}

/// Adam over shuffled mini-batches. Returns the trained detector and per-epoch mean loss.
pub fn train_detector<B: AutodiffBackend>(
    detector: Detector<B>,
    dataset: &LabelmeDataset,
    opts: TrainOptions,
    device: &B::Device,
) -> TrainingResult<(Detector<B>, Vec<f32>)> {
    if dataset.is_empty() {
        return Err(TrainingError::Validation("dataset has no samples".into()));
    }
    let anchors = detector.anchors().clone();
    let input_size = detector.input_size();
    let phase = effective_phase(detector.mode(), Phase::Train);
    let mut network = detector.network().clone();
    let mut optim = AdamConfig::new().init();
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut order: Vec<usize> = (0..dataset.len()).collect();
    let mut epoch_losses = Vec::with_capacity(opts.epochs);

    for epoch in 0..opts.epochs {
        order.shuffle(&mut rng);
        let mut losses = Vec::new();
        for chunk in order.chunks(opts.batch_size.max(1)) {
            let samples: Vec<LabelmeSample> =
                chunk.iter().map(|i| dataset.samples[*i].clone()).collect();
            let batch = collate::<B>(&samples, input_size, device)?;
            let parts = batch_loss(&network, batch, &anchors, phase, device)?;
            let cls = scalar(parts.classification.clone().detach());
            let reg = scalar(parts.regression.clone().detach());
            let loss = parts.total();
            let grads = GradientsParams::from_grads(loss.backward(), &network);
            network = optim.step(opts.lr, network, grads);
            tracing::debug!(epoch, classification = cls, regression = reg, "step");
            losses.push(cls + reg);
        }
        let avg_loss = losses.iter().sum::<f32>() / losses.len().max(1) as f32;
        info!(epoch, avg_loss, "epoch finished");
        epoch_losses.push(avg_loss);
    }
    Ok((detector.with_network(network), epoch_losses))
}

type ADBackend = Autodiff<TrainBackend>;

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.backend)?;
    let settings = args.runtime.settings();
    let classes = args.class_names();
    if classes.is_empty() {
        anyhow::bail!("--classes must name at least one class");
    }

    let dataset = LabelmeDataset::load(&args.dataset_root, &classes)
        .with_context(|| format!("loading dataset {}", args.dataset_root.display()))?;
    if dataset.is_empty() {
        anyhow::bail!("no annotations found under {}", args.dataset_root.display());
    }
    info!(samples = dataset.len(), classes = classes.len(), "dataset ready");

    let device = <ADBackend as Backend>::Device::default();
    let detector = args
        .detector_config(&settings, classes.len())
        .init::<ADBackend>(&device)
        .context("building detector")?;
    let opts = TrainOptions {
        epochs: args.epochs,
        batch_size: args.batch_size,
        lr: args.lr,
        seed: args.seed,
    };
    let (mut detector, _) = train_detector(detector, &dataset, opts, &device)?;
    detector.set_class_names(classes);
    detector
        .save_checkpoint(&args.checkpoint_out)
        .with_context(|| format!("saving checkpoint to {}", args.checkpoint_out.display()))?;
    info!(dir = %args.checkpoint_out.display(), "saved checkpoint");
    Ok(())
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            warn!("built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}
