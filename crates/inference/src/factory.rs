use anyhow::Context;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use cli_support::DetectorSettings;
use image::{DynamicImage, RgbaImage};
use models::{Detector as EfficientDetModel, EfficientDetConfig, FilterConfig, ModelMode};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use vision_core::boxes::scale_xyxy;
use vision_core::interfaces::{Detection, DetectionResult, Detector, Frame, ImageDetections};
use vision_core::preprocess::prepare;

use crate::InferenceBackend;

/// Filter thresholds for inference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceThresholds {
    pub score_thresh: f32,
    pub iou_thresh: f32,
    pub max_detections_per_class: usize,
    pub class_agnostic: bool,
}

impl Default for InferenceThresholds {
    fn default() -> Self {
        Self {
            score_thresh: 0.4,
            iou_thresh: 0.5,
            max_detections_per_class: 200,
            class_agnostic: false,
        }
    }
}

impl InferenceThresholds {
    pub fn from_settings(settings: &DetectorSettings) -> Self {
        Self {
            score_thresh: settings.filter.score_threshold,
            iou_thresh: settings.filter.iou_threshold,
            max_detections_per_class: settings.filter.max_detections_per_class,
            class_agnostic: settings.filter.class_agnostic,
        }
    }

    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig {
            score_threshold: self.score_thresh,
            iou_threshold: self.iou_thresh,
            max_detections_per_class: self.max_detections_per_class,
            class_agnostic: self.class_agnostic,
        }
    }
}

/// Checkpoint-backed detector. Boxes are reported in source image pixels.
pub struct EfficientDetDetector {
    model: Arc<Mutex<EfficientDetModel<InferenceBackend>>>,
    class_names: Vec<String>,
    input_size: usize,
}

impl EfficientDetDetector {
    pub fn new(model: EfficientDetModel<InferenceBackend>) -> Self {
        let class_names = model.class_names().to_vec();
        let input_size = model.input_size();
        Self {
            model: Arc::new(Mutex::new(model)),
            class_names,
            input_size,
        }
    }

    /// Class names stored in the checkpoint, empty when it has none.
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn score_threshold(&self) -> anyhow::Result<f32> {
        let model = self
            .model
            .lock()
            .map_err(|_| anyhow::anyhow!("detector mutex poisoned"))?;
        Ok(model.score_threshold())
    }

    pub fn detect_image(&self, img: &DynamicImage) -> anyhow::Result<ImageDetections> {
        let prepared = prepare(img, self.input_size as u32);
        let (sx, sy) = prepared.scale_back;
        let device = <InferenceBackend as Backend>::Device::default();
        let size = self.input_size;
        let images = Tensor::<InferenceBackend, 4>::from_data(
            TensorData::new(prepared.chw, [1, 3, size, size]),
            &device,
        );
        let model = self
            .model
            .lock()
            .map_err(|_| anyhow::anyhow!("detector mutex poisoned"))?;
        let per_image = model.detect(images)?;
        let dets = per_image.into_iter().next().unwrap_or_default();
        debug!(detections = dets.len(), "image processed");
        Ok(ImageDetections::from_unsorted(
            dets.iter()
                .map(|d| Detection {
                    bbox: scale_xyxy(d.bbox, sx, sy),
                    ..d
                })
                .collect(),
        ))
    }

    fn frame_image(frame: &Frame) -> anyhow::Result<DynamicImage> {
        let (w, h) = frame.size;
        if let Some(rgba) = &frame.rgba {
            let img = RgbaImage::from_raw(w, h, rgba.clone())
                .context("frame RGBA buffer does not match its size")?;
            return Ok(DynamicImage::ImageRgba8(img));
        }
        let path = frame
            .path
            .as_ref()
            .context("frame has neither pixels nor a path")?;
        image::open(path).with_context(|| format!("failed to open {}", path.display()))
    }
}

impl Detector for EfficientDetDetector {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<DetectionResult> {
        let img = Self::frame_image(frame)?;
        let detections = self.detect_image(&img)?;
        Ok(DetectionResult {
            frame_id: frame.id,
            confidence: detections.scores.first().copied().unwrap_or(0.0),
            detections,
        })
    }

    fn set_score_threshold(&mut self, score: f32) {
        match self.model.lock() {
            Ok(mut model) => model.set_score_threshold(score),
            Err(_) => tracing::warn!("detector mutex poisoned, score threshold unchanged"),
        }
    }
}

/// Loads checkpoints into ready-to-use detectors.
pub struct InferenceFactory;

impl InferenceFactory {
    /// `checkpoint` is a checkpoint directory or a named checkpoint under the settings'
    /// weights root.
    pub fn load(
        &self,
        thresh: InferenceThresholds,
        checkpoint: &str,
        settings: &DetectorSettings,
    ) -> anyhow::Result<EfficientDetDetector> {
        let device = <InferenceBackend as Backend>::Device::default();
        let base = EfficientDetConfig {
            mode: ModelMode::Inference,
            weights_root: settings.weights_root.clone(),
            filter: thresh.filter_config(),
            ..Default::default()
        };
        let model = EfficientDetModel::<InferenceBackend>::from_pretrained(
            checkpoint, None, &base, &device,
        )
        .with_context(|| format!("failed to load detector checkpoint {checkpoint}"))?;
        info!(
            checkpoint,
            num_classes = model.num_classes(),
            input_size = model.input_size(),
            score_threshold = model.score_threshold(),
            "detector ready"
        );
        Ok(EfficientDetDetector::new(model))
    }

    pub fn build(
        &self,
        thresh: InferenceThresholds,
        checkpoint: &str,
        settings: &DetectorSettings,
    ) -> anyhow::Result<Box<dyn Detector + Send + Sync>> {
        Ok(Box::new(self.load(thresh, checkpoint, settings)?))
    }
}
