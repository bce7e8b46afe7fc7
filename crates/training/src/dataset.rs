//! Labelme rectangle annotations → resized, normalized training batches.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vision_core::preprocess::prepare;

use crate::error::{TrainingError, TrainingResult};
use crate::targets::GroundTruth;

#[derive(Debug, Clone, Deserialize)]
pub struct LabelmeShape {
    pub label: String,
    pub points: Vec<[f32; 2]>,
    #[serde(default = "default_shape_type")]
    pub shape_type: String,
}

fn default_shape_type() -> String {
    "rectangle".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelmeAnnotation {
    pub image_path: String,
    #[serde(default)]
    pub shapes: Vec<LabelmeShape>,
}

/// One image with its boxes in source pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelmeSample {
    pub image: PathBuf,
    pub boxes: Vec<GroundTruth>,
}

#[derive(Debug, Clone)]
pub struct LabelmeDataset {
    pub root: PathBuf,
    pub classes: Vec<String>,
    pub samples: Vec<LabelmeSample>,
}

impl LabelmeDataset {
    /// Read every `*.json` annotation directly under `root`.
    ///
    /// Non-rectangle shapes are skipped; labels outside `classes` are an error.
    pub fn load(root: &Path, classes: &[String]) -> TrainingResult<Self> {
        let entries = fs::read_dir(root).map_err(|source| TrainingError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| TrainingError::Io {
                    path: root.to_path_buf(),
                    source,
                })?
                .path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut samples = Vec::with_capacity(paths.len());
        for path in paths {
            let raw = fs::read(&path).map_err(|source| TrainingError::Io {
                path: path.clone(),
                source,
            })?;
            let annotation: LabelmeAnnotation = serde_json::from_slice(&raw)
                .map_err(|source| TrainingError::Annotation {
                    path: path.clone(),
                    source,
                })?;
            samples.push(sample_from_annotation(root, &path, annotation, classes)?);
        }
        debug!(root = %root.display(), samples = samples.len(), "loaded labelme dataset");
        Ok(Self {
            root: root.to_path_buf(),
            classes: classes.to_vec(),
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn sample_from_annotation(
    root: &Path,
    path: &Path,
    annotation: LabelmeAnnotation,
    classes: &[String],
) -> TrainingResult<LabelmeSample> {
    let mut boxes = Vec::new();
    for shape in annotation.shapes {
        if shape.shape_type != "rectangle" {
            warn!(path = %path.display(), shape_type = %shape.shape_type, "skipping non-rectangle shape");
            continue;
        }
        let label = classes
            .iter()
            .position(|c| *c == shape.label)
            .ok_or_else(|| {
                TrainingError::Validation(format!(
                    "{}: label `{}` is not one of {classes:?}",
                    path.display(),
                    shape.label
                ))
            })?;
        let [a, b] = match shape.points.as_slice() {
            [a, b] => [*a, *b],
            other => {
                return Err(TrainingError::Validation(format!(
                    "{}: rectangle needs 2 points, got {}",
                    path.display(),
                    other.len()
                )))
            }
        };
        boxes.push(GroundTruth {
            bbox: [a[0].min(b[0]), a[1].min(b[1]), a[0].max(b[0]), a[1].max(b[1])],
            label,
        });
    }
    Ok(LabelmeSample {
        image: root.join(annotation.image_path),
        boxes,
    })
}

/// Images `[B, 3, S, S]` plus boxes rescaled to model input pixels.
#[derive(Debug, Clone)]
pub struct TrainBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub boxes: Vec<Vec<GroundTruth>>,
}

pub fn collate<B: Backend>(
    samples: &[LabelmeSample],
    input_size: usize,
    device: &B::Device,
) -> TrainingResult<TrainBatch<B>> {
    if samples.is_empty() {
        return Err(TrainingError::Validation("cannot collate an empty batch".into()));
    }
    let size = input_size as u32;
    let mut pixels = Vec::with_capacity(samples.len() * 3 * input_size * input_size);
    let mut boxes = Vec::with_capacity(samples.len());
    for sample in samples {
        let img = image::open(&sample.image).map_err(|source| TrainingError::Image {
            path: sample.image.clone(),
            source,
        })?;
        let prepared = prepare(&img, size);
        let (sx, sy) = prepared.scale_back;
        pixels.extend(prepared.chw);
        boxes.push(
            sample
                .boxes
                .iter()
                .map(|gt| GroundTruth {
                    bbox: [
                        gt.bbox[0] / sx,
                        gt.bbox[1] / sy,
                        gt.bbox[2] / sx,
                        gt.bbox[3] / sy,
                    ],
                    label: gt.label,
                })
                .collect(),
        );
    }
    let images = Tensor::from_data(
        TensorData::new(pixels, [samples.len(), 3, input_size, input_size]),
        device,
    );
    Ok(TrainBatch { images, boxes })
}
