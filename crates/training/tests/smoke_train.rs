use burn::backend::{ndarray::NdArray, Autodiff};
use burn::tensor::backend::Backend;
use models::prelude::*;
use std::fs;
use training::dataset::LabelmeDataset;
use training::util::{batch_loss, train_detector, TrainOptions};
use training::{collate, TrainingError};

type ADBackend = Autodiff<NdArray<f32>>;

fn synthetic_dataset(tmp: &tempfile::TempDir) -> anyhow::Result<LabelmeDataset> {
    for (idx, (x0, y0)) in [(10.0f32, 12.0f32), (40.0, 30.0)].iter().enumerate() {
        let name = format!("frame_{idx:05}");
        let img = image::RgbImage::from_fn(64, 48, |x, y| {
            if x as f32 >= *x0 && y as f32 >= *y0 {
                image::Rgb([255, 0, 0])
            } else {
                image::Rgb([0, 0, 40])
            }
        });
        img.save(tmp.path().join(format!("{name}.png")))?;
        let json = serde_json::json!({
            "imagePath": format!("{name}.png"),
            "imageWidth": 64,
            "imageHeight": 48,
            "shapes": [
                {"label": "polyp", "points": [[x0, y0], [x0 + 20.0, y0 + 16.0]], "shape_type": "rectangle"},
                {"label": "polyp", "points": [[1.0, 1.0], [3.0, 3.0], [2.0, 5.0]], "shape_type": "polygon"}
            ]
        });
        fs::write(tmp.path().join(format!("{name}.json")), serde_json::to_vec(&json)?)?;
    }
    Ok(LabelmeDataset::load(tmp.path(), &["polyp".to_string()])?)
}

fn scratch_config() -> EfficientDetConfig {
    EfficientDetConfig {
        num_classes: Some(1),
        weights: None,
        input_size: Some(128),
        mode: ModelMode::Training,
        ..Default::default()
    }
}

#[test]
fn labelme_loading_keeps_rectangles_only() {
    let temp = tempfile::tempdir().unwrap();
    let dataset = synthetic_dataset(&temp).unwrap();
    assert_eq!(dataset.len(), 2);
    let first = &dataset.samples[0];
    assert_eq!(first.boxes.len(), 1);
    assert_eq!(first.boxes[0].bbox, [10.0, 12.0, 30.0, 28.0]);
    assert_eq!(first.boxes[0].label, 0);

    let device = <ADBackend as Backend>::Device::default();
    let batch = collate::<ADBackend>(&dataset.samples, 128, &device).unwrap();
    assert_eq!(batch.images.dims(), [2, 3, 128, 128]);
    // 64x48 source → 128x128 input: x scaled by 2, y by 8/3.
    let scaled = batch.boxes[0][0].bbox;
    assert!((scaled[0] - 20.0).abs() < 1e-4);
    assert!((scaled[1] - 32.0).abs() < 1e-4);
}

#[test]
fn unknown_label_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    synthetic_dataset(&temp).unwrap();
    assert!(matches!(
        LabelmeDataset::load(temp.path(), &["tool".to_string()]),
        Err(TrainingError::Validation(_))
    ));
}

#[test]
fn smoke_train_step_and_checkpoint() {
    let temp = tempfile::tempdir().unwrap();
    let dataset = synthetic_dataset(&temp).unwrap();
    let device = <ADBackend as Backend>::Device::default();

    let detector = scratch_config().init::<ADBackend>(&device).unwrap();
    let batch = collate::<ADBackend>(&dataset.samples, 128, &device).unwrap();
    let parts = batch_loss(
        detector.network(),
        batch,
        detector.anchors(),
        Phase::Train,
        &device,
    )
    .unwrap();
    let total: f32 = parts.total().into_data().to_vec::<f32>().unwrap()[0];
    assert!(total.is_finite() && total > 0.0);

    let opts = TrainOptions {
        epochs: 1,
        batch_size: 2,
        lr: 1e-3,
        seed: 7,
    };
    let (mut detector, losses) = train_detector(detector, &dataset, opts, &device).unwrap();
    assert_eq!(losses.len(), 1);
    assert!(losses[0].is_finite());

    detector.set_class_names(vec!["polyp".into()]);
    let out = temp.path().join("ckpt");
    detector.save_checkpoint(&out).unwrap();
    assert!(out.join("hp.json").is_file());
    assert!(out.join("model.bin").is_file());
}
