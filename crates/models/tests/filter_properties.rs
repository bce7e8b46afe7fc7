use burn::backend::NdArray;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use models::prelude::*;
use vision_core::boxes::iou_xyxy;

type TestBackend = NdArray<f32>;

const INPUT: usize = 128;

fn filter(config: FilterConfig) -> DetectionFilter {
    DetectionFilter::new(Anchors::generate(&AnchorsConfig::default(), INPUT), config)
}

/// Deterministic pseudo-random values in [0, 1).
fn noise(len: usize, seed: u32) -> Vec<f32> {
    let mut state = seed.wrapping_mul(2_654_435_761).max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state % 10_000) as f32 / 10_000.0
        })
        .collect()
}

#[test]
fn nothing_above_threshold_yields_empty_lists() {
    let f = filter(FilterConfig::default());
    let anchors = f.anchors().len();
    let boxes = vec![0.0; 2 * anchors * 4];
    let scores = vec![0.05; 2 * anchors * 3];
    let out = f.filter_slices(&boxes, &scores, 2, 3).unwrap();
    assert_eq!(out.len(), 2);
    assert!(out.iter().all(|dets| dets.is_empty()));
}

#[test]
fn kept_same_class_boxes_do_not_overlap_beyond_iou_threshold() {
    let config = FilterConfig {
        score_threshold: 0.3,
        ..Default::default()
    };
    let f = filter(config);
    let anchors = f.anchors().len();
    let classes = 4;
    let boxes: Vec<f32> = noise(anchors * 4, 7).into_iter().map(|v| v - 0.5).collect();
    let scores = noise(anchors * classes, 11);
    let out = f.filter_slices(&boxes, &scores, 1, classes).unwrap();
    let dets: Vec<_> = out[0].iter().collect();
    assert!(!dets.is_empty());

    for (i, a) in dets.iter().enumerate() {
        assert!(a.score >= 0.3);
        for b in &dets[i + 1..] {
            assert!(a.score >= b.score);
            if a.label == b.label {
                assert!(iou_xyxy(a.bbox, b.bbox) <= config.iou_threshold);
            }
        }
    }
    for label in 0..classes {
        let count = dets.iter().filter(|d| d.label == label).count();
        assert!(count <= config.max_detections_per_class);
    }
}

#[test]
fn class_agnostic_mode_suppresses_across_classes() {
    let f = filter(FilterConfig {
        score_threshold: 0.5,
        class_agnostic: true,
        ..Default::default()
    });
    let anchors = f.anchors().len();
    let boxes = vec![0.0; anchors * 4];
    let mut scores = vec![0.0; anchors * 2];
    // Two co-located templates of the first cell with different best classes.
    scores[3 * 2] = 0.9;
    scores[4 * 2 + 1] = 0.8;
    let out = f.filter_slices(&boxes, &scores, 1, 2).unwrap();
    assert_eq!(out[0].len(), 1);
    assert_eq!(out[0].labels[0], 0);
}

#[test]
fn tensor_entry_point_checks_shapes() {
    let device = <TestBackend as Backend>::Device::default();
    let f = filter(FilterConfig::default());
    let anchors = f.anchors().len();

    let boxes = Tensor::<TestBackend, 3>::from_data(
        TensorData::new(vec![0.0f32; anchors * 4], [1, anchors, 4]),
        &device,
    );
    let mut raw_scores = vec![0.0f32; anchors];
    raw_scores[0] = 0.95;
    let scores = Tensor::<TestBackend, 3>::from_data(
        TensorData::new(raw_scores, [1, anchors, 1]),
        &device,
    );
    let out = f.filter(boxes.clone(), scores).unwrap();
    assert_eq!(out[0].len(), 1);
    let expected = f.anchors().as_slice()[0].to_xyxy();
    let clipped = [expected[0].max(0.0), expected[1].max(0.0), expected[2], expected[3]];
    assert_eq!(out[0].boxes[0], clipped);

    let short = Tensor::<TestBackend, 3>::zeros([1, anchors - 1, 1], &device);
    assert!(matches!(f.filter(boxes, short), Err(ModelError::Shape(_))));

    let wrong = Tensor::<TestBackend, 3>::zeros([1, 10, 4], &device);
    let wrong_scores = Tensor::<TestBackend, 3>::zeros([1, 10, 1], &device);
    assert!(matches!(
        f.filter(wrong, wrong_scores),
        Err(ModelError::Shape(_))
    ));
}
