use burn::backend::{ndarray::NdArray, Autodiff};
use burn::tensor::activation::sigmoid;
use burn::tensor::{Tensor, TensorData};
use training::losses::{focal_loss, EfficientDetFocalLoss, EfficientDetHuberLoss, HuberLoss};
use training::TrainingError;

type B = NdArray<f32>;
type AD = Autodiff<NdArray<f32>>;

fn tensor3<Bk: burn::tensor::backend::Backend>(values: Vec<f32>, shape: [usize; 3]) -> Tensor<Bk, 3> {
    Tensor::from_data(TensorData::new(values, shape), &Default::default())
}

fn scalar<Bk: burn::tensor::backend::Backend>(t: Tensor<Bk, 1>) -> f32 {
    t.into_data().to_vec::<f32>().unwrap()[0]
}

#[test]
fn focal_single_anchor_matches_hand_computation() {
    // label [1, 0], state 1, prediction [0.9, 0.1]
    let targets = tensor3::<B>(vec![1.0, 0.0, 1.0], [1, 1, 3]);
    let preds = tensor3::<B>(vec![0.9, 0.1], [1, 1, 2]);
    let loss = scalar(EfficientDetFocalLoss::default().forward(targets, preds).unwrap());

    let term = 0.1f64.powf(1.5) * -(0.9f64.ln());
    let expected = (0.25 * term + 0.75 * term) as f32;
    assert!((loss - expected).abs() < 1e-6, "{loss} vs {expected}");
    assert!((loss - 0.003_331_8).abs() < 1e-6);
}

#[test]
fn huber_ten_anchor_scenario() {
    let mut targets = vec![0.0f32; 10 * 5];
    targets[..5].copy_from_slice(&[0.1, 0.1, 0.2, 0.2, 1.0]);
    let targets = tensor3::<B>(targets, [1, 10, 5]);
    let preds = tensor3::<B>(vec![0.0; 40], [1, 10, 4]);
    let loss = scalar(EfficientDetHuberLoss::default().forward(targets, preds).unwrap());
    // 50 * mean(0.005, 0.005, 0.02, 0.02) / (1 * 4)
    assert!((loss - 0.15625).abs() < 1e-6, "{loss}");
}

#[test]
fn all_ignored_anchors_give_finite_zero_losses() {
    let anchors = 6;
    let mut cls = vec![0.0f32; anchors * 3];
    let mut reg = vec![0.3f32; anchors * 5];
    for a in 0..anchors {
        cls[a * 3] = 1.0;
        cls[a * 3 + 2] = -1.0;
        reg[a * 5 + 4] = -1.0;
    }
    let focal = scalar(EfficientDetFocalLoss::default().forward(
        tensor3::<B>(cls, [1, anchors, 3]),
        tensor3::<B>(vec![0.3; anchors * 2], [1, anchors, 2]),
    ).unwrap());
    let huber = scalar(EfficientDetHuberLoss::default().forward(
        tensor3::<B>(reg, [1, anchors, 5]),
        tensor3::<B>(vec![0.0; anchors * 4], [1, anchors, 4]),
    ).unwrap());
    assert!(focal.is_finite() && focal == 0.0);
    assert!(huber.is_finite() && huber == 0.0);
}

#[test]
fn negatives_count_for_focal_but_not_for_huber() {
    // One negative anchor only: focal is positive, normalizer floors at 1.
    let focal = scalar(EfficientDetFocalLoss::default().forward(
        tensor3::<B>(vec![0.0, 0.0], [1, 1, 2]),
        tensor3::<B>(vec![0.5], [1, 1, 1]),
    ).unwrap());
    let expected = 0.75 * 0.5f32.powf(1.5) * -(0.5f32.ln());
    assert!((focal - expected).abs() < 1e-6);

    let huber = scalar(EfficientDetHuberLoss::default().forward(
        tensor3::<B>(vec![1.0, 1.0, 1.0, 1.0, 0.0], [1, 1, 5]),
        tensor3::<B>(vec![0.0; 4], [1, 1, 4]),
    ).unwrap());
    assert_eq!(huber, 0.0);
}

#[test]
fn from_logits_matches_explicit_sigmoid() {
    let targets = tensor3::<B>(vec![1.0, 0.0, 0.0, 1.0, 0.0, 1.0], [1, 2, 3]);
    let logits = tensor3::<B>(vec![2.0, -1.0, 0.5, -3.0, 4.0, 0.0], [1, 2, 3]);
    let a = focal_loss(targets.clone(), logits.clone(), 1.5, 0.25, true)
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    let b = focal_loss(targets, sigmoid(logits), 1.5, 0.25, false)
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert!(a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 1e-6));
}

#[test]
fn huber_is_quadratic_then_linear_and_continuous() {
    let huber = HuberLoss { delta: 1.0 };
    let eval = |e: f32| {
        let t = tensor3::<B>(vec![e], [1, 1, 1]);
        let p = tensor3::<B>(vec![0.0], [1, 1, 1]);
        huber.forward_no_reduction(t, p).into_data().to_vec::<f32>().unwrap()[0]
    };
    assert!((eval(0.01) - 0.5 * 0.0001).abs() < 1e-8);
    assert!((eval(10.0) - 9.5).abs() < 1e-5);
    let below = eval(1.0 - 1e-4);
    let at = eval(1.0);
    assert!((below - at).abs() < 1e-3);
    assert!((at - 0.5).abs() < 1e-6);
}

#[test]
fn focal_loss_is_differentiable_wrt_predictions() {
    let device = Default::default();
    let preds = Tensor::<AD, 3>::from_data(TensorData::new(vec![0.6f32, 0.3], [1, 1, 2]), &device)
        .require_grad();
    let targets = tensor3::<AD>(vec![1.0, 0.0, 1.0], [1, 1, 3]);
    let loss = EfficientDetFocalLoss::default()
        .forward(targets, preds.clone())
        .unwrap();
    let grads = loss.backward();
    let grad = preds.grad(&grads).expect("gradient");
    let grad = grad.into_data().to_vec::<f32>().unwrap();
    // Raising the positive-class probability lowers the loss, raising the negative one raises it.
    assert!(grad[0] < 0.0);
    assert!(grad[1] > 0.0);
}

#[test]
fn out_of_contract_anchor_states_are_rejected() {
    let focal = EfficientDetFocalLoss::default().forward(
        tensor3::<B>(vec![1.0, 0.0, 2.0], [1, 1, 3]),
        tensor3::<B>(vec![0.9, 0.1], [1, 1, 2]),
    );
    assert!(matches!(focal, Err(TrainingError::InvalidAnchorState(s)) if s == 2.0));

    let huber = EfficientDetHuberLoss::default().forward(
        tensor3::<B>(vec![0.1, 0.1, 0.2, 0.2, 0.5], [1, 1, 5]),
        tensor3::<B>(vec![0.0; 4], [1, 1, 4]),
    );
    assert!(matches!(huber, Err(TrainingError::InvalidAnchorState(s)) if s == 0.5));
}
