use std::fs;
use std::path::PathBuf;

use clap::Parser;
use cli_support::{DetectorSettings, RuntimeArgs, ThresholdArgs, ThresholdOpts};

#[derive(Parser, Debug)]
struct PredictLike {
    #[command(flatten)]
    thresholds: ThresholdArgs,
    #[command(flatten)]
    runtime: RuntimeArgs,
}

#[test]
fn loads_partial_settings_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("efficientdet.toml");
    fs::write(
        &path,
        "weights_root = \"/opt/weights\"\n[filter]\nscore_threshold = 0.4\nclass_agnostic = true\n",
    )
    .unwrap();
    let cfg = DetectorSettings::from_path(&path).expect("load settings");
    assert_eq!(cfg.weights_root, PathBuf::from("/opt/weights"));
    assert_eq!(cfg.filter.score_threshold, 0.4);
    assert!(cfg.filter.class_agnostic);
    assert_eq!(cfg.filter.iou_threshold, 0.5);
    assert_eq!(cfg.filter.max_detections_per_class, 200);

    let thresholds = ThresholdOpts::from(&cfg.filter);
    assert_eq!(thresholds, ThresholdOpts::new(0.4, 0.5));
}

#[test]
fn missing_or_broken_file_is_none() {
    let dir = tempfile::tempdir().unwrap();
    assert!(DetectorSettings::from_path(&dir.path().join("absent.toml")).is_none());
    assert!(DetectorSettings::from_toml("weights_root = [").is_none());
}

#[test]
fn empty_file_gives_defaults() {
    assert_eq!(
        DetectorSettings::from_toml("").unwrap(),
        DetectorSettings::default()
    );
}

#[test]
fn settings_thresholds_apply_when_flags_are_absent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tuned.toml");
    fs::write(&path, "[filter]\nscore_threshold = 0.7\niou_threshold = 0.3\n").unwrap();
    let config = path.to_str().unwrap();

    let args = PredictLike::try_parse_from(["predict", "--config", config]).unwrap();
    let settings = args.runtime.settings();
    assert_eq!(
        args.thresholds.resolve(&settings.filter),
        ThresholdOpts::new(0.7, 0.3)
    );

    let args =
        PredictLike::try_parse_from(["predict", "--config", config, "--score", "0.25"]).unwrap();
    let settings = args.runtime.settings();
    assert_eq!(
        args.thresholds.resolve(&settings.filter),
        ThresholdOpts::new(0.25, 0.3)
    );
}

#[test]
fn thresholds_default_without_flags_or_file() {
    let resolved = ThresholdArgs::default().resolve(&DetectorSettings::default().filter);
    assert_eq!(resolved, ThresholdOpts::new(0.4, 0.5));
}
