use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};

use cli_support::{init_logging, RuntimeArgs, ThresholdArgs};
use inference::prelude::{InferenceFactory, InferenceThresholds, VOC_CLASSES};
use vision_core::overlay::draw_detections;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum LabelFormat {
    /// Pascal VOC class names.
    #[value(alias = "VOC")]
    Voc,
    /// Class names stored in the checkpoint's hp.json.
    Labelme,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run an EfficientDet checkpoint on a single image and emit a boxed PNG"
)]
struct Args {
    /// Input image path (any format supported by the `image` crate).
    #[arg(long)]
    image: PathBuf,
    /// Checkpoint directory, or a named checkpoint under the weights root.
    #[arg(long)]
    checkpoint: String,
    #[command(flatten)]
    thresholds: ThresholdArgs,
    /// Where the class names come from.
    #[arg(long, value_enum)]
    format: LabelFormat,
    /// Output path for the boxed image (defaults to <stem>_boxed.png alongside the input).
    #[arg(long)]
    out: Option<PathBuf>,
    #[command(flatten)]
    runtime: RuntimeArgs,
}

fn default_out_path(input: &Path) -> PathBuf {
    let parent = input.parent().unwrap_or_else(|| Path::new("."));
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    parent.join(format!("{stem}_boxed.png"))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.runtime.log_format);
    let in_path = &args.image;
    if !in_path.exists() {
        anyhow::bail!("input image not found: {}", in_path.display());
    }
    let out_path = args.out.clone().unwrap_or_else(|| default_out_path(in_path));

    let settings = args.runtime.settings();
    let opts = args.thresholds.resolve(&settings.filter);
    let thresh = InferenceThresholds {
        score_thresh: opts.score_thresh,
        iou_thresh: opts.iou_thresh,
        ..InferenceThresholds::from_settings(&settings)
    };
    let detector = InferenceFactory.load(thresh, &args.checkpoint, &settings)?;

    let classes: Vec<String> = match args.format {
        LabelFormat::Voc => VOC_CLASSES.iter().map(|s| s.to_string()).collect(),
        LabelFormat::Labelme => detector.class_names().to_vec(),
    };

    let img = image::open(in_path)
        .with_context(|| format!("failed to decode {}", in_path.display()))?;
    let detections = detector.detect_image(&img)?;

    for det in detections.iter() {
        let name = classes
            .get(det.label)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", det.label));
        println!(
            "{name}\t{:.3}\t[{:.1}, {:.1}, {:.1}, {:.1}]",
            det.score, det.bbox[0], det.bbox[1], det.bbox[2], det.bbox[3]
        );
    }

    let mut boxed = img.to_rgba8();
    let drawn = draw_detections(&mut boxed, &detections, (1.0, 1.0));
    boxed
        .save(&out_path)
        .with_context(|| format!("failed to write {}", out_path.display()))?;
    println!(
        "saved boxed image to {} ({} boxes)",
        out_path.display(),
        drawn
    );
    Ok(())
}
