//! Training through `yolo detect train`.

use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;

use super::device::{select_device, DeviceSelection};
use super::export::{export_weights, ExportFormat, ExportOptions, ExportReport};
use super::metrics::{read_results_csv, TrainingMetrics};
use super::{py_bool, Invocation, RunStatus, ToolRunner, YoloCli};
use crate::dataset::manifest::read_manifest;
use crate::error::DetkitError;

/// Pretrained checkpoint size, from fastest (`n`) to most accurate (`x`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ModelSize {
    #[default]
    #[value(name = "n")]
    Nano,
    #[value(name = "s")]
    Small,
    #[value(name = "m")]
    Medium,
    #[value(name = "l")]
    Large,
    #[value(name = "x")]
    XLarge,
}

impl ModelSize {
    pub fn suffix(self) -> char {
        match self {
            ModelSize::Nano => 'n',
            ModelSize::Small => 's',
            ModelSize::Medium => 'm',
            ModelSize::Large => 'l',
            ModelSize::XLarge => 'x',
        }
    }

    /// Name of the pretrained checkpoint to start from.
    pub fn checkpoint(self) -> String {
        format!("yolov8{}.pt", self.suffix())
    }
}

/// Fixed trainer settings: reproducibility switches and augmentation.
#[derive(Clone, Debug, PartialEq)]
pub struct Hyperparameters {
    pub seed: u64,
    pub deterministic: bool,
    pub amp: bool,
    pub close_mosaic: u32,
    pub hsv_h: f64,
    pub hsv_s: f64,
    pub hsv_v: f64,
    pub degrees: f64,
    pub translate: f64,
    pub scale: f64,
    pub shear: f64,
    pub perspective: f64,
    pub flipud: f64,
    pub fliplr: f64,
    pub mosaic: f64,
    pub mixup: f64,
    pub copy_paste: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            seed: 42,
            deterministic: true,
            amp: true,
            close_mosaic: 10,
            hsv_h: 0.015,
            hsv_s: 0.7,
            hsv_v: 0.4,
            degrees: 0.0,
            translate: 0.1,
            scale: 0.5,
            shear: 0.0,
            perspective: 0.0,
            flipud: 0.0,
            fliplr: 0.5,
            mosaic: 1.0,
            mixup: 0.0,
            copy_paste: 0.0,
        }
    }
}

impl Hyperparameters {
    fn apply(&self, inv: Invocation) -> Invocation {
        inv.kv("pretrained", py_bool(true))
            .kv("optimizer", "auto")
            .kv("seed", self.seed)
            .kv("deterministic", py_bool(self.deterministic))
            .kv("single_cls", py_bool(false))
            .kv("rect", py_bool(false))
            .kv("cos_lr", py_bool(false))
            .kv("close_mosaic", self.close_mosaic)
            .kv("resume", py_bool(false))
            .kv("amp", py_bool(self.amp))
            .kv("fraction", 1.0)
            .kv("hsv_h", self.hsv_h)
            .kv("hsv_s", self.hsv_s)
            .kv("hsv_v", self.hsv_v)
            .kv("degrees", self.degrees)
            .kv("translate", self.translate)
            .kv("scale", self.scale)
            .kv("shear", self.shear)
            .kv("perspective", self.perspective)
            .kv("flipud", self.flipud)
            .kv("fliplr", self.fliplr)
            .kv("mosaic", self.mosaic)
            .kv("mixup", self.mixup)
            .kv("copy_paste", self.copy_paste)
    }
}

/// Options for [`train`].
#[derive(Clone, Debug)]
pub struct TrainOptions {
    pub data: PathBuf,
    pub model_size: ModelSize,
    pub epochs: u32,
    pub batch: u32,
    pub img_size: u32,
    /// Empty string selects automatically.
    pub device: String,
    pub project: PathBuf,
    pub name: String,
    /// Formats to export the best weights to after training.
    pub export_formats: Vec<ExportFormat>,
    pub hyperparameters: Hyperparameters,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            data: PathBuf::from("training_data/dataset.yaml"),
            model_size: ModelSize::default(),
            epochs: 100,
            batch: 16,
            img_size: 640,
            device: String::new(),
            project: PathBuf::from("runs/train"),
            name: "banking_detection".to_string(),
            export_formats: vec![ExportFormat::Onnx, ExportFormat::Torchscript],
            hyperparameters: Hyperparameters::default(),
        }
    }
}

/// A finished training run.
#[derive(Debug)]
pub struct TrainingRun {
    pub run_dir: PathBuf,
    pub best_weights: PathBuf,
    pub device: DeviceSelection,
    /// Best-epoch metrics, if `results.csv` could be read.
    pub metrics: Option<TrainingMetrics>,
    pub exports: Option<ExportReport>,
}

impl fmt::Display for TrainingRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Training completed")?;
        writeln!(f, "  device: {}", self.device.device)?;
        match &self.metrics {
            Some(metrics) => write!(f, "{}", metrics)?,
            None => writeln!(f, "  metrics: unavailable")?,
        }
        writeln!(f, "  best weights: {}", self.best_weights.display())?;
        writeln!(f, "  training results: {}", self.run_dir.display())?;
        if let Some(exports) = &self.exports {
            writeln!(f)?;
            write!(f, "{}", exports)?;
        }
        Ok(())
    }
}

/// How a training call ended.
#[derive(Debug)]
pub enum TrainOutcome {
    Completed(Box<TrainingRun>),
    /// Stopped by the user; partial results may remain in `run_dir`.
    Interrupted { run_dir: PathBuf },
}

/// Pick `<project>/<name>`, or the first free `<name>2`, `<name>3`, ...
///
/// Mirrors the trainer's own numbering so the run directory is known before
/// training starts.
pub fn next_run_dir(project: &Path, name: &str) -> (PathBuf, String) {
    let first = project.join(name);
    if !first.exists() {
        return (first, name.to_string());
    }

    (2..)
        .map(|n| format!("{name}{n}"))
        .map(|candidate| (project.join(&candidate), candidate))
        .find(|(dir, _)| !dir.exists())
        .unwrap_or_else(|| (first, name.to_string()))
}

/// Build the `yolo detect train` invocation.
pub fn train_invocation(
    yolo: &YoloCli,
    opts: &TrainOptions,
    device: &str,
    project: &Path,
    run_name: &str,
) -> Invocation {
    let inv = yolo
        .invocation()
        .arg("detect")
        .arg("train")
        .kv("data", opts.data.display())
        .kv("model", opts.model_size.checkpoint())
        .kv("epochs", opts.epochs)
        .kv("imgsz", opts.img_size)
        .kv("batch", opts.batch)
        .kv("device", device)
        .kv("project", project.display())
        .kv("name", run_name)
        .kv("exist_ok", py_bool(true))
        .kv("verbose", py_bool(true));

    opts.hyperparameters.apply(inv)
}

/// Train a detector on the dataset described by `opts.data`.
pub fn train(
    runner: &dyn ToolRunner,
    yolo: &YoloCli,
    opts: &TrainOptions,
) -> Result<TrainOutcome, DetkitError> {
    if !opts.data.is_file() {
        return Err(DetkitError::ManifestNotFound(opts.data.clone()));
    }
    let manifest = read_manifest(&opts.data)?;
    tracing::info!(
        dataset = %opts.data.display(),
        classes = manifest.classes.len(),
        names = %manifest.classes.names().join(", "),
        "loaded dataset manifest"
    );

    let device = select_device(&opts.device);
    match &device.gpu {
        Some(gpu) if device.device != "cpu" => tracing::info!(
            device = %device.device,
            gpu = %gpu.name,
            memory_mb = ?gpu.memory_total_mb,
            driver = ?gpu.driver_version,
            "training on GPU"
        ),
        _ => tracing::info!(device = %device.device, "training device selected"),
    }

    let project = std::path::absolute(&opts.project)?;
    let (run_dir, run_name) = next_run_dir(&project, &opts.name);
    tracing::info!(
        checkpoint = %opts.model_size.checkpoint(),
        epochs = opts.epochs,
        batch = opts.batch,
        img_size = opts.img_size,
        run_dir = %run_dir.display(),
        "starting training"
    );

    let invocation = train_invocation(yolo, opts, &device.device, &project, &run_name);
    match runner.run(&invocation)? {
        RunStatus::Success => {}
        RunStatus::Interrupted => {
            tracing::warn!("training interrupted by user");
            return Ok(TrainOutcome::Interrupted { run_dir });
        }
        RunStatus::Failed(status) => return Err(DetkitError::TrainingFailed { status }),
    }

    let best_weights = run_dir.join("weights").join("best.pt");
    if !best_weights.is_file() {
        return Err(DetkitError::WeightsNotFound(best_weights));
    }

    let metrics = match read_results_csv(&run_dir.join("results.csv")) {
        Ok(metrics) => Some(metrics),
        Err(err) => {
            tracing::warn!("{err}");
            None
        }
    };

    let exports = if opts.export_formats.is_empty() {
        None
    } else {
        let export_opts = ExportOptions {
            img_size: opts.img_size,
            ..ExportOptions::default()
        };
        Some(export_weights(
            runner,
            yolo,
            &best_weights,
            &opts.export_formats,
            &export_opts,
        )?)
    };

    Ok(TrainOutcome::Completed(Box::new(TrainingRun {
        run_dir,
        best_weights,
        device,
        metrics,
        exports,
    })))
}
