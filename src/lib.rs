//! Detkit: object-detection dataset, training and serving toolkit.
//!
//! Detkit takes a zip of annotated images to a served detector:
//!
//! - [`dataset`]: unpack an archive, split it reproducibly and write the
//!   training manifest
//! - [`toolchain`]: drive the external detection toolchain to train and
//!   export weights
//! - [`service`]: HTTP inference over an exported model
//! - [`error`]: error types for detkit operations

pub mod dataset;
pub mod error;
pub mod logging;
pub mod service;
pub mod toolchain;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use dataset::{PrepareOptions, UnlabeledPolicy, DEFAULT_SEED};
use logging::LogFormat;
use toolchain::export::{export_weights, ExportFormat, ExportOptions};
use toolchain::train::{train, ModelSize, TrainOptions, TrainOutcome};
use toolchain::{ProcessRunner, YoloCli, DEFAULT_YOLO_BIN};

pub use error::DetkitError;

/// The detkit CLI application.
#[derive(Parser)]
#[command(name = "detkit")]
#[command(version, about)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the `yolo` executable.
    #[arg(long, global = true, env = "DETKIT_YOLO_BIN", default_value = DEFAULT_YOLO_BIN)]
    yolo_bin: PathBuf,

    /// Log line format (filter with RUST_LOG).
    #[arg(long, global = true, env = "DETKIT_LOG_FORMAT", value_enum, default_value_t)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Turn an annotated zip archive into a partitioned training dataset.
    Prepare(PrepareArgs),
    /// Train a detector on a prepared dataset.
    Train(TrainArgs),
    /// Export trained weights to interchange formats.
    Export(ExportArgs),
    /// Serve an exported model over HTTP.
    Serve(ServeArgs),
}

/// Output format for reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    #[default]
    Text,
    Json,
}

#[derive(clap::Args)]
struct PrepareArgs {
    /// Zip archive containing `images/`, `annotations/` and optionally
    /// `classes.txt`.
    archive: PathBuf,

    /// Output dataset directory.
    #[arg(long, default_value = "training_data")]
    output: PathBuf,

    /// Seed for the reproducible shuffle.
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Treatment of images without an annotation file.
    #[arg(long, value_enum, default_value_t)]
    unlabeled: UnlabeledPolicy,

    /// Class names to use when the archive has no classes.txt.
    #[arg(long, value_delimiter = ',')]
    fallback_classes: Option<Vec<String>>,

    /// Output format for the report.
    #[arg(long, value_enum, default_value_t)]
    report: ReportFormat,
}

#[derive(clap::Args)]
struct TrainArgs {
    /// Dataset manifest.
    #[arg(long, default_value = "training_data/dataset.yaml")]
    data: PathBuf,

    /// Model size.
    #[arg(long, value_enum, default_value_t)]
    model: ModelSize,

    #[arg(long, default_value_t = 100)]
    epochs: u32,

    #[arg(long, default_value_t = 16)]
    batch: u32,

    /// Square training image size.
    #[arg(long, default_value_t = 640)]
    img_size: u32,

    /// Device: empty for automatic, `cpu`, or GPU index such as `0`.
    #[arg(long, default_value = "")]
    device: String,

    /// Run name under the project directory.
    #[arg(long, default_value = "banking_detection")]
    name: String,

    /// Directory holding training runs.
    #[arg(long, default_value = "runs/train")]
    project: PathBuf,

    /// Formats to export the best weights to after training.
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = [ExportFormat::Onnx, ExportFormat::Torchscript])]
    export: Vec<ExportFormat>,

    /// Skip exporting after training.
    #[arg(long, conflicts_with = "export")]
    no_export: bool,
}

#[derive(clap::Args)]
struct ExportArgs {
    /// Trained weights file (e.g. runs/train/banking_detection/weights/best.pt).
    weights: PathBuf,

    /// Formats to export to.
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = [ExportFormat::Onnx, ExportFormat::Torchscript])]
    format: Vec<ExportFormat>,

    /// Export image size.
    #[arg(long, default_value_t = 640)]
    img_size: u32,
}

#[derive(clap::Args)]
struct ServeArgs {
    /// ONNX model. Defaults to models/banking_model.onnx, then models/best.onnx.
    #[arg(long)]
    model: Option<PathBuf>,

    /// classes.txt or dataset.yaml; defaults to names embedded in the model.
    #[arg(long)]
    classes: Option<PathBuf>,

    #[arg(long, default_value = service::DEFAULT_HOST)]
    host: IpAddr,

    #[arg(long, default_value_t = service::DEFAULT_PORT)]
    port: u16,

    /// Minimum detection confidence.
    #[arg(long, default_value_t = service::DEFAULT_CONFIDENCE)]
    conf: f32,
}

/// Run the detkit CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), DetkitError> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("detkit {}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Prepare, train, export and serve object detectors.");
        println!();
        println!("Run 'detkit --help' for usage information.");
        return Ok(());
    };

    logging::setup_logging(cli.log_format);
    let yolo = YoloCli::new(cli.yolo_bin);

    match command {
        Commands::Prepare(args) => run_prepare(args),
        Commands::Train(args) => run_train(args, &yolo),
        Commands::Export(args) => run_export(args, &yolo),
        Commands::Serve(args) => run_serve(args),
    }
}

fn run_prepare(args: PrepareArgs) -> Result<(), DetkitError> {
    let mut opts = PrepareOptions::new(args.archive, args.output);
    opts.seed = args.seed;
    opts.unlabeled = args.unlabeled;
    if let Some(classes) = args.fallback_classes {
        opts.fallback_classes = classes;
    }

    let report = dataset::prepare_dataset(&opts)?;

    match args.report {
        ReportFormat::Json => {
            let json = serde_json::to_string_pretty(&report)
                .map_err(|e| DetkitError::Io(std::io::Error::other(e)))?;
            println!("{json}");
        }
        ReportFormat::Text => print!("{report}"),
    }
    Ok(())
}

fn run_train(args: TrainArgs, yolo: &YoloCli) -> Result<(), DetkitError> {
    let opts = TrainOptions {
        data: args.data,
        model_size: args.model,
        epochs: args.epochs,
        batch: args.batch,
        img_size: args.img_size,
        device: args.device,
        project: args.project,
        name: args.name,
        export_formats: if args.no_export {
            Vec::new()
        } else {
            args.export
        },
        ..TrainOptions::default()
    };

    match train(&ProcessRunner, yolo, &opts)? {
        TrainOutcome::Completed(run) => {
            print!("{run}");
            if let Some(exports) = run.exports.as_ref().filter(|e| !e.all_succeeded()) {
                tracing::warn!(
                    failed = %exports.failed_formats().join(", "),
                    "training succeeded but some exports failed; retry with `detkit export`"
                );
            }
            Ok(())
        }
        TrainOutcome::Interrupted { run_dir } => {
            println!("Training interrupted by user.");
            println!("  partial results: {}", run_dir.display());
            Ok(())
        }
    }
}

fn run_export(args: ExportArgs, yolo: &YoloCli) -> Result<(), DetkitError> {
    let opts = ExportOptions {
        img_size: args.img_size,
        ..ExportOptions::default()
    };

    let report = export_weights(&ProcessRunner, yolo, &args.weights, &args.format, &opts)?;
    print!("{report}");
    report.into_result().map(|_| ())
}

fn run_serve(args: ServeArgs) -> Result<(), DetkitError> {
    let model_path = service::model::locate_model(
        args.model.as_deref(),
        std::path::Path::new(service::model::DEFAULT_MODELS_DIR),
    )?;
    let classes = args
        .classes
        .as_deref()
        .map(service::model::load_class_names)
        .transpose()?;
    let addr = SocketAddr::new(args.host, args.port);

    serve_model(model_path, classes, addr, args.conf)
}

#[cfg(feature = "onnx")]
fn serve_model(
    model_path: PathBuf,
    classes: Option<dataset::ClassList>,
    addr: SocketAddr,
    confidence: f32,
) -> Result<(), DetkitError> {
    use std::sync::Arc;

    let detector = service::onnx::OnnxDetector::load(&model_path, classes)?;
    let state = service::AppState::new(Arc::new(detector)).with_confidence(confidence);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(service::serve(state, addr))
}

#[cfg(not(feature = "onnx"))]
fn serve_model(
    model_path: PathBuf,
    _classes: Option<dataset::ClassList>,
    _addr: SocketAddr,
    _confidence: f32,
) -> Result<(), DetkitError> {
    tracing::error!(model = %model_path.display(), "built without the onnx feature");
    Err(DetkitError::FeatureDisabled("ONNX inference"))
}
