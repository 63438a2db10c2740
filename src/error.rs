use std::path::PathBuf;
use thiserror::Error;

/// The main error type for detkit operations.
#[derive(Debug, Error)]
pub enum DetkitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive not found: {0}")]
    ArchiveNotFound(PathBuf),

    #[error("Failed to extract archive {path}: {source}")]
    Extraction {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Archive at {path} is missing expected {missing} directory")]
    MissingStructure { path: PathBuf, missing: String },

    #[error("Image {image} has no matching annotation file")]
    MissingAnnotation { image: PathBuf },

    #[error("Invalid class list {path}: {message}")]
    ClassListInvalid { path: PathBuf, message: String },

    #[error("Failed to parse dataset manifest {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Dataset manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error("Weights file not found: {0}")]
    WeightsNotFound(PathBuf),

    #[error("Failed to run {program}: {message}")]
    Toolchain { program: String, message: String },

    #[error("Training exited unsuccessfully ({status})")]
    TrainingFailed { status: String },

    #[error("Failed to read training metrics from {path}: {message}")]
    MetricsParse { path: PathBuf, message: String },

    #[error("Export to {format} failed: {message}")]
    Export { format: String, message: String },

    #[error("Export failed for {} format(s): {}", failed.len(), failed.join(", "))]
    ExportFailed { failed: Vec<String> },

    #[error("Failed to decode image payload: {0}")]
    Decode(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("No model weights found (searched: {})", searched.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    ModelNotFound { searched: Vec<PathBuf> },

    #[error("Failed to load model {path}: {message}")]
    ModelLoad { path: PathBuf, message: String },

    #[error("Server error: {0}")]
    Server(String),

    #[error("This build does not include {0} support")]
    FeatureDisabled(&'static str),
}
