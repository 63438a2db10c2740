//! Weights export through `yolo export`.

use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::Serialize;

use super::{py_bool, Invocation, RunStatus, ToolRunner, YoloCli};
use crate::error::DetkitError;

/// Interchange formats the exporter can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Onnx,
    Torchscript,
    Openvino,
    Engine,
    Coreml,
    Tflite,
}

impl ExportFormat {
    /// Identifier understood by `yolo export format=...`.
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Onnx => "onnx",
            ExportFormat::Torchscript => "torchscript",
            ExportFormat::Openvino => "openvino",
            ExportFormat::Engine => "engine",
            ExportFormat::Coreml => "coreml",
            ExportFormat::Tflite => "tflite",
        }
    }

    /// Where the exporter writes its artifact for `weights`.
    ///
    /// Artifacts are siblings of the weights file and reuse its stem.
    pub fn artifact_path(self, weights: &Path) -> PathBuf {
        let stem = weights
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = weights.parent().unwrap_or_else(|| Path::new(""));

        match self {
            ExportFormat::Onnx => dir.join(format!("{stem}.onnx")),
            ExportFormat::Torchscript => dir.join(format!("{stem}.torchscript")),
            ExportFormat::Openvino => dir.join(format!("{stem}_openvino_model")),
            ExportFormat::Engine => dir.join(format!("{stem}.engine")),
            ExportFormat::Coreml => dir.join(format!("{stem}.mlpackage")),
            ExportFormat::Tflite => dir
                .join(format!("{stem}_saved_model"))
                .join(format!("{stem}_float32.tflite")),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Export settings shared by every format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExportOptions {
    pub img_size: u32,
    /// ONNX only: dynamic input axes.
    pub dynamic: bool,
    /// ONNX only: run the graph simplifier.
    pub simplify: bool,
    /// ONNX only: opset version.
    pub opset: u32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            img_size: 640,
            dynamic: false,
            simplify: true,
            opset: 12,
        }
    }
}

/// Build the `yolo export` invocation for one format.
pub fn export_invocation(
    yolo: &YoloCli,
    weights: &Path,
    format: ExportFormat,
    opts: &ExportOptions,
) -> Invocation {
    let inv = yolo
        .invocation()
        .arg("export")
        .kv("model", weights.display())
        .kv("format", format)
        .kv("imgsz", opts.img_size);

    match format {
        ExportFormat::Onnx => inv
            .kv("dynamic", py_bool(opts.dynamic))
            .kv("simplify", py_bool(opts.simplify))
            .kv("opset", opts.opset),
        _ => inv,
    }
}

/// Outcome of exporting one format.
#[derive(Debug)]
pub struct FormatExport {
    pub format: ExportFormat,
    pub result: Result<PathBuf, DetkitError>,
}

/// Per-format outcomes of [`export_weights`].
#[derive(Debug)]
pub struct ExportReport {
    pub weights: PathBuf,
    pub exports: Vec<FormatExport>,
}

impl ExportReport {
    pub fn succeeded(&self) -> impl Iterator<Item = (ExportFormat, &Path)> {
        self.exports
            .iter()
            .filter_map(|e| e.result.as_ref().ok().map(|p| (e.format, p.as_path())))
    }

    pub fn failed_formats(&self) -> Vec<String> {
        self.exports
            .iter()
            .filter(|e| e.result.is_err())
            .map(|e| e.format.to_string())
            .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.exports.iter().all(|e| e.result.is_ok())
    }

    /// Fail with [`DetkitError::ExportFailed`] if any format failed.
    pub fn into_result(self) -> Result<Self, DetkitError> {
        let failed = self.failed_formats();
        if failed.is_empty() {
            Ok(self)
        } else {
            Err(DetkitError::ExportFailed { failed })
        }
    }
}

impl fmt::Display for ExportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Export of {}", self.weights.display())?;
        for export in &self.exports {
            match &export.result {
                Ok(path) => match artifact_size_mb(path) {
                    Some(mb) => writeln!(
                        f,
                        "  ok    {:<12} {} ({:.2} MB)",
                        export.format,
                        path.display(),
                        mb
                    )?,
                    None => writeln!(f, "  ok    {:<12} {}", export.format, path.display())?,
                },
                Err(err) => writeln!(f, "  FAIL  {:<12} {}", export.format, err)?,
            }
        }
        Ok(())
    }
}

/// Export `weights` to each format in turn.
///
/// A failure in one format is recorded in the report and does not stop the
/// remaining formats. Only a missing weights file fails the whole call.
pub fn export_weights(
    runner: &dyn ToolRunner,
    yolo: &YoloCli,
    weights: &Path,
    formats: &[ExportFormat],
    opts: &ExportOptions,
) -> Result<ExportReport, DetkitError> {
    if !weights.is_file() {
        return Err(DetkitError::WeightsNotFound(weights.to_path_buf()));
    }

    let mut exports = Vec::with_capacity(formats.len());

    for &format in formats {
        tracing::info!(%format, weights = %weights.display(), "exporting");
        let result = export_one(runner, yolo, weights, format, opts);
        match &result {
            Ok(path) => tracing::info!(%format, artifact = %path.display(), "export succeeded"),
            Err(err) => tracing::warn!(%format, "export failed: {err}"),
        }
        exports.push(FormatExport { format, result });
    }

    Ok(ExportReport {
        weights: weights.to_path_buf(),
        exports,
    })
}

fn export_one(
    runner: &dyn ToolRunner,
    yolo: &YoloCli,
    weights: &Path,
    format: ExportFormat,
    opts: &ExportOptions,
) -> Result<PathBuf, DetkitError> {
    let export_error = |message: String| DetkitError::Export {
        format: format.to_string(),
        message,
    };

    let invocation = export_invocation(yolo, weights, format, opts);
    match runner.run(&invocation) {
        Ok(RunStatus::Success) => {}
        Ok(RunStatus::Failed(status)) => {
            return Err(export_error(format!("exporter exited with {status}")));
        }
        Ok(RunStatus::Interrupted) => return Err(export_error("interrupted".to_string())),
        Err(err) => return Err(export_error(err.to_string())),
    }

    let artifact = format.artifact_path(weights);
    if artifact.exists() {
        Ok(artifact)
    } else {
        Err(export_error(format!(
            "output not found at {}",
            artifact.display()
        )))
    }
}

fn artifact_size_mb(path: &Path) -> Option<f64> {
    let meta = std::fs::metadata(path).ok()?;
    meta.is_file()
        .then(|| meta.len() as f64 / 1024.0 / 1024.0)
}
