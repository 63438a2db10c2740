//! Training metrics from the trainer's `results.csv`.

use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::Serialize;

use crate::error::DetkitError;

const PRECISION_COLUMN: &str = "metrics/precision(B)";
const RECALL_COLUMN: &str = "metrics/recall(B)";
const MAP50_COLUMN: &str = "metrics/mAP50(B)";
const MAP50_95_COLUMN: &str = "metrics/mAP50-95(B)";
const EPOCH_COLUMN: &str = "epoch";

/// Aggregate box metrics for one epoch.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TrainingMetrics {
    pub epoch: Option<u32>,
    pub precision: f64,
    pub recall: f64,
    pub map50: f64,
    pub map50_95: f64,
}

impl TrainingMetrics {
    /// The trainer's model-selection score; `best.pt` is the epoch maximizing it.
    pub fn fitness(&self) -> f64 {
        0.1 * self.map50 + 0.9 * self.map50_95
    }
}

impl fmt::Display for TrainingMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(epoch) = self.epoch {
            writeln!(f, "  best epoch: {}", epoch)?;
        }
        writeln!(f, "  mAP50: {:.3}", self.map50)?;
        writeln!(f, "  mAP50-95: {:.3}", self.map50_95)?;
        writeln!(f, "  Precision: {:.3}", self.precision)?;
        writeln!(f, "  Recall: {:.3}", self.recall)
    }
}

/// Read `results.csv` and return the metrics of the best-fitness epoch.
pub fn read_results_csv(path: &Path) -> Result<TrainingMetrics, DetkitError> {
    let file = std::fs::File::open(path).map_err(|e| DetkitError::MetricsParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    best_epoch_metrics(file, path)
}

/// Parse results CSV data from any reader. `path` is used in errors only.
pub fn best_epoch_metrics<R: Read>(reader: R, path: &Path) -> Result<TrainingMetrics, DetkitError> {
    let parse_error = |message: String| DetkitError::MetricsParse {
        path: path.to_path_buf(),
        message,
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| parse_error(e.to_string()))?
        .clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| parse_error(format!("missing column '{name}'")))
    };

    let precision_idx = column(PRECISION_COLUMN)?;
    let recall_idx = column(RECALL_COLUMN)?;
    let map50_idx = column(MAP50_COLUMN)?;
    let map50_95_idx = column(MAP50_95_COLUMN)?;
    let epoch_idx = headers.iter().position(|h| h == EPOCH_COLUMN);

    let mut best: Option<TrainingMetrics> = None;

    for (row_idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| parse_error(e.to_string()))?;
        let field = |idx: usize, name: &str| -> Result<f64, DetkitError> {
            let raw = record.get(idx).unwrap_or_default();
            raw.parse::<f64>().map_err(|_| {
                parse_error(format!(
                    "row {}: invalid {} '{}'",
                    row_idx + 2,
                    name,
                    raw
                ))
            })
        };

        let metrics = TrainingMetrics {
            epoch: epoch_idx
                .and_then(|idx| record.get(idx))
                .and_then(|raw| raw.parse::<f64>().ok())
                .map(|epoch| epoch as u32),
            precision: field(precision_idx, PRECISION_COLUMN)?,
            recall: field(recall_idx, RECALL_COLUMN)?,
            map50: field(map50_idx, MAP50_COLUMN)?,
            map50_95: field(map50_95_idx, MAP50_95_COLUMN)?,
        };

        // Ties keep the earliest epoch, as the trainer only saves on improvement.
        if best.is_none_or(|b| metrics.fitness() > b.fitness()) {
            best = Some(metrics);
        }
    }

    best.ok_or_else(|| parse_error("no epochs recorded".to_string()))
}
