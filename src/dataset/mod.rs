//! Dataset preparation: archive extraction, partitioning and manifest output.
//!
//! The pipeline is driven by [`prepare_dataset`]:
//!
//! 1. [`archive::extract_archive`] unpacks the delivered zip into a temporary
//!    directory and checks for `images/` and `annotations/`.
//! 2. [`partition::collect_samples`] pairs every image with its annotation.
//! 3. [`partition::partition`] shuffles with a fixed seed and splits 80/15/5.
//! 4. [`partition::copy_partition`] copies files into `images/<split>/` and
//!    `labels/<split>/`.
//! 5. [`manifest::write_manifest`] writes `dataset.yaml` for training.

pub mod archive;
pub mod manifest;
pub mod partition;
pub mod report;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::Serialize;

use crate::error::DetkitError;

pub use report::{ClassSource, PrepareReport};

/// Seed used for the reproducible shuffle.
pub const DEFAULT_SEED: u64 = 42;

/// Class names used when an archive ships without `classes.txt`.
pub const DEFAULT_CLASSES: [&str; 7] = [
    "person",
    "car",
    "truck",
    "handbag",
    "backpack",
    "bottle",
    "cell phone",
];

/// One of the three dataset partitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    #[serde(rename = "val")]
    Validation,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Validation, Split::Test];

    /// Directory name used under `images/` and `labels/`.
    pub fn dir_name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Validation => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.dir_name())
    }
}

/// An image together with its optional annotation file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    /// Shared file stem of the image and annotation.
    pub stem: String,
    pub image: PathBuf,
    pub annotation: Option<PathBuf>,
}

impl Sample {
    pub fn is_labeled(&self) -> bool {
        self.annotation.is_some()
    }

    /// File name of the image (including extension).
    pub fn image_file_name(&self) -> String {
        self.image
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.stem.clone())
    }
}

/// How to treat images that have no matching annotation file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnlabeledPolicy {
    /// Copy the image alone; the labels directory has no file for it.
    #[default]
    Keep,
    /// Copy the image and write an empty label file (explicit negative sample).
    Background,
    /// Leave the image out of the dataset entirely.
    Skip,
    /// Abort preparation.
    Error,
}

/// Ordered class names; the position of a name is its class ID.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ClassList(Vec<String>);

impl ClassList {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// Parse a `classes.txt` body: one name per line, line `i` is class `i`.
    ///
    /// A blank line inside the list keeps its ID under the name `class_<i>`;
    /// trailing blank lines are dropped.
    pub fn from_lines(text: &str) -> Self {
        let mut lines: Vec<&str> = text.lines().map(str::trim).collect();
        while lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }

        Self(
            lines
                .into_iter()
                .enumerate()
                .map(|(id, line)| {
                    if line.is_empty() {
                        format!("class_{id}")
                    } else {
                        line.to_string()
                    }
                })
                .collect(),
        )
    }

    pub fn read_classes_txt(path: &Path) -> Result<Self, DetkitError> {
        let text = fs::read_to_string(path)?;
        let classes = Self::from_lines(&text);
        if classes.is_empty() {
            return Err(DetkitError::ClassListInvalid {
                path: path.to_path_buf(),
                message: "no class names found".to_string(),
            });
        }
        Ok(classes)
    }

    pub fn write_classes_txt(&self, path: &Path) -> Result<(), DetkitError> {
        let mut body = self.0.join("\n");
        body.push('\n');
        fs::write(path, body).map_err(DetkitError::Io)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&str> {
        self.0.get(id).map(String::as_str)
    }

    /// `(id, name)` pairs in ID order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.0.iter().enumerate().map(|(id, name)| (id, name.as_str()))
    }
}

/// Options for [`prepare_dataset`].
#[derive(Clone, Debug)]
pub struct PrepareOptions {
    pub archive: PathBuf,
    pub output: PathBuf,
    pub seed: u64,
    pub unlabeled: UnlabeledPolicy,
    pub fallback_classes: Vec<String>,
    /// Comment placed at the top of `dataset.yaml`.
    pub title: String,
}

impl PrepareOptions {
    pub fn new(archive: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            archive: archive.into(),
            output: output.into(),
            seed: DEFAULT_SEED,
            unlabeled: UnlabeledPolicy::default(),
            fallback_classes: DEFAULT_CLASSES.iter().map(|c| c.to_string()).collect(),
            title: "Detection Dataset".to_string(),
        }
    }
}

/// Turn a delivered archive into a partitioned dataset with a manifest.
///
/// The extraction directory is removed when this function returns, whether or
/// not preparation succeeded. Files already copied into the output directory
/// are left in place on failure.
pub fn prepare_dataset(opts: &PrepareOptions) -> Result<PrepareReport, DetkitError> {
    if !opts.archive.is_file() {
        return Err(DetkitError::ArchiveNotFound(opts.archive.clone()));
    }

    tracing::info!(archive = %opts.archive.display(), "extracting archive");
    let extracted = archive::extract_archive(&opts.archive)?;

    let classes_txt = extracted.classes_txt();
    let (classes, class_source) = match &classes_txt {
        Some(path) => (ClassList::read_classes_txt(path)?, ClassSource::ClassesTxt),
        None => {
            tracing::warn!("archive has no classes.txt; using fallback class list");
            (
                ClassList::new(opts.fallback_classes.iter().cloned()),
                ClassSource::Fallback,
            )
        }
    };

    let samples = partition::collect_samples(
        &extracted.images_dir(),
        &extracted.annotations_dir(),
        opts.unlabeled,
    )?;
    tracing::info!(images = samples.len(), "collected samples");

    let warnings = check_annotation_class_ids(&samples, &classes, extracted.root());
    for warning in &warnings {
        tracing::warn!("{warning}");
    }

    let split = partition::partition(samples, opts.seed);
    let counts = partition::copy_partition(&split, &opts.output, opts.unlabeled)?;
    tracing::info!(
        train = counts.train,
        val = counts.val,
        test = counts.test,
        "copied dataset splits"
    );

    let classes_out = opts.output.join(archive::CLASSES_FILE);
    match &classes_txt {
        Some(path) => {
            fs::copy(path, &classes_out)?;
        }
        None => classes.write_classes_txt(&classes_out)?,
    }
    let manifest_path = manifest::write_manifest(&opts.output, &classes, &opts.title)?;
    tracing::info!(manifest = %manifest_path.display(), "wrote dataset manifest");

    Ok(PrepareReport {
        output_root: std::path::absolute(&opts.output)?,
        manifest_path,
        classes,
        class_source,
        counts,
        warnings,
    })
}

/// Report annotation rows whose class ID has no entry in the class list.
///
/// Annotation files are never rewritten, so a mismatch here means the class
/// list and the labels disagree and training would misattribute classes.
/// Paths in the warnings are relative to `root`. Files that cannot be read
/// are reported and skipped; they are still copied as-is.
pub fn check_annotation_class_ids(
    samples: &[Sample],
    classes: &ClassList,
    root: &Path,
) -> Vec<String> {
    let mut warnings = Vec::new();

    for sample in samples {
        let Some(annotation) = &sample.annotation else {
            continue;
        };
        let shown = annotation.strip_prefix(root).unwrap_or(annotation).display();

        let bytes = match fs::read(annotation) {
            Ok(bytes) => bytes,
            Err(err) => {
                warnings.push(format!("{shown}: unreadable annotation: {err}"));
                continue;
            }
        };
        let content = String::from_utf8_lossy(&bytes);

        for (line_idx, line) in content.lines().enumerate() {
            let Some(token) = line.split_whitespace().next() else {
                continue;
            };

            match token.parse::<usize>() {
                Ok(class_id) if class_id < classes.len() => {}
                Ok(class_id) => warnings.push(format!(
                    "{}:{}: class_id {} is out of range for {} class(es)",
                    shown,
                    line_idx + 1,
                    class_id,
                    classes.len()
                )),
                Err(_) => warnings.push(format!(
                    "{}:{}: invalid class_id '{}'",
                    shown,
                    line_idx + 1,
                    token
                )),
            }
        }
    }

    warnings
}
