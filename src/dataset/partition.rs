//! Deterministic train/validation/test partitioning.

use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use walkdir::WalkDir;

use super::{Sample, Split, UnlabeledPolicy};
use crate::error::DetkitError;

pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];
pub const LABEL_EXTENSION: &str = "txt";

/// Percentage of samples that go to the training split.
pub const TRAIN_PERCENT: usize = 80;
/// Cumulative percentage of samples in train + validation.
pub const TRAIN_VAL_PERCENT: usize = 95;

/// Number of samples in each split for a dataset of a given size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SplitSizes {
    pub train: usize,
    pub val: usize,
    pub test: usize,
}

/// Compute split sizes from cumulative thresholds.
///
/// `train = ⌊0.80·n⌋`, `val = ⌊0.95·n⌋ − ⌊0.80·n⌋`, `test` takes the rest.
/// Integer arithmetic keeps the floors exact for every `n`.
pub fn split_sizes(n: usize) -> SplitSizes {
    let train_end = n * TRAIN_PERCENT / 100;
    let val_end = n * TRAIN_VAL_PERCENT / 100;
    SplitSizes {
        train: train_end,
        val: val_end - train_end,
        test: n - val_end,
    }
}

/// Samples assigned to each split.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Partition {
    pub train: Vec<Sample>,
    pub val: Vec<Sample>,
    pub test: Vec<Sample>,
}

impl Partition {
    pub fn get(&self, split: Split) -> &[Sample] {
        match split {
            Split::Train => &self.train,
            Split::Validation => &self.val,
            Split::Test => &self.test,
        }
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sizes(&self) -> SplitSizes {
        SplitSizes {
            train: self.train.len(),
            val: self.val.len(),
            test: self.test.len(),
        }
    }

    /// Iterate over `(split, samples)` in train, val, test order.
    pub fn iter(&self) -> impl Iterator<Item = (Split, &[Sample])> {
        Split::ALL.into_iter().map(move |split| (split, self.get(split)))
    }
}

/// Shuffle samples reproducibly.
///
/// Input order does not matter: samples are sorted by image file name before
/// the seeded shuffle.
pub fn shuffle_samples(mut samples: Vec<Sample>, seed: u64) -> Vec<Sample> {
    samples.sort_by(|a, b| a.image.cmp(&b.image));
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);
    samples
}

/// Shuffle with `seed` and cut into train/val/test by index thresholds.
pub fn partition(samples: Vec<Sample>, seed: u64) -> Partition {
    let mut shuffled = shuffle_samples(samples, seed);
    let sizes = split_sizes(shuffled.len());

    let test = shuffled.split_off(sizes.train + sizes.val);
    let val = shuffled.split_off(sizes.train);

    Partition {
        train: shuffled,
        val,
        test,
    }
}

/// Enumerate images in `images_dir` and pair them with annotations.
///
/// Only files directly inside `images_dir` with a known image extension are
/// considered. The annotation for `foo.jpg` is `annotations_dir/foo.txt`.
pub fn collect_samples(
    images_dir: &Path,
    annotations_dir: &Path,
    policy: UnlabeledPolicy,
) -> Result<Vec<Sample>, DetkitError> {
    let mut samples = Vec::new();

    for entry in WalkDir::new(images_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|source| {
            DetkitError::Io(std::io::Error::other(format!(
                "failed while traversing {}: {source}",
                images_dir.display()
            )))
        })?;

        if !entry.file_type().is_file() || !has_extension(entry.path(), &IMAGE_EXTENSIONS) {
            continue;
        }

        let image = entry.path().to_path_buf();
        let Some(stem) = image.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };

        let label_path = annotations_dir.join(format!("{stem}.{LABEL_EXTENSION}"));
        let annotation = label_path.is_file().then_some(label_path);

        if annotation.is_none() {
            match policy {
                UnlabeledPolicy::Skip => {
                    tracing::debug!(image = %image.display(), "skipping unlabeled image");
                    continue;
                }
                UnlabeledPolicy::Error => {
                    return Err(DetkitError::MissingAnnotation { image });
                }
                UnlabeledPolicy::Keep | UnlabeledPolicy::Background => {}
            }
        }

        samples.push(Sample {
            stem,
            image,
            annotation,
        });
    }

    samples.sort_by(|a, b| a.image.cmp(&b.image));
    Ok(samples)
}

/// Per-split file counts produced by [`copy_partition`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SplitCounts {
    pub train: usize,
    pub val: usize,
    pub test: usize,
    /// Samples copied together with an annotation file.
    pub labeled: usize,
    /// Samples copied without an annotation file.
    pub unlabeled: usize,
}

impl SplitCounts {
    pub fn total(&self) -> usize {
        self.train + self.val + self.test
    }

    pub fn get(&self, split: Split) -> usize {
        match split {
            Split::Train => self.train,
            Split::Validation => self.val,
            Split::Test => self.test,
        }
    }

    fn bump(&mut self, split: Split) {
        match split {
            Split::Train => self.train += 1,
            Split::Validation => self.val += 1,
            Split::Test => self.test += 1,
        }
    }
}

/// Directory for images of `split` under `output_root`.
pub fn images_dir(output_root: &Path, split: Split) -> PathBuf {
    output_root.join("images").join(split.dir_name())
}

/// Directory for labels of `split` under `output_root`.
pub fn labels_dir(output_root: &Path, split: Split) -> PathBuf {
    output_root.join("labels").join(split.dir_name())
}

/// Copy every sample into `images/<split>/` and `labels/<split>/`.
///
/// All six directories are created even when a split is empty. A failure
/// part-way leaves the files copied so far in place.
pub fn copy_partition(
    partition: &Partition,
    output_root: &Path,
    policy: UnlabeledPolicy,
) -> Result<SplitCounts, DetkitError> {
    for split in Split::ALL {
        fs::create_dir_all(images_dir(output_root, split))?;
        fs::create_dir_all(labels_dir(output_root, split))?;
    }

    let mut counts = SplitCounts::default();

    for (split, samples) in partition.iter() {
        let image_dest = images_dir(output_root, split);
        let label_dest = labels_dir(output_root, split);

        for sample in samples {
            fs::copy(&sample.image, image_dest.join(sample.image_file_name()))?;

            let label_name = format!("{}.{LABEL_EXTENSION}", sample.stem);
            match &sample.annotation {
                Some(annotation) => {
                    fs::copy(annotation, label_dest.join(&label_name))?;
                    counts.labeled += 1;
                }
                None => {
                    if policy == UnlabeledPolicy::Background {
                        fs::write(label_dest.join(&label_name), "")?;
                    }
                    counts.unlabeled += 1;
                }
            }

            counts.bump(split);
        }
    }

    Ok(counts)
}

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };

    allowed
        .iter()
        .any(|allowed_ext| ext.eq_ignore_ascii_case(allowed_ext))
}
