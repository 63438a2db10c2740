#![allow(dead_code)]

use std::path::PathBuf;

use detkit::dataset::Sample;
use detkit::service::BoxDetection;
use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// Samples with distinct stems, some unlabeled.
pub fn arb_samples(max_len: usize) -> impl Strategy<Value = Vec<Sample>> {
    prop::collection::btree_set("[a-z0-9_]{1,12}", 0..=max_len).prop_flat_map(|stems| {
        let n = stems.len();
        (Just(stems), prop::collection::vec(any::<bool>(), n)).prop_map(|(stems, labeled)| {
            stems
                .into_iter()
                .zip(labeled)
                .map(|(stem, has_label)| Sample {
                    image: PathBuf::from(format!("images/{stem}.jpg")),
                    annotation: has_label.then(|| PathBuf::from(format!("annotations/{stem}.txt"))),
                    stem,
                })
                .collect()
        })
    })
}

/// Boxes inside a 640x640 canvas across a few classes.
pub fn arb_boxes(max_len: usize) -> impl Strategy<Value = Vec<BoxDetection>> {
    let one = (
        0usize..3,
        0.0f32..1.0,
        0.0f32..600.0,
        0.0f32..600.0,
        1.0f32..40.0,
        1.0f32..40.0,
    )
        .prop_map(|(class_id, score, x1, y1, w, h)| BoxDetection {
            class_id,
            score,
            x1,
            y1,
            x2: x1 + w,
            y2: y1 + h,
        });
    prop::collection::vec(one, 0..=max_len)
}
