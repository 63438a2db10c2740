//! Summary of a dataset preparation run.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use super::partition::SplitCounts;
use super::{ClassList, Split};

/// Where the class list came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassSource {
    ClassesTxt,
    Fallback,
}

/// Result of [`super::prepare_dataset`].
#[derive(Clone, Debug, Serialize)]
pub struct PrepareReport {
    pub output_root: PathBuf,
    pub manifest_path: PathBuf,
    pub classes: ClassList,
    pub class_source: ClassSource,
    pub counts: SplitCounts,
    /// Non-fatal problems found in the input (e.g. unknown class IDs).
    pub warnings: Vec<String>,
}

impl PrepareReport {
    fn percent(&self, split: Split) -> f64 {
        let total = self.counts.total();
        if total == 0 {
            0.0
        } else {
            self.counts.get(split) as f64 / total as f64 * 100.0
        }
    }
}

impl fmt::Display for PrepareReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dataset preparation complete")?;
        writeln!(f, "  location: {}", self.output_root.display())?;
        writeln!(f, "  total images: {}", self.counts.total())?;
        for (label, split) in [
            ("training", Split::Train),
            ("validation", Split::Validation),
            ("testing", Split::Test),
        ] {
            writeln!(
                f,
                "    - {}: {} ({:.1}%)",
                label,
                self.counts.get(split),
                self.percent(split)
            )?;
        }
        if self.counts.unlabeled > 0 {
            writeln!(f, "  images without annotations: {}", self.counts.unlabeled)?;
        }

        let source = match self.class_source {
            ClassSource::ClassesTxt => "classes.txt",
            ClassSource::Fallback => "fallback list",
        };
        writeln!(
            f,
            "  classes ({}, from {}): {}",
            self.classes.len(),
            source,
            self.classes.names().join(", ")
        )?;
        writeln!(f, "  config file: {}", self.manifest_path.display())?;

        if !self.warnings.is_empty() {
            writeln!(f)?;
            writeln!(f, "Warnings ({}):", self.warnings.len())?;
            for warning in &self.warnings {
                writeln!(f, "  - {}", warning)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> PrepareReport {
        PrepareReport {
            output_root: PathBuf::from("/data/out"),
            manifest_path: PathBuf::from("/data/out/dataset.yaml"),
            classes: ClassList::new(["person", "car"]),
            class_source: ClassSource::ClassesTxt,
            counts: SplitCounts {
                train: 16,
                val: 3,
                test: 1,
                labeled: 19,
                unlabeled: 1,
            },
            warnings: vec![],
        }
    }

    #[test]
    fn display_shows_split_percentages() {
        let text = report().to_string();
        assert!(text.contains("total images: 20"));
        assert!(text.contains("training: 16 (80.0%)"));
        assert!(text.contains("validation: 3 (15.0%)"));
        assert!(text.contains("testing: 1 (5.0%)"));
        assert!(text.contains("images without annotations: 1"));
        assert!(text.contains("person, car"));
    }

    #[test]
    fn json_uses_snake_case_source() {
        let json = serde_json::to_value(report()).expect("serialize");
        assert_eq!(json["class_source"], "classes_txt");
        assert_eq!(json["classes"][1], "car");
        assert_eq!(json["counts"]["train"], 16);
    }
}
