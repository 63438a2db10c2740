//! `dataset.yaml` manifest writer and reader.
//!
//! The manifest is the Ultralytics dataset description: a root `path`, the
//! image directory of each split relative to it, and an index-to-name map of
//! classes.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{ClassList, Split};
use crate::error::DetkitError;

pub const MANIFEST_FILE: &str = "dataset.yaml";

/// A parsed dataset manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    /// Dataset root. Relative split paths are resolved against it.
    pub root: Option<PathBuf>,
    pub train: Option<String>,
    pub val: Option<String>,
    pub test: Option<String>,
    pub classes: ClassList,
}

impl Manifest {
    /// Absolute or root-relative image directory for `split`, if listed.
    pub fn split_dir(&self, split: Split) -> Option<PathBuf> {
        let rel = match split {
            Split::Train => self.train.as_deref(),
            Split::Validation => self.val.as_deref(),
            Split::Test => self.test.as_deref(),
        }?;

        Some(match &self.root {
            Some(root) => root.join(rel),
            None => PathBuf::from(rel),
        })
    }
}

/// Render the manifest text for a dataset rooted at `root`.
pub fn render_manifest(root: &Path, classes: &ClassList, title: &str) -> String {
    let mut yaml = String::new();

    let title = title.lines().next().unwrap_or_default().trim();
    if !title.is_empty() {
        yaml.push_str(&format!("# {title}\n"));
    }

    yaml.push_str(&format!(
        "path: {}\n",
        yaml_single_quoted(&root.to_string_lossy())
    ));
    for split in Split::ALL {
        yaml.push_str(&format!(
            "{}: images/{}\n",
            split.dir_name(),
            split.dir_name()
        ));
    }

    yaml.push_str("\n# Classes\nnames:\n");
    for (idx, name) in classes.iter() {
        yaml.push_str(&format!("  {}: {}\n", idx, yaml_single_quoted(name)));
    }

    yaml
}

/// Write `<output_root>/dataset.yaml` and return its path.
pub fn write_manifest(
    output_root: &Path,
    classes: &ClassList,
    title: &str,
) -> Result<PathBuf, DetkitError> {
    fs::create_dir_all(output_root)?;
    let root = std::path::absolute(output_root)?;
    let path = root.join(MANIFEST_FILE);
    fs::write(&path, render_manifest(&root, classes, title))?;
    Ok(path)
}

#[derive(Debug, Deserialize)]
struct DataYaml {
    path: Option<PathBuf>,
    train: Option<String>,
    val: Option<String>,
    test: Option<String>,
    names: DataYamlNames,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DataYamlNames {
    Sequence(Vec<String>),
    Mapping(BTreeMap<usize, String>),
}

/// Highest class ID accepted from a `names` mapping.
const MAX_CLASS_ID: usize = 65_535;

impl DataYamlNames {
    fn into_class_list(self) -> Result<ClassList, serde_yaml::Error> {
        let names = match self {
            DataYamlNames::Sequence(names) => names,
            DataYamlNames::Mapping(mapping) => {
                let len = mapping.keys().next_back().map_or(0, |max| max + 1);
                if len > MAX_CLASS_ID + 1 {
                    return Err(serde::de::Error::custom(format!(
                        "class id {} exceeds {}",
                        len - 1,
                        MAX_CLASS_ID
                    )));
                }
                let mut names = vec![String::new(); len];
                for (index, name) in mapping {
                    names[index] = name;
                }
                for (index, name) in names.iter_mut().enumerate() {
                    if name.trim().is_empty() {
                        *name = format!("class_{}", index);
                    }
                }
                names
            }
        };
        Ok(ClassList::new(names))
    }
}

/// Parse a bare `names` value, either `[a, b]` or `{0: a, 1: b}`.
///
/// Exported models carry their class names in this form.
pub fn parse_class_names(text: &str) -> Result<ClassList, serde_yaml::Error> {
    serde_yaml::from_str::<DataYamlNames>(text)?.into_class_list()
}

/// Parse manifest text.
pub fn parse_manifest(text: &str, path: &Path) -> Result<Manifest, DetkitError> {
    let parse_error = |source| DetkitError::ManifestParse {
        path: path.to_path_buf(),
        source,
    };
    let parsed: DataYaml = serde_yaml::from_str(text).map_err(parse_error)?;
    let classes = parsed.names.into_class_list().map_err(parse_error)?;

    Ok(Manifest {
        root: parsed.path,
        train: parsed.train,
        val: parsed.val,
        test: parsed.test,
        classes,
    })
}

/// Read a manifest from disk.
pub fn read_manifest(path: &Path) -> Result<Manifest, DetkitError> {
    if !path.is_file() {
        return Err(DetkitError::ManifestNotFound(path.to_path_buf()));
    }
    let text = fs::read_to_string(path)?;
    parse_manifest(&text, path)
}

/// Fuzz-only entrypoint for manifest parsing.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_manifest(input: &str) -> Result<(), DetkitError> {
    let _ = parse_manifest(input, Path::new("<fuzz>"))?;
    Ok(())
}

fn yaml_single_quoted(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}
