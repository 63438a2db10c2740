//! Locating model weights and their class names at startup.

use std::path::{Path, PathBuf};

use crate::dataset::manifest::{parse_class_names, read_manifest};
use crate::dataset::ClassList;
use crate::error::DetkitError;

/// Directory searched when no model path is given.
pub const DEFAULT_MODELS_DIR: &str = "models";

/// File names tried in order under the models directory.
pub const MODEL_CANDIDATES: [&str; 2] = ["banking_model.onnx", "best.onnx"];

/// Resolve the model file to load.
///
/// An explicit path must exist. Otherwise the candidates under `models_dir`
/// are tried in order and the first existing file wins.
pub fn locate_model(explicit: Option<&Path>, models_dir: &Path) -> Result<PathBuf, DetkitError> {
    let searched: Vec<PathBuf> = match explicit {
        Some(path) => vec![path.to_path_buf()],
        None => MODEL_CANDIDATES
            .iter()
            .map(|name| models_dir.join(name))
            .collect(),
    };

    match searched.iter().find(|path| path.is_file()) {
        Some(path) => Ok(path.clone()),
        None => Err(DetkitError::ModelNotFound { searched }),
    }
}

/// Read class names from `classes.txt` or a `dataset.yaml` manifest.
pub fn load_class_names(path: &Path) -> Result<ClassList, DetkitError> {
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    if is_yaml {
        Ok(read_manifest(path)?.classes)
    } else {
        ClassList::read_classes_txt(path)
    }
}

/// Class names from the `names` metadata entry of an exported model.
///
/// Returns `None` for anything that does not parse to a non-empty list.
pub fn parse_names_metadata(value: &str) -> Option<ClassList> {
    parse_class_names(value)
        .ok()
        .filter(|classes| !classes.is_empty())
}
