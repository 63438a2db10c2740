//! Dataset archive extraction.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::DetkitError;

pub const IMAGES_DIR: &str = "images";
pub const ANNOTATIONS_DIR: &str = "annotations";
pub const CLASSES_FILE: &str = "classes.txt";

/// An archive unpacked into a temporary directory.
///
/// The directory tree is deleted when this value is dropped.
#[derive(Debug)]
pub struct ExtractedArchive {
    _temp: TempDir,
    root: PathBuf,
}

impl ExtractedArchive {
    /// Directory that holds `images/`, `annotations/` and `classes.txt`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_DIR)
    }

    pub fn annotations_dir(&self) -> PathBuf {
        self.root.join(ANNOTATIONS_DIR)
    }

    /// Path to `classes.txt`, if the archive contains one.
    pub fn classes_txt(&self) -> Option<PathBuf> {
        let path = self.root.join(CLASSES_FILE);
        path.is_file().then_some(path)
    }
}

/// Unpack a zip archive and locate its dataset root.
pub fn extract_archive(path: &Path) -> Result<ExtractedArchive, DetkitError> {
    let extraction_error = |source: ZipError| DetkitError::Extraction {
        path: path.to_path_buf(),
        source,
    };

    let file = fs::File::open(path).map_err(|e| extraction_error(ZipError::Io(e)))?;
    let mut archive = ZipArchive::new(file).map_err(extraction_error)?;

    let temp = tempfile::Builder::new()
        .prefix("detkit-extract-")
        .tempdir()?;
    archive.extract(temp.path()).map_err(extraction_error)?;
    tracing::debug!(
        entries = archive.len(),
        dir = %temp.path().display(),
        "archive extracted"
    );

    let root = locate_dataset_root(temp.path())?;
    Ok(ExtractedArchive { _temp: temp, root })
}

/// Find the directory containing both `images/` and `annotations/`.
///
/// Archives created by zipping a folder wrap everything in one top-level
/// directory; that single wrapper is looked through.
fn locate_dataset_root(extract_dir: &Path) -> Result<PathBuf, DetkitError> {
    if has_dataset_dirs(extract_dir) {
        return Ok(extract_dir.to_path_buf());
    }

    let subdirs: Vec<PathBuf> = fs::read_dir(extract_dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir() && !is_metadata_dir(path))
        .collect();

    // Diagnose against the wrapper when the root holds nothing else.
    let candidate = match subdirs.as_slice() {
        [only] if !has_any_dataset_dir(extract_dir) => {
            if has_dataset_dirs(only) {
                return Ok(only.clone());
            }
            only.as_path()
        }
        _ => extract_dir,
    };

    let missing = if candidate.join(IMAGES_DIR).is_dir() {
        ANNOTATIONS_DIR
    } else {
        IMAGES_DIR
    };

    Err(DetkitError::MissingStructure {
        path: candidate.to_path_buf(),
        missing: format!("{missing}/"),
    })
}

fn has_dataset_dirs(dir: &Path) -> bool {
    dir.join(IMAGES_DIR).is_dir() && dir.join(ANNOTATIONS_DIR).is_dir()
}

fn has_any_dataset_dir(dir: &Path) -> bool {
    dir.join(IMAGES_DIR).is_dir() || dir.join(ANNOTATIONS_DIR).is_dir()
}

fn is_metadata_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name == "__MACOSX" || name.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).expect("create zip");
        let mut writer = zip::ZipWriter::new(file);
        for (name, data) in entries {
            writer
                .start_file(
                    *name,
                    SimpleFileOptions::default()
                        .compression_method(zip::CompressionMethod::Stored),
                )
                .expect("start entry");
            writer.write_all(data).expect("write entry");
        }
        writer.finish().expect("finish zip");
    }

    #[test]
    fn extracts_flat_layout() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let zip_path = temp.path().join("data.zip");
        write_zip(
            &zip_path,
            &[
                ("images/a.jpg", b"img"),
                ("annotations/a.txt", b"0 0.5 0.5 0.1 0.1\n"),
                ("classes.txt", b"person\n"),
            ],
        );

        let extracted = extract_archive(&zip_path).expect("extract");
        assert!(extracted.images_dir().join("a.jpg").is_file());
        assert!(extracted.annotations_dir().join("a.txt").is_file());
        assert!(extracted.classes_txt().is_some());
    }

    #[test]
    fn looks_through_single_wrapper_directory() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let zip_path = temp.path().join("data.zip");
        write_zip(
            &zip_path,
            &[
                ("export/images/a.jpg", b"img"),
                ("export/annotations/a.txt", b""),
                ("__MACOSX/export/._a.jpg", b""),
            ],
        );

        let extracted = extract_archive(&zip_path).expect("extract");
        assert!(extracted.root().ends_with("export"));
        assert!(extracted.classes_txt().is_none());
    }

    #[test]
    fn missing_annotations_is_reported() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let zip_path = temp.path().join("data.zip");
        write_zip(&zip_path, &[("images/a.jpg", b"img")]);

        let err = extract_archive(&zip_path).unwrap_err();
        match err {
            DetkitError::MissingStructure { missing, .. } => assert_eq!(missing, "annotations/"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn wrapped_archive_missing_annotations_names_annotations() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let zip_path = temp.path().join("data.zip");
        write_zip(&zip_path, &[("export/images/a.jpg", b"img")]);

        let err = extract_archive(&zip_path).unwrap_err();
        match err {
            DetkitError::MissingStructure { path, missing } => {
                assert_eq!(missing, "annotations/");
                assert!(path.ends_with("export"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_zip_input_is_an_extraction_error() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let path = temp.path().join("broken.zip");
        fs::write(&path, b"this is not a zip file").expect("write file");

        let err = extract_archive(&path).unwrap_err();
        assert!(matches!(err, DetkitError::Extraction { .. }));
    }

    #[test]
    fn temp_dir_is_removed_on_drop() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let zip_path = temp.path().join("data.zip");
        write_zip(&zip_path, &[("images/a.jpg", b"img"), ("annotations/a.txt", b"")]);

        let extracted = extract_archive(&zip_path).expect("extract");
        let root = extracted.root().to_path_buf();
        assert!(root.is_dir());
        drop(extracted);
        assert!(!root.exists());
    }
}
