#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::Path;

use zip::write::SimpleFileOptions;

pub fn bmp_bytes(width: u32, height: u32) -> Vec<u8> {
    let row_stride = (width * 3).div_ceil(4) * 4;
    let pixel_array_size = row_stride * height;
    let file_size = 54 + pixel_array_size;

    let mut bytes = Vec::with_capacity(file_size as usize);
    bytes.extend_from_slice(b"BM");
    bytes.extend_from_slice(&file_size.to_le_bytes());
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes.extend_from_slice(&54u32.to_le_bytes());

    bytes.extend_from_slice(&40u32.to_le_bytes());
    bytes.extend_from_slice(&(width as i32).to_le_bytes());
    bytes.extend_from_slice(&(height as i32).to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&24u16.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&pixel_array_size.to_le_bytes());
    bytes.extend_from_slice(&2835u32.to_le_bytes());
    bytes.extend_from_slice(&2835u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes());

    bytes.resize(file_size as usize, 0);
    bytes
}

pub fn write_bmp(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, bmp_bytes(width, height)).expect("write bmp file");
}

/// Write a zip at `path` holding `entries` as `(name, contents)` pairs.
pub fn write_zip(path: &Path, entries: &[(String, Vec<u8>)]) {
    write_zip_with_dirs(path, &[], entries);
}

/// Like [`write_zip`], with explicit directory entries first.
pub fn write_zip_with_dirs(path: &Path, dirs: &[String], entries: &[(String, Vec<u8>)]) {
    let file = fs::File::create(path).expect("create zip");
    let mut zip = zip::ZipWriter::new(file);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

    for dir in dirs {
        zip.add_directory(dir.as_str(), options)
            .expect("add zip directory");
    }

    for (name, contents) in entries {
        zip.start_file(name.as_str(), options).expect("start zip entry");
        zip.write_all(contents).expect("write zip entry");
    }
    zip.finish().expect("finish zip");
}

/// Layout of a synthetic delivery archive.
pub struct ArchiveSpec {
    pub labeled: usize,
    pub unlabeled: usize,
    pub classes: Option<Vec<&'static str>>,
    /// Optional wrapper directory every entry is placed under.
    pub prefix: Option<&'static str>,
}

impl Default for ArchiveSpec {
    fn default() -> Self {
        Self {
            labeled: 20,
            unlabeled: 0,
            classes: Some(vec!["person", "car"]),
            prefix: None,
        }
    }
}

/// Build an archive of BMP images `img_000.bmp`... with one-box labels.
///
/// Unlabeled images are named `bg_000.bmp`...
pub fn write_dataset_zip(path: &Path, spec: &ArchiveSpec) {
    let prefix = spec.prefix.map(|p| format!("{p}/")).unwrap_or_default();
    let image = bmp_bytes(4, 4);
    let mut entries = Vec::new();
    let dirs = [format!("{prefix}images/"), format!("{prefix}annotations/")];

    for i in 0..spec.labeled {
        entries.push((format!("{prefix}images/img_{i:03}.bmp"), image.clone()));
        entries.push((
            format!("{prefix}annotations/img_{i:03}.txt"),
            format!("{} 0.5 0.5 0.25 0.25\n", i % 2).into_bytes(),
        ));
    }
    for i in 0..spec.unlabeled {
        entries.push((format!("{prefix}images/bg_{i:03}.bmp"), image.clone()));
    }
    if let Some(classes) = &spec.classes {
        let mut body = classes.join("\n");
        body.push('\n');
        entries.push((format!("{prefix}classes.txt"), body.into_bytes()));
    }

    write_zip_with_dirs(path, &dirs, &entries);
}
