//! Fuzz target for `dataset.yaml` parsing.

#![no_main]

use detkit::dataset::manifest::fuzz_parse_manifest;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 * 1024 {
        return;
    }

    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let _ = fuzz_parse_manifest(text);
});
