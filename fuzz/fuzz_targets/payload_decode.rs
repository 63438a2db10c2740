//! Fuzz target for `/detect` request decoding.
//!
//! Feeds arbitrary bytes through the JSON schema check, data-URI split,
//! base64 decode and image sniffing, checking for panics or hangs.

#![no_main]

use detkit::service::payload::fuzz_decode_request;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 4 * 1024 * 1024 {
        return;
    }

    let _ = fuzz_decode_request(data);
});
