//! `/detect` request schema and image decoding.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use serde::Deserialize;

use crate::error::DetkitError;

/// Body of `POST /detect`.
#[derive(Clone, Debug, Deserialize)]
pub struct DetectRequest {
    /// `data:image/<type>;base64,<payload>`
    pub image: String,
}

/// Validate the JSON body against [`DetectRequest`].
pub fn parse_request(body: &[u8]) -> Result<DetectRequest, DetkitError> {
    if body.is_empty() {
        return Err(DetkitError::Decode("request body is empty".to_string()));
    }
    serde_json::from_slice(body)
        .map_err(|e| DetkitError::Decode(format!("invalid request body: {e}")))
}

/// Strip the data-URI header and base64-decode the payload.
///
/// Everything up to and including the first comma is discarded.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, DetkitError> {
    let (_, payload) = uri
        .split_once(',')
        .ok_or_else(|| DetkitError::Decode("missing data URI header".to_string()))?;

    let payload = payload.trim();
    if payload.is_empty() {
        return Err(DetkitError::Decode("empty image payload".to_string()));
    }

    STANDARD
        .decode(payload)
        .map_err(|e| DetkitError::Decode(format!("invalid base64: {e}")))
}

/// Decode raw bytes into an image, sniffing the format.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, DetkitError> {
    image::load_from_memory(bytes)
        .map_err(|e| DetkitError::Decode(format!("unreadable image: {e}")))
}

/// Body bytes to image: schema check, data URI, then image decode.
pub fn decode_request(body: &[u8]) -> Result<DynamicImage, DetkitError> {
    let request = parse_request(body)?;
    let bytes = decode_data_uri(&request.image)?;
    decode_image(&bytes)
}

/// Fuzz-only entrypoint for request decoding.
#[cfg(feature = "fuzzing")]
pub fn fuzz_decode_request(input: &[u8]) -> Result<(), DetkitError> {
    let _ = decode_request(input)?;
    Ok(())
}
