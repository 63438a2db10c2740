//! The model seam of the inference service.

use image::DynamicImage;
use serde::Serialize;

use crate::dataset::ClassList;
use crate::error::DetkitError;

/// A raw detection in original-image pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxDetection {
    pub class_id: usize,
    pub score: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoxDetection {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

/// An object detector loaded once at startup and shared by all requests.
pub trait Detector: Send + Sync {
    /// Class names indexed by class ID.
    fn classes(&self) -> &ClassList;

    /// Detect objects scoring at least `confidence`.
    fn detect(
        &self,
        image: &DynamicImage,
        confidence: f32,
    ) -> Result<Vec<BoxDetection>, DetkitError>;
}

/// A detection as returned to HTTP clients.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub class_name: String,
    pub score: f32,
    /// `[x, y, width, height]` in image pixels.
    pub bbox: [f32; 4],
}

impl Detection {
    pub fn from_box(raw: &BoxDetection, classes: &ClassList) -> Self {
        let class_name = classes
            .get(raw.class_id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("class_{}", raw.class_id));

        Self {
            class_name,
            score: raw.score,
            bbox: [raw.x1, raw.y1, raw.width(), raw.height()],
        }
    }
}

/// Run `detector` and convert its boxes to client detections.
pub fn detect_image(
    detector: &dyn Detector,
    image: &DynamicImage,
    confidence: f32,
) -> Result<Vec<Detection>, DetkitError> {
    let raw = detector.detect(image, confidence)?;
    let classes = detector.classes();
    Ok(raw
        .iter()
        .map(|det| Detection::from_box(det, classes))
        .collect())
}
