//! Detector pre- and post-processing independent of the inference backend.
//!
//! Images are letterboxed into a square network input. The network emits one
//! `[4 + K, A]` tensor (center box then K class scores, for A anchors), which
//! [`decode_predictions`] filters, suppresses and maps back to image pixels.

use image::{imageops::FilterType, DynamicImage, Rgb, RgbImage};

use super::detector::BoxDetection;

/// Square side of the network input.
pub const DEFAULT_INPUT_SIZE: u32 = 640;
/// IoU above which a lower-scoring box of the same class is suppressed.
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
/// Upper bound on detections returned per image.
pub const MAX_DETECTIONS: usize = 300;

const LETTERBOX_COLOR: u8 = 114;

/// Maps between original-image pixels and network-input pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LetterboxTransform {
    pub orig_width: u32,
    pub orig_height: u32,
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl LetterboxTransform {
    pub fn new(orig_width: u32, orig_height: u32, input_size: u32) -> Self {
        let scale = (input_size as f32 / orig_width.max(1) as f32)
            .min(input_size as f32 / orig_height.max(1) as f32);
        let (new_width, new_height) = scaled_dims(orig_width, orig_height, scale, input_size);

        Self {
            orig_width,
            orig_height,
            scale,
            offset_x: ((input_size - new_width) / 2) as f32,
            offset_y: ((input_size - new_height) / 2) as f32,
        }
    }

    /// Network-input point to original-image point, clamped to the image.
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        let ox = ((x - self.offset_x) / self.scale).clamp(0.0, self.orig_width as f32);
        let oy = ((y - self.offset_y) / self.scale).clamp(0.0, self.orig_height as f32);
        (ox, oy)
    }
}

fn scaled_dims(width: u32, height: u32, scale: f32, input_size: u32) -> (u32, u32) {
    let w = ((width as f32 * scale).round() as u32).clamp(1, input_size);
    let h = ((height as f32 * scale).round() as u32).clamp(1, input_size);
    (w, h)
}

/// Resize `image` into an `input_size` square, padding with grey.
pub fn letterbox(image: &DynamicImage, input_size: u32) -> (RgbImage, LetterboxTransform) {
    let rgb = image.to_rgb8();
    let transform = LetterboxTransform::new(rgb.width(), rgb.height(), input_size);
    let (new_width, new_height) =
        scaled_dims(rgb.width(), rgb.height(), transform.scale, input_size);

    let resized = image::imageops::resize(&rgb, new_width, new_height, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(input_size, input_size, Rgb([LETTERBOX_COLOR; 3]));
    image::imageops::replace(
        &mut canvas,
        &resized,
        transform.offset_x as i64,
        transform.offset_y as i64,
    );

    (canvas, transform)
}

/// Planar RGB in `[0, 1]`, laid out as `[3, H, W]`.
pub fn to_chw_tensor(image: &RgbImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; plane * 3];

    for (x, y, pixel) in image.enumerate_pixels() {
        let idx = (y * width + x) as usize;
        for c in 0..3 {
            data[c * plane + idx] = pixel[c] as f32 / 255.0;
        }
    }

    data
}

/// Decode a `[4 + K, A]` prediction tensor (row-major, batch dimension
/// removed) into detections in original-image pixels.
pub fn decode_predictions(
    output: &[f32],
    num_attrs: usize,
    num_anchors: usize,
    confidence: f32,
    iou_threshold: f32,
    transform: &LetterboxTransform,
) -> Vec<BoxDetection> {
    if num_attrs <= 4 || output.len() < num_attrs * num_anchors {
        return Vec::new();
    }
    let at = |attr: usize, anchor: usize| output[attr * num_anchors + anchor];

    let mut candidates = Vec::new();
    for anchor in 0..num_anchors {
        let (class_id, score) = (4..num_attrs)
            .map(|attr| (attr - 4, at(attr, anchor)))
            .fold((0, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });

        if score < confidence {
            continue;
        }

        let (cx, cy) = (at(0, anchor), at(1, anchor));
        let (w, h) = (at(2, anchor), at(3, anchor));
        let (x1, y1) = transform.to_original(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = transform.to_original(cx + w / 2.0, cy + h / 2.0);

        candidates.push(BoxDetection {
            class_id,
            score,
            x1,
            y1,
            x2,
            y2,
        });
    }

    non_max_suppression(candidates, iou_threshold, MAX_DETECTIONS)
}

/// Intersection over union of two corner boxes.
pub fn iou(a: &BoxDetection, b: &BoxDetection) -> f32 {
    let ix = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let iy = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = ix * iy;
    if inter <= 0.0 {
        return 0.0;
    }
    let area_a = a.width().max(0.0) * a.height().max(0.0);
    let area_b = b.width().max(0.0) * b.height().max(0.0);
    inter / (area_a + area_b - inter)
}

/// Greedy class-aware NMS. Output is ordered by descending score.
pub fn non_max_suppression(
    mut boxes: Vec<BoxDetection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<BoxDetection> {
    boxes.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<BoxDetection> = Vec::new();
    for candidate in boxes {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && iou(k, &candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: usize, score: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> BoxDetection {
        BoxDetection {
            class_id,
            score,
            x1,
            y1,
            x2,
            y2,
        }
    }

    #[test]
    fn landscape_image_is_padded_vertically() {
        let t = LetterboxTransform::new(1280, 640, 640);
        assert_eq!(t.scale, 0.5);
        assert_eq!(t.offset_x, 0.0);
        assert_eq!(t.offset_y, 160.0);
    }

    #[test]
    fn to_original_inverts_the_letterbox() {
        let t = LetterboxTransform::new(1280, 640, 640);
        assert_eq!(t.to_original(100.0, 260.0), (200.0, 200.0));
        // Padding maps outside the image and is clamped.
        assert_eq!(t.to_original(0.0, 0.0), (0.0, 0.0));
    }

    #[test]
    fn letterbox_fills_padding_with_grey() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 10, Rgb([255, 0, 0])));
        let (canvas, transform) = letterbox(&img, 40);
        assert_eq!(canvas.dimensions(), (40, 40));
        assert_eq!(transform.offset_y, 10.0);
        assert_eq!(canvas.get_pixel(0, 0), &Rgb([114, 114, 114]));
        assert_eq!(canvas.get_pixel(20, 20), &Rgb([255, 0, 0]));
    }

    #[test]
    fn chw_tensor_is_planar_and_normalized() {
        let img = RgbImage::from_pixel(2, 1, Rgb([255, 0, 51]));
        let data = to_chw_tensor(&img);
        assert_eq!(data.len(), 6);
        assert_eq!(&data[0..2], &[1.0, 1.0]);
        assert_eq!(&data[2..4], &[0.0, 0.0]);
        assert!((data[4] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn nms_keeps_best_box_per_class() {
        let boxes = vec![
            det(0, 0.6, 0.0, 0.0, 10.0, 10.0),
            det(0, 0.9, 1.0, 1.0, 11.0, 11.0),
            det(1, 0.8, 1.0, 1.0, 11.0, 11.0),
            det(0, 0.7, 50.0, 50.0, 60.0, 60.0),
        ];
        let kept = non_max_suppression(boxes, 0.45, MAX_DETECTIONS);
        let scores: Vec<f32> = kept.iter().map(|d| d.score).collect();
        assert_eq!(scores, [0.9, 0.8, 0.7]);
    }

    #[test]
    fn nms_respects_detection_cap() {
        let boxes = (0..10)
            .map(|i| det(0, 0.5, i as f32 * 20.0, 0.0, i as f32 * 20.0 + 10.0, 10.0))
            .collect();
        assert_eq!(non_max_suppression(boxes, 0.45, 3).len(), 3);
    }

    #[test]
    fn decode_filters_by_confidence_and_maps_coordinates() {
        // Two anchors, two classes: rows are cx, cy, w, h, score0, score1.
        let output = [
            320.0, 100.0, // cx
            320.0, 100.0, // cy
            64.0, 10.0, // w
            32.0, 10.0, // h
            0.1, 0.2, // class 0
            0.8, 0.3, // class 1
        ];
        let t = LetterboxTransform::new(640, 640, 640);
        let dets = decode_predictions(&output, 6, 2, 0.5, 0.45, &t);
        assert_eq!(dets.len(), 1);
        let d = dets[0];
        assert_eq!(d.class_id, 1);
        assert_eq!((d.x1, d.y1, d.x2, d.y2), (288.0, 304.0, 352.0, 336.0));
    }

    #[test]
    fn decode_rejects_short_buffers() {
        let t = LetterboxTransform::new(640, 640, 640);
        assert!(decode_predictions(&[0.0; 5], 6, 2, 0.1, 0.45, &t).is_empty());
    }
}
