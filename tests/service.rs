//! HTTP contract of the inference service, driven through the router with a
//! stand-in detector.

use std::io::Cursor;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use tower::ServiceExt;

use detkit::dataset::ClassList;
use detkit::service::{router, AppState, BoxDetection, Detector, MODEL_IDENTIFIER};
use detkit::DetkitError;

/// Reports one box per image wider than one pixel.
struct StubDetector {
    classes: ClassList,
}

impl Detector for StubDetector {
    fn classes(&self) -> &ClassList {
        &self.classes
    }

    fn detect(
        &self,
        image: &DynamicImage,
        confidence: f32,
    ) -> Result<Vec<BoxDetection>, DetkitError> {
        if image.width() <= 1 {
            return Ok(Vec::new());
        }
        let candidates = [
            BoxDetection {
                class_id: 1,
                score: 0.9,
                x1: 2.0,
                y1: 3.0,
                x2: 12.0,
                y2: 23.0,
            },
            BoxDetection {
                class_id: 0,
                score: 0.2,
                x1: 0.0,
                y1: 0.0,
                x2: 1.0,
                y2: 1.0,
            },
        ];
        Ok(candidates
            .into_iter()
            .filter(|det| det.score >= confidence)
            .collect())
    }
}

struct FailingDetector(ClassList);

impl Detector for FailingDetector {
    fn classes(&self) -> &ClassList {
        &self.0
    }

    fn detect(&self, _: &DynamicImage, _: f32) -> Result<Vec<BoxDetection>, DetkitError> {
        Err(DetkitError::Inference("session exploded".to_string()))
    }
}

fn app() -> axum::Router {
    router(AppState::new(Arc::new(StubDetector {
        classes: ClassList::new(["person", "car"]),
    })))
}

fn png_data_uri(width: u32, height: u32) -> String {
    let img = RgbImage::from_pixel(width, height, Rgb([10, 20, 30]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    format!("data:image/png;base64,{}", STANDARD.encode(bytes))
}

fn detect_request(body: String) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/detect")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .expect("build request")
}

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.expect("router response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let json = serde_json::from_slice(&bytes).expect("json body");
    (status, json)
}

#[tokio::test]
async fn one_pixel_image_yields_empty_success() {
    let body = serde_json::json!({ "image": png_data_uri(1, 1) }).to_string();
    let (status, json) = send(app(), detect_request(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json,
        serde_json::json!({ "success": true, "detections": [], "count": 0 })
    );
}

#[tokio::test]
async fn detections_use_class_names_and_xywh_boxes() {
    let body = serde_json::json!({ "image": png_data_uri(32, 32) }).to_string();
    let (status, json) = send(app(), detect_request(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["count"], 1);
    let det = &json["detections"][0];
    assert_eq!(det["class"], "car");
    assert_eq!(det["bbox"], serde_json::json!([2.0, 3.0, 10.0, 20.0]));
    assert!((det["score"].as_f64().expect("score") - 0.9).abs() < 1e-6);
}

#[tokio::test]
async fn confidence_threshold_is_passed_to_detector() {
    let state = AppState::new(Arc::new(StubDetector {
        classes: ClassList::new(["person", "car"]),
    }))
    .with_confidence(0.1);
    let body = serde_json::json!({ "image": png_data_uri(32, 32) }).to_string();
    let (_, json) = send(router(state), detect_request(body)).await;

    assert_eq!(json["count"], 2);
}

#[tokio::test]
async fn malformed_base64_is_a_failure_envelope() {
    let body = serde_json::json!({ "image": "data:image/png;base64,!!!not base64!!!" }).to_string();
    let (status, json) = send(app(), detect_request(body)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
    assert!(json["error"]
        .as_str()
        .expect("error message")
        .contains("invalid base64"));
}

#[tokio::test]
async fn invalid_json_body_is_a_failure_envelope() {
    let (status, json) = send(app(), detect_request("{not json".to_string())).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn missing_image_field_is_a_failure_envelope() {
    let body = serde_json::json!({ "img": png_data_uri(2, 2) }).to_string();
    let (status, json) = send(app(), detect_request(body)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn oversized_body_is_a_failure_envelope() {
    let body = format!(
        "{{\"image\": \"data:image/png;base64,{}\"}}",
        "A".repeat(33 * 1024 * 1024)
    );
    let (status, json) = send(app(), detect_request(body)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
    assert!(json["error"]
        .as_str()
        .expect("error message")
        .contains("length limit exceeded"));
}

#[tokio::test]
async fn inference_errors_are_reported_not_raised() {
    let app = router(AppState::new(Arc::new(FailingDetector(ClassList::new([
        "person",
    ])))));
    let body = serde_json::json!({ "image": png_data_uri(4, 4) }).to_string();
    let (status, json) = send(app.clone(), detect_request(body)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"]
        .as_str()
        .expect("error message")
        .contains("session exploded"));

    // The service keeps answering after a failed request.
    let health = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("build request");
    let (status, _) = send(app, health).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn health_reports_model_and_classes() {
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("build request");
    let (status, json) = send(app(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["model"], MODEL_IDENTIFIER);
    assert_eq!(
        json["classes"],
        serde_json::json!({ "0": "person", "1": "car" })
    );
}
