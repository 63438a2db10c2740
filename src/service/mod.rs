//! HTTP inference service.
//!
//! `POST /detect` accepts a data-URI encoded image and returns detections;
//! `GET /health` reports the loaded model and its classes. Every request-path
//! error becomes a JSON failure envelope with status 500.

pub mod detector;
pub mod model;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod payload;
pub mod processing;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::error::DetkitError;

pub use detector::{BoxDetection, Detection, Detector};

/// Model name reported by `/health`.
pub const MODEL_IDENTIFIER: &str = "YOLOv8 Banking Detection";
pub const DEFAULT_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;

const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Shared by every handler; built once before the listener binds.
#[derive(Clone)]
pub struct AppState {
    pub detector: Arc<dyn Detector>,
    pub model_name: String,
    pub confidence: f32,
}

impl AppState {
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self {
            detector,
            model_name: MODEL_IDENTIFIER.to_string(),
            confidence: DEFAULT_CONFIDENCE,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/detect", post(detect))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl+C.
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<(), DetkitError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| DetkitError::Server(format!("failed to bind {addr}: {e}")))?;

    tracing::info!(%addr, model = %state.model_name, "inference service listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| DetkitError::Server(e.to_string()))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutting down");
    }
}

/// Category of a request-path failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Decode,
    Inference,
    Internal,
}

impl From<&DetkitError> for FailureKind {
    fn from(err: &DetkitError) -> Self {
        match err {
            DetkitError::Decode(_) => FailureKind::Decode,
            DetkitError::Inference(_) => FailureKind::Inference,
            _ => FailureKind::Internal,
        }
    }
}

/// Result of one `/detect` request before it becomes a response.
#[derive(Debug)]
pub enum DetectOutcome {
    Success { detections: Vec<Detection> },
    Failure { kind: FailureKind, message: String },
}

impl From<Result<Vec<Detection>, DetkitError>> for DetectOutcome {
    fn from(result: Result<Vec<Detection>, DetkitError>) -> Self {
        match result {
            Ok(detections) => DetectOutcome::Success { detections },
            Err(err) => DetectOutcome::Failure {
                kind: FailureKind::from(&err),
                message: err.to_string(),
            },
        }
    }
}

#[derive(Serialize)]
struct SuccessBody {
    success: bool,
    count: usize,
    detections: Vec<Detection>,
}

#[derive(Serialize)]
struct FailureBody {
    success: bool,
    error: String,
}

impl IntoResponse for DetectOutcome {
    fn into_response(self) -> Response {
        match self {
            DetectOutcome::Success { detections } => (
                StatusCode::OK,
                Json(SuccessBody {
                    success: true,
                    count: detections.len(),
                    detections,
                }),
            )
                .into_response(),
            DetectOutcome::Failure { kind, message } => {
                tracing::warn!(?kind, "detect failed: {message}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(FailureBody {
                        success: false,
                        error: message,
                    }),
                )
                    .into_response()
            }
        }
    }
}

async fn detect(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> DetectOutcome {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            return DetectOutcome::Failure {
                kind: FailureKind::Decode,
                message: format!("invalid request body: {}", rejection.body_text()),
            }
        }
    };
    let detector = Arc::clone(&state.detector);
    let confidence = state.confidence;

    let joined = tokio::task::spawn_blocking(move || {
        let image = payload::decode_request(&body)?;
        detector::detect_image(detector.as_ref(), &image, confidence)
    })
    .await;

    match joined {
        Ok(result) => {
            if let Ok(detections) = &result {
                tracing::debug!(count = detections.len(), "detect succeeded");
            }
            DetectOutcome::from(result)
        }
        Err(err) => DetectOutcome::Failure {
            kind: FailureKind::Internal,
            message: format!("inference task failed: {err}"),
        },
    }
}

#[derive(Serialize)]
struct HealthBody<'a> {
    status: &'static str,
    model: &'a str,
    classes: BTreeMap<usize, &'a str>,
}

async fn health(State(state): State<AppState>) -> Response {
    let body = HealthBody {
        status: "healthy",
        model: &state.model_name,
        classes: state.detector.classes().iter().collect(),
    };
    Json(body).into_response()
}
