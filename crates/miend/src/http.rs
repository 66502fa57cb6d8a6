//! HTTP surface: recognition endpoint, health probes, error mapping.

use crate::engine::{EngineError, EngineHandle};
use crate::registry::PatientRegistry;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use mien_core::{Identification, ReferenceSet};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Identity reported when no confident match exists.
const UNKNOWN_IDENTITY: &str = "none";
const UNKNOWN_DIAGNOSIS: &str = "none";

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Caller-correctable input problem; the matcher is never reached.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Extractor/engine outage. Never conflated with a no-match outcome.
    #[error("identification failed: {0}")]
    Engine(#[from] EngineError),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Engine(_) => "ENGINE_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub references: Arc<ReferenceSet>,
    pub registry: Arc<PatientRegistry>,
    pub match_threshold: f32,
    pub started: Instant,
}

#[derive(Debug, Deserialize)]
pub struct RecognizeRequest {
    pub image_base64: String,
}

#[derive(Debug, Serialize)]
pub struct RecognizeResponse {
    /// Tagged outcome: confirmed / rejected / no-face-detected /
    /// no-reference-data.
    pub outcome: &'static str,
    pub user_name: String,
    pub diagnosis: String,
    pub appointment_day: u32,
    pub debug: DebugInfo,
}

/// Best-candidate diagnostics, populated whenever a scan ran.
#[derive(Debug, Serialize)]
pub struct DebugInfo {
    pub file: String,
    pub score: f32,
}

impl RecognizeResponse {
    fn not_found(outcome: &'static str, debug: DebugInfo) -> Self {
        Self {
            outcome,
            user_name: UNKNOWN_IDENTITY.to_string(),
            diagnosis: UNKNOWN_DIAGNOSIS.to_string(),
            appointment_day: 0,
            debug,
        }
    }
}

/// Merge an identification outcome with the record lookup.
///
/// Only a confirmed identity is looked up; every other outcome resolves
/// to the explicit not-found identity without touching the registry. A
/// rejected best candidate still surfaces its file and score.
pub fn resolve(identification: &Identification, registry: &PatientRegistry) -> RecognizeResponse {
    match identification {
        Identification::Confirmed {
            label,
            source_file,
            similarity,
        } => {
            let (diagnosis, appointment_day) = match registry.lookup(label) {
                Some(record) => (record.diagnosis.clone(), record.appointment_day),
                None => {
                    tracing::debug!(label, "no patient record for confirmed identity");
                    (UNKNOWN_DIAGNOSIS.to_string(), 0)
                }
            };
            RecognizeResponse {
                outcome: "confirmed",
                user_name: label.clone(),
                diagnosis,
                appointment_day,
                debug: DebugInfo {
                    file: source_file.clone(),
                    score: *similarity,
                },
            }
        }
        Identification::Rejected {
            source_file,
            similarity,
            ..
        } => RecognizeResponse::not_found(
            "rejected",
            DebugInfo {
                file: source_file.clone(),
                score: *similarity,
            },
        ),
        Identification::NoFaceDetected => RecognizeResponse::not_found(
            "no-face-detected",
            DebugInfo {
                file: UNKNOWN_IDENTITY.to_string(),
                score: 0.0,
            },
        ),
        Identification::NoReferenceData => RecognizeResponse::not_found(
            "no-reference-data",
            DebugInfo {
                file: UNKNOWN_IDENTITY.to_string(),
                score: 0.0,
            },
        ),
    }
}

/// Decode a base64 payload (optionally data-URL prefixed) into an image.
fn decode_image(payload: &str) -> ApiResult<image::DynamicImage> {
    let encoded = match payload.split_once(',') {
        Some((_, tail)) => tail,
        None => payload,
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|err| ApiError::BadRequest(format!("invalid base64 image: {err}")))?;
    image::load_from_memory(&bytes)
        .map_err(|err| ApiError::BadRequest(format!("undecodable image: {err}")))
}

async fn recognize(
    State(state): State<AppState>,
    Json(request): Json<RecognizeRequest>,
) -> ApiResult<Json<RecognizeResponse>> {
    let image = decode_image(&request.image_base64)?;

    let identification = state
        .engine
        .identify(image, state.references.clone(), state.match_threshold)
        .await?;
    tracing::debug!(?identification, "identification complete");

    Ok(Json(resolve(&identification, &state.registry)))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "miend",
        "uptime_seconds": state.started.elapsed().as_secs(),
    }))
}

async fn ready(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ready",
        "reference_entries": state.references.len(),
        "registry_records": state.registry.len(),
    }))
}

/// Build the router with timeout, body-limit and request tracing layers.
pub fn build_router(state: AppState, request_timeout: Duration, max_body_mb: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/v1/recognize", post(recognize))
        .layer(DefaultBodyLimit::max(max_body_mb * 1024 * 1024))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
