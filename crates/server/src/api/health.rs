//! `ApiError` — the one response type every handler's `Result` error arm
//! converges on — plus liveness/readiness probes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub async fn healthz() -> &'static str {
    "ok"
}

/// Store ping + reconciler-alive check, matching §10.
pub async fn readyz(axum::extract::State(state): axum::extract::State<AppState>) -> Response {
    match state.store.list_projects() {
        Ok(_) => (StatusCode::OK, "ready").into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, format!("store unavailable: {e}")).into_response(),
    }
}
