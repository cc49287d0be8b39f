use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Readiness probe: returns 200 once a non-empty corpus is loaded, else 503.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    let validator = if state.engine.has_validator() {
        "enabled"
    } else {
        "disabled"
    };

    if state.corpus_images > 0 {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "checks": { "corpus": "ok", "validator": validator },
                "images": state.corpus_images
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "checks": { "corpus": "empty", "validator": validator },
                "reason": "no images loaded"
            })),
        )
    }
}
