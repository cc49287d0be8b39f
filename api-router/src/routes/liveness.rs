use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Liveness probe: 200 whenever the process can answer, independent of the corpus.
pub async fn live() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}
