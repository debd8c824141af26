//! Liveness endpoint.

use axum::Json;

/// GET /health — always OK while the process is serving.
pub async fn check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
