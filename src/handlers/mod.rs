pub mod admin;
pub mod auth;
pub mod content;
pub mod downloads;
pub mod progress;

use axum::Json;
use serde_json::{Value, json};

/// GET /api/healthz
pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
