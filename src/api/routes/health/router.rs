//! Router for the health API

use std::sync::Arc;

use axum::{Json, Router};
use chrono::Utc;

use super::public::HealthResponse;
use crate::api::state::AppState;

type SharedState = Arc<AppState>;

/// Liveness check
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Create the health router
pub fn router() -> Router<SharedState> {
    Router::new().route("/", axum::routing::get(health))
}
