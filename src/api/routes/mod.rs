//! API routes module

pub mod email;
pub mod health;

use std::sync::Arc;

use crate::api::state::AppState;
use axum::Router;

type SharedState = Arc<AppState>;

/// Create the combined API router
pub fn router(state: &AppState) -> Router<SharedState> {
    Router::new()
        // Email composition and sending
        .nest("/email", email::router(&state.config.upload_limits))
        // Liveness check
        .nest("/health", health::router())
}
