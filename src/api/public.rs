//! Public API types

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde_json::{Value, json};

use crate::mail::{UploadError, ValidationError};

// Errors

pub struct ApiError {
    error: anyhow::Error,
    details: Option<Value>,
}

impl ApiError {
    /// Attach extra context for the client, e.g. per-recipient results
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    fn status(&self) -> StatusCode {
        if self.error.downcast_ref::<ValidationError>().is_some()
            || self.error.downcast_ref::<UploadError>().is_some()
        {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Convert `ApiError` into a JSON response. Client errors get a 400,
/// everything else a 500. Only the top level message is exposed.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Always log the error
        if status.is_server_error() {
            tracing::error!("{:#}", self.error);
        } else {
            tracing::warn!("Rejected request: {}", self.error);
        }

        let message = if status.is_client_error() {
            "Invalid request"
        } else {
            "Failed to send emails"
        };
        let details = self.details.or_else(|| {
            self.error
                .downcast_ref::<ValidationError>()
                .map(|e| json!(e.details()))
        });

        let mut body = json!({
            "success": false,
            "message": message,
            "error": self.error.to_string(),
        });
        if let Some(details) = details {
            body["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}

/// Enables using `?` on functions that return `Result<_,
/// anyhow::Error>` to turn them into `Result<_, ApiError>`
impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self {
            error: err.into(),
            details: None,
        }
    }
}

// Re-export public types from each route

pub mod email {
    pub use crate::api::routes::email::public::*;
}

pub mod health {
    pub use crate::api::routes::health::public::*;
}
