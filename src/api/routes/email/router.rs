//! Router for the email API

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::{Router, response::Json};
use serde_json::json;

use super::public;
use crate::api::public::ApiError;
use crate::api::state::AppState;
use crate::core::UploadLimits;
use crate::mail::{
    ComposeFiles, EmailRequest, Submission, ValidationError, check_results, compose, dispatch,
    intake,
};

type SharedState = Arc<AppState>;

/// Receive a composed email with its uploads and send it to every
/// recipient. Stored uploads are removed on every exit path.
async fn send_email(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<public::SendEmailResponse>, ApiError> {
    let Submission {
        email_json,
        uploads,
    } = intake::receive(
        multipart,
        &state.config.upload_limits,
        &state.config.upload_dir,
    )
    .await?;
    tracing::debug!("Received submission with {} files", uploads.len());

    // Dropping `uploads` on an early return removes the stored files
    let raw = email_json.ok_or_else(|| {
        ValidationError::PayloadNotParseable(format!(
            "missing `{}` field",
            intake::EMAIL_FIELD
        ))
    })?;
    let request = EmailRequest::from_json(&raw)?;
    let message = compose(
        &request,
        ComposeFiles {
            content_images: uploads.content_images(),
            attachments: uploads.attachments(),
        },
    )?;

    let results = dispatch(
        state.transport.as_ref(),
        &message,
        &message.recipients,
        &message.cc,
    )
    .await;

    let cleanup = uploads.cleanup();
    tracing::debug!("Issued removal of {} uploads", cleanup.attempted());

    if let Err(e) = check_results(&results) {
        return Err(ApiError::from(e).with_details(json!(results)));
    }

    let count = results.len();
    Ok(Json(public::SendEmailResponse {
        success: true,
        message: format!("Emails sent successfully to {} recipients", count),
        results: results.into_iter().map(public::SendResult::from).collect(),
    }))
}

/// Create the email router
pub fn router(limits: &UploadLimits) -> Router<SharedState> {
    Router::new()
        .route("/send", axum::routing::post(send_email))
        .layer(DefaultBodyLimit::max(limits.max_body_size()))
}
