//! Public types for the email API
use serde::Serialize;

use crate::mail::DispatchResult;

#[derive(Serialize)]
pub struct SendResult {
    pub recipient: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub accepted: Vec<String>,
    pub rejected: Vec<String>,
}

#[derive(Serialize)]
pub struct SendEmailResponse {
    pub success: bool,
    pub message: String,
    pub results: Vec<SendResult>,
}

impl From<DispatchResult> for SendResult {
    fn from(result: DispatchResult) -> Self {
        Self {
            recipient: result.recipient,
            message_id: result.provider_message_id.unwrap_or_default(),
            accepted: result.accepted,
            rejected: result.rejected,
        }
    }
}
