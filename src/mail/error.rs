//! Error types for the send pipeline
use serde::Serialize;

/// One failed field of the email payload.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("At least one recipient is required")]
    RecipientsEmpty,
    #[error("Invalid recipient address: {0}")]
    InvalidRecipient(String),
    #[error("Invalid cc address: {0}")]
    InvalidCc(String),
    #[error("Subject is required")]
    SubjectMissing,
    #[error("Email content is required")]
    ContentMissing,
}

impl FieldError {
    pub fn field(&self) -> &'static str {
        match self {
            Self::RecipientsEmpty | Self::InvalidRecipient(_) => "recipients",
            Self::InvalidCc(_) => "cc",
            Self::SubjectMissing => "subject",
            Self::ContentMissing => "content",
        }
    }
}

#[derive(Serialize)]
pub struct FieldErrorDetail {
    pub field: &'static str,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Email payload could not be parsed: {0}")]
    PayloadNotParseable(String),
    #[error("Invalid email request: {}", join_fields(.0))]
    Fields(Vec<FieldError>),
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn details(&self) -> Vec<FieldErrorDetail> {
        match self {
            Self::PayloadNotParseable(reason) => vec![FieldErrorDetail {
                field: "email",
                message: reason.clone(),
            }],
            Self::Fields(errors) => errors
                .iter()
                .map(|e| FieldErrorDetail {
                    field: e.field(),
                    message: e.to_string(),
                })
                .collect(),
        }
    }
}

/// Upload caps or shape violated. Always the client's fault.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Too many files in field {field} (limit {limit})")]
    TooManyInField { field: &'static str, limit: usize },
    #[error("Too many files (limit {limit})")]
    TooManyFiles { limit: usize },
    #[error("File {name} exceeds the {limit} byte limit")]
    FileTooLarge { name: String, limit: usize },
    #[error("Unexpected file field: {0}")]
    UnexpectedField(String),
    #[error("Only image files are allowed as content images: {name} is {mime_type}")]
    UnsupportedType { name: String, mime_type: String },
    #[error("Malformed multipart body: {0}")]
    Malformed(String),
}

/// At least one per-recipient send failed.
#[derive(Debug, thiserror::Error)]
#[error("Failed to send emails to {failed} of {total} recipients: {first_error}")]
pub struct DispatchError {
    pub failed: usize,
    pub total: usize,
    pub first_error: String,
}
