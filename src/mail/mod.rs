//! The send pipeline: intake, composition and dispatch
pub mod compose;
pub mod dispatch;
pub mod error;
pub mod intake;
pub mod models;
pub mod smtp;

pub use compose::{ComposeFiles, compose};
pub use dispatch::{Envelope, MailTransport, PartContents, SendReceipt, check_results, dispatch};
pub use error::{DispatchError, FieldError, UploadError, ValidationError};
pub use intake::{Submission, Uploads};
pub use models::*;
pub use smtp::SmtpMailer;
