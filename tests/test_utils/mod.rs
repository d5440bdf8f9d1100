//! Test utilities for integration tests
#![allow(dead_code)]
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use axum::{Router, body::Body};
use tempfile::TempDir;

use email_sender::api::AppState;
use email_sender::api::app;
use email_sender::core::{AppConfig, UploadLimits};
use email_sender::mail::{Envelope, MailTransport, SendReceipt};

/// What the transport saw for one send
#[derive(Clone, Debug)]
pub struct SentMail {
    pub to: String,
    pub cc: Vec<String>,
    pub subject: String,
    pub html_body: String,
    pub plain_text_body: String,
    pub inline_cids: Vec<String>,
    pub inline_files: Vec<String>,
    pub attachment_files: Vec<String>,
}

/// In-memory transport that records every envelope and fails for the
/// configured recipients.
#[derive(Default)]
pub struct RecordingTransport {
    pub fail_for: Vec<String>,
    pub sent: Mutex<Vec<SentMail>>,
}

impl RecordingTransport {
    pub fn failing_for(recipients: &[&str]) -> Self {
        Self {
            fail_for: recipients.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, envelope: Envelope<'_>) -> Result<SendReceipt> {
        let message = envelope.message;
        self.sent.lock().unwrap().push(SentMail {
            to: envelope.to.to_string(),
            cc: envelope.cc.to_vec(),
            subject: message.subject.clone(),
            html_body: message.html_body.clone(),
            plain_text_body: message.plain_text_body.clone(),
            inline_cids: message.inline_parts.iter().map(|p| p.cid.clone()).collect(),
            inline_files: message
                .inline_parts
                .iter()
                .map(|p| p.filename.clone())
                .collect(),
            attachment_files: message
                .attachment_parts
                .iter()
                .map(|p| p.filename.clone())
                .collect(),
        });

        if self.fail_for.iter().any(|f| f == envelope.to) {
            return Err(anyhow!("550 mailbox unavailable"));
        }
        Ok(SendReceipt {
            message_id: format!("<{}@test.local>", envelope.to),
            accepted: vec![envelope.to.to_string()],
            rejected: Vec::new(),
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub transport: Arc<RecordingTransport>,
    pub upload_dir: PathBuf,
    // Removed when the test finishes
    _dir: TempDir,
}

impl TestApp {
    /// Poll until the background upload cleanup has emptied the upload
    /// directory, returning the number of files left behind.
    pub async fn remaining_uploads(&self) -> usize {
        let mut remaining = count_files(&self.upload_dir);
        for _ in 0..100 {
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            remaining = count_files(&self.upload_dir);
        }
        remaining
    }
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// Creates a test application router backed by a recording transport
/// and a temporary upload directory.
pub fn test_app() -> TestApp {
    test_app_with(RecordingTransport::default(), UploadLimits::default())
}

pub fn test_app_with(transport: RecordingTransport, upload_limits: UploadLimits) -> TestApp {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let upload_dir = dir.path().join("uploads");

    let app_config = AppConfig {
        smtp_host: String::from("smtp.test.local"),
        smtp_port: 465,
        smtp_user: String::from("sender@test.local"),
        smtp_password: String::from("test-password"),
        from_address: String::from("sender@test.local"),
        allowed_origins: Vec::new(),
        port: String::from("5000"),
        upload_dir: upload_dir.clone(),
        upload_limits,
    };
    let transport = Arc::new(transport);
    let app_state = AppState::new(app_config, transport.clone());

    TestApp {
        router: app(Arc::new(app_state)),
        transport,
        upload_dir,
        _dir: dir,
    }
}

/// Hand built multipart/form-data body
pub struct MultipartBody {
    boundary: String,
    buf: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self {
            boundary: String::from("----email-sender-test-boundary"),
            buf: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.buf.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary, name, value
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, filename: &str, content_type: &str, data: &[u8]) -> Self {
        self.buf.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                self.boundary, name, filename, content_type
            )
            .as_bytes(),
        );
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\r\n");
        self
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn into_body(mut self) -> Body {
        self.buf
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        Body::from(self.buf)
    }
}

pub async fn body_to_json(body: Body) -> serde_json::Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}
