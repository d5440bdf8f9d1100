//! Fan a composed message out to every recipient
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;

use super::error::DispatchError;
use super::models::{ComposedMessage, DispatchResult};

/// File contents of a message's inline and attachment parts, in the same
/// order as `inline_parts` and `attachment_parts`. Read once per request
/// and shared by every send.
#[derive(Clone, Debug, Default)]
pub struct PartContents {
    pub inline: Vec<Bytes>,
    pub attachments: Vec<Bytes>,
}

impl PartContents {
    pub async fn load(message: &ComposedMessage) -> Result<Self> {
        let mut inline = Vec::with_capacity(message.inline_parts.len());
        for part in &message.inline_parts {
            inline.push(read_part(&part.file_path).await?);
        }
        let mut attachments = Vec::with_capacity(message.attachment_parts.len());
        for part in &message.attachment_parts {
            attachments.push(read_part(&part.file_path).await?);
        }
        Ok(Self {
            inline,
            attachments,
        })
    }
}

async fn read_part(path: &std::path::Path) -> Result<Bytes> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Bytes::from(bytes))
}

/// One send: the shared message addressed to a single recipient.
#[derive(Clone, Copy, Debug)]
pub struct Envelope<'a> {
    pub to: &'a str,
    pub cc: &'a [String],
    pub message: &'a ComposedMessage,
    pub contents: &'a PartContents,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: String,
    pub accepted: Vec<String>,
    pub rejected: Vec<String>,
}

/// Delivers one envelope. Implemented over SMTP by `SmtpMailer` and by
/// in-memory transports in tests.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, envelope: Envelope<'_>) -> Result<SendReceipt>;

    /// Check that the transport can reach its provider
    async fn verify(&self) -> Result<()> {
        Ok(())
    }
}

fn failed(recipient: &str, detail: String) -> DispatchResult {
    DispatchResult {
        recipient: recipient.to_string(),
        success: false,
        provider_message_id: None,
        error_detail: Some(detail),
        accepted: Vec::new(),
        rejected: vec![recipient.to_string()],
    }
}

/// Send `message` to every recipient concurrently with the same cc
/// list, returning one result per recipient in recipient order. Never
/// fails as a whole; per-recipient failures are in the results. Part
/// contents are read before the fan-out; if that fails nothing is sent
/// and every recipient reports the read error.
pub async fn dispatch(
    transport: &dyn MailTransport,
    message: &ComposedMessage,
    recipients: &[String],
    cc: &[String],
) -> Vec<DispatchResult> {
    let contents = match PartContents::load(message).await {
        Ok(contents) => contents,
        Err(e) => {
            tracing::error!("Failed to load message parts: {:#}", e);
            return recipients
                .iter()
                .map(|r| failed(r, e.to_string()))
                .collect();
        }
    };
    let contents = &contents;

    let sends = recipients.iter().map(|recipient| async move {
        let envelope = Envelope {
            to: recipient,
            cc,
            message,
            contents,
        };
        match transport.send(envelope).await {
            Ok(receipt) => {
                tracing::info!("Sent {} to {}", receipt.message_id, recipient);
                DispatchResult {
                    recipient: recipient.clone(),
                    success: true,
                    provider_message_id: Some(receipt.message_id),
                    error_detail: None,
                    accepted: receipt.accepted,
                    rejected: receipt.rejected,
                }
            }
            Err(e) => {
                tracing::error!("Failed to send to {}: {:#}", recipient, e);
                failed(recipient, e.to_string())
            }
        }
    });

    join_all(sends).await
}

/// All-or-nothing view over the per-recipient results.
pub fn check_results(results: &[DispatchResult]) -> Result<(), DispatchError> {
    let failed: Vec<&DispatchResult> = results.iter().filter(|r| !r.success).collect();
    match failed.first() {
        None => Ok(()),
        Some(first) => Err(DispatchError {
            failed: failed.len(),
            total: results.len(),
            first_error: first.error_detail.clone().unwrap_or_default(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::anyhow;

    use super::*;
    use crate::mail::models::AttachmentPart;

    #[derive(Default)]
    struct RecordingTransport {
        fail_for: Vec<String>,
        sent: Mutex<Vec<(String, Vec<String>)>>,
        attachment_sizes: Mutex<Vec<Vec<usize>>>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn send(&self, envelope: Envelope<'_>) -> Result<SendReceipt> {
            // Later recipients finish first
            if envelope.to.starts_with('a') {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            self.sent
                .lock()
                .unwrap()
                .push((envelope.to.to_string(), envelope.cc.to_vec()));
            self.attachment_sizes
                .lock()
                .unwrap()
                .push(envelope.contents.attachments.iter().map(|b| b.len()).collect());
            if self.fail_for.iter().any(|f| f == envelope.to) {
                return Err(anyhow!("550 mailbox unavailable"));
            }
            Ok(SendReceipt {
                message_id: format!("<{}@test>", envelope.to),
                accepted: vec![envelope.to.to_string()],
                rejected: Vec::new(),
            })
        }
    }

    fn message() -> ComposedMessage {
        ComposedMessage {
            subject: "Hi".into(),
            html_body: "<p>Hi</p>".into(),
            plain_text_body: "Hi".into(),
            inline_parts: Vec::new(),
            attachment_parts: Vec::new(),
            recipients: vec!["a@x.com".into(), "b@x.com".into()],
            cc: vec!["c@x.com".into()],
        }
    }

    #[tokio::test]
    async fn test_dispatch_sends_once_per_recipient_in_order() {
        let transport = RecordingTransport::default();
        let message = message();
        let results = dispatch(&transport, &message, &message.recipients, &message.cc).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].recipient, "a@x.com");
        assert_eq!(results[1].recipient, "b@x.com");
        assert!(results.iter().all(|r| r.success));
        assert_eq!(
            results[0].provider_message_id.as_deref(),
            Some("<a@x.com@test>")
        );

        let sent = transport.sent.lock().unwrap();
        // Both sends were in flight together, so b finished first
        assert_eq!(sent[0].0, "b@x.com");
        assert!(sent.iter().all(|(_, cc)| cc == &vec!["c@x.com".to_string()]));
        assert!(check_results(&results).is_ok());
    }

    #[tokio::test]
    async fn test_dispatch_reports_partial_failure() {
        let transport = RecordingTransport {
            fail_for: vec!["b@x.com".into()],
            ..Default::default()
        };
        let message = message();
        let results = dispatch(&transport, &message, &message.recipients, &[]).await;

        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(results[1].rejected, vec!["b@x.com"]);
        assert_eq!(
            results[1].error_detail.as_deref(),
            Some("550 mailbox unavailable")
        );

        let err = check_results(&results).unwrap_err();
        assert_eq!(err.failed, 1);
        assert_eq!(err.total, 2);
        assert_eq!(err.first_error, "550 mailbox unavailable");
    }

    #[tokio::test]
    async fn test_dispatch_shares_loaded_contents() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("report-1-abc.pdf");
        std::fs::write(&report, b"%PDF-1.4").unwrap();

        let transport = RecordingTransport::default();
        let mut message = message();
        message.attachment_parts.push(AttachmentPart {
            filename: "report.pdf".into(),
            file_path: report.clone(),
            mime_type: "application/pdf".into(),
        });
        let results = dispatch(&transport, &message, &message.recipients, &[]).await;

        assert!(results.iter().all(|r| r.success));
        // Both sends saw the bytes read before the fan-out
        let sizes = transport.attachment_sizes.lock().unwrap();
        assert_eq!(*sizes, vec![vec![8], vec![8]]);
    }

    #[tokio::test]
    async fn test_dispatch_fails_every_recipient_when_parts_unreadable() {
        let transport = RecordingTransport::default();
        let mut message = message();
        message.attachment_parts.push(AttachmentPart {
            filename: "gone.pdf".into(),
            file_path: PathBuf::from("/nonexistent/gone.pdf"),
            mime_type: "application/pdf".into(),
        });
        let results = dispatch(&transport, &message, &message.recipients, &[]).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.success));
        assert!(
            results[0]
                .error_detail
                .as_deref()
                .unwrap()
                .starts_with("Failed to read /nonexistent/gone.pdf")
        );
        assert!(transport.sent.lock().unwrap().is_empty());
    }
}
