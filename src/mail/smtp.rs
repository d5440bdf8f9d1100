//! SMTP transport built on lettre
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use uuid::Uuid;

use super::dispatch::{Envelope, MailTransport, PartContents, SendReceipt};
use super::models::ComposedMessage;
use crate::core::AppConfig;

/// Port that speaks TLS from the first byte; anything else uses STARTTLS
const IMPLICIT_TLS_PORT: u16 = 465;

pub struct SmtpMailer {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    domain: String,
}

impl SmtpMailer {
    /// Must be called inside a tokio runtime: the pooled transport spawns
    /// its connection reaper when built.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let credentials = Credentials::new(config.smtp_user.clone(), config.smtp_password.clone());
        let builder = if config.smtp_port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
        }
        .with_context(|| format!("Invalid SMTP relay {}", config.smtp_host))?;
        let mailer = builder
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        let from: Mailbox = config
            .from_address
            .parse()
            .with_context(|| format!("Invalid from address {}", config.from_address))?;
        let domain = from.email.domain().to_string();

        Ok(Self {
            mailer,
            from,
            domain,
        })
    }

    fn message_id(&self) -> String {
        format!("<{}@{}>", Uuid::new_v4(), self.domain)
    }

    fn build_message(&self, envelope: Envelope<'_>, message_id: &str) -> Result<Message> {
        let to: Mailbox = envelope
            .to
            .parse()
            .with_context(|| format!("Invalid recipient {}", envelope.to))?;

        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(envelope.message.subject.clone())
            .message_id(Some(message_id.to_string()));
        for cc in envelope.cc {
            let cc: Mailbox = cc.parse().with_context(|| format!("Invalid cc {}", cc))?;
            builder = builder.cc(cc);
        }

        Ok(builder.multipart(build_body(envelope.message, envelope.contents))?)
    }
}

fn content_type(mime_type: &str) -> ContentType {
    ContentType::parse(mime_type).unwrap_or_else(|_| {
        tracing::warn!("Unrecognized content type {}, sending as binary", mime_type);
        ContentType::parse("application/octet-stream").expect("valid content type")
    })
}

/// multipart/mixed( related( alternative(text, html), inline... ), attachment... )
/// with the outer layers only present when there is something to put in them.
fn build_body(message: &ComposedMessage, contents: &PartContents) -> MultiPart {
    let alternative = MultiPart::alternative_plain_html(
        message.plain_text_body.clone(),
        message.html_body.clone(),
    );

    let body = if message.inline_parts.is_empty() {
        alternative
    } else {
        let mut related = MultiPart::related().multipart(alternative);
        for (part, bytes) in message.inline_parts.iter().zip(&contents.inline) {
            let inline: SinglePart = Attachment::new_inline(part.cid.clone())
                .body(bytes.to_vec(), content_type(&part.mime_type));
            related = related.singlepart(inline);
        }
        related
    };

    if message.attachment_parts.is_empty() {
        return body;
    }

    let mut mixed = MultiPart::mixed().multipart(body);
    for (part, bytes) in message.attachment_parts.iter().zip(&contents.attachments) {
        mixed = mixed.singlepart(
            Attachment::new(part.filename.clone())
                .body(bytes.to_vec(), content_type(&part.mime_type)),
        );
    }
    mixed
}

/// lettre only returns Ok once the relay has accepted every RCPT in the
/// envelope, so a successful send means the recipient and every cc were
/// accepted. Per-address rejections surface as a failed send instead.
fn accepted_recipients(envelope: Envelope<'_>) -> Vec<String> {
    std::iter::once(envelope.to)
        .chain(envelope.cc.iter().map(String::as_str))
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, envelope: Envelope<'_>) -> Result<SendReceipt> {
        let message_id = self.message_id();
        let email = self.build_message(envelope, &message_id)?;

        let response = self.mailer.send(email).await?;
        tracing::debug!("SMTP response {} for {}", response.code(), envelope.to);

        Ok(SendReceipt {
            message_id,
            accepted: accepted_recipients(envelope),
            rejected: Vec::new(),
        })
    }

    async fn verify(&self) -> Result<()> {
        if self.mailer.test_connection().await? {
            Ok(())
        } else {
            Err(anyhow!("SMTP relay refused the connection"))
        }
    }
}
