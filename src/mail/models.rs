//! Data carried through the send pipeline
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

use super::error::ValidationError;

/// How the body was authored. Resolved once when the payload is parsed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    #[serde(alias = "text")]
    Plain,
    #[default]
    Html,
}

/// Presentation of the outer container. Unset fields fall back to
/// the defaults in `Design::resolved`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Design {
    #[serde(default, deserialize_with = "css_value")]
    pub background_color: Option<String>,
    #[serde(default, deserialize_with = "css_value")]
    pub padding: Option<String>,
    #[serde(default, deserialize_with = "css_value")]
    pub border_width: Option<String>,
    #[serde(default, deserialize_with = "css_value")]
    pub border_style: Option<String>,
    #[serde(default, deserialize_with = "css_value")]
    pub border_color: Option<String>,
    #[serde(default, deserialize_with = "css_value")]
    pub border_radius: Option<String>,
    #[serde(default, deserialize_with = "css_value")]
    pub max_width: Option<String>,
    #[serde(default, deserialize_with = "css_value")]
    pub font_family: Option<String>,
    #[serde(default, deserialize_with = "css_value")]
    pub line_height: Option<String>,
}

/// A `Design` with every field filled in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedDesign {
    pub background_color: String,
    pub padding: String,
    pub border_width: String,
    pub border_style: String,
    pub border_color: String,
    pub border_radius: String,
    pub max_width: String,
    pub font_family: String,
    pub line_height: String,
}

impl Design {
    pub fn resolved(&self) -> ResolvedDesign {
        fn or(value: &Option<String>, default: &str) -> String {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        }

        ResolvedDesign {
            background_color: or(&self.background_color, "#ffffff"),
            padding: or(&self.padding, "20px"),
            border_width: or(&self.border_width, "1px"),
            border_style: or(&self.border_style, "solid"),
            border_color: or(&self.border_color, "#e0e0e0"),
            border_radius: or(&self.border_radius, "8px"),
            max_width: or(&self.max_width, "600px"),
            font_family: or(&self.font_family, "Arial, sans-serif"),
            line_height: or(&self.line_height, "1.5"),
        }
    }
}

// The design panel sends some values (line height, widths) as numbers
fn css_value<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Css {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Css>::deserialize(deserializer)?.map(|value| match value {
        Css::Text(s) => s,
        Css::Number(n) => n.to_string(),
    }))
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
        None => Vec::new(),
    })
}

/// The email payload as submitted in the `email` multipart field.
#[derive(Clone, Debug, Deserialize)]
pub struct EmailRequest {
    #[serde(default, deserialize_with = "one_or_many")]
    pub recipients: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub cc: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default, rename = "content")]
    pub body: String,
    #[serde(default)]
    pub format: BodyFormat,
    #[serde(default, rename = "signature")]
    pub signature_html: Option<String>,
    #[serde(default)]
    pub design: Design,
}

impl EmailRequest {
    /// Parse the JSON encoded payload field. A payload that can't be
    /// decoded is a client encoding bug, distinct from missing fields.
    pub fn from_json(raw: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(raw).map_err(|e| ValidationError::PayloadNotParseable(e.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FileRole {
    ContentImage,
    Attachment,
}

impl FileRole {
    pub fn from_field_name(name: &str) -> Option<Self> {
        match name {
            "contentImage" => Some(Self::ContentImage),
            "attachment" => Some(Self::Attachment),
            _ => None,
        }
    }

    pub fn field_name(&self) -> &'static str {
        match self {
            Self::ContentImage => "contentImage",
            Self::Attachment => "attachment",
        }
    }
}

#[derive(Clone, Debug)]
pub struct UploadedFile {
    pub role: FileRole,
    pub original_name: String,
    pub stored_path: PathBuf,
    pub mime_type: String,
    pub size_bytes: u64,
}

/// Binding of the nth rewritten `<img>` tag to a content image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentReference {
    pub tag_index: usize,
    pub cid: String,
}

#[derive(Clone, Debug)]
pub struct InlinePart {
    pub cid: String,
    /// Index of the `<img>` tag that references this part, if any.
    pub tag_index: Option<usize>,
    pub filename: String,
    pub file_path: PathBuf,
    pub mime_type: String,
}

#[derive(Clone, Debug)]
pub struct AttachmentPart {
    pub filename: String,
    pub file_path: PathBuf,
    pub mime_type: String,
}

/// The message shared by every per-recipient send.
#[derive(Clone, Debug)]
pub struct ComposedMessage {
    pub subject: String,
    pub html_body: String,
    pub plain_text_body: String,
    pub inline_parts: Vec<InlinePart>,
    pub attachment_parts: Vec<AttachmentPart>,
    /// De-duplicated, validated recipients in submission order
    pub recipients: Vec<String>,
    pub cc: Vec<String>,
}

impl ComposedMessage {
    pub fn referenced_inline_parts(&self) -> impl Iterator<Item = &InlinePart> {
        self.inline_parts.iter().filter(|p| p.tag_index.is_some())
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub recipient: String,
    pub success: bool,
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub accepted: Vec<String>,
    pub rejected: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_single_recipient_string() {
        let request = EmailRequest::from_json(
            r#"{"recipients": "a@x.com", "subject": "Hi", "content": "<p>Hi</p>"}"#,
        )
        .unwrap();
        assert_eq!(request.recipients, vec!["a@x.com"]);
        assert!(request.cc.is_empty());
        assert_eq!(request.format, BodyFormat::Html);
        assert!(request.signature_html.is_none());
    }

    #[test]
    fn test_request_reads_plain_format_and_design() {
        let request = EmailRequest::from_json(
            r##"{
                "recipients": ["a@x.com"],
                "cc": ["c@x.com"],
                "subject": "Hi",
                "content": "hello",
                "format": "plain",
                "design": {"backgroundColor": "#000000", "lineHeight": 1.8}
            }"##,
        )
        .unwrap();
        assert_eq!(request.format, BodyFormat::Plain);
        assert_eq!(request.cc, vec!["c@x.com"]);

        let design = request.design.resolved();
        assert_eq!(design.background_color, "#000000");
        assert_eq!(design.line_height, "1.8");
        assert_eq!(design.padding, "20px");
    }

    #[test]
    fn test_malformed_payload_is_distinct_error() {
        let err = EmailRequest::from_json("{recipients: ").unwrap_err();
        assert!(matches!(err, ValidationError::PayloadNotParseable(_)));
    }

    #[test]
    fn test_design_defaults() {
        let design = Design::default().resolved();
        assert_eq!(
            design,
            ResolvedDesign {
                background_color: "#ffffff".into(),
                padding: "20px".into(),
                border_width: "1px".into(),
                border_style: "solid".into(),
                border_color: "#e0e0e0".into(),
                border_radius: "8px".into(),
                max_width: "600px".into(),
                font_family: "Arial, sans-serif".into(),
                line_height: "1.5".into(),
            }
        );
    }
}
