//! Turns a validated email request and its uploads into the message
//! handed to the transport.
//!
//! The HTML handling here is a narrow text transform over markup
//! produced by the paired rich text editor, not a general HTML parser.
use std::sync::LazyLock;

use chrono::Utc;
use itertools::Itertools;
use rand::Rng;
use regex::{Captures, Regex};

use super::error::{FieldError, ValidationError};
use super::models::{
    AttachmentPart, BodyFormat, ComposedMessage, ContentReference, EmailRequest, InlinePart,
    ResolvedDesign, UploadedFile,
};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

// Matches the whole tag so it can be wrapped. Group 1 is the src value.
static IMG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<img[^>]+src="([^"]+)"[^>]*>"#).expect("valid img regex")
});

// Anchored on whitespace so `data-style` and friends don't match
static STYLE_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\sstyle="([^"]*)""#).expect("valid style regex"));

static BR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid br regex"));

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

const IMAGE_STYLE: &str = "max-width: 100%; height: auto; display: block; margin: 0 auto;";
const IMAGE_WRAPPER_CLASS: &str = "email-image-container";
const IMAGE_WRAPPER_STYLE: &str = "margin: 10px 0;";
const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Content images split from regular attachments by Upload Intake.
#[derive(Clone, Copy, Debug, Default)]
pub struct ComposeFiles<'a> {
    pub content_images: &'a [UploadedFile],
    pub attachments: &'a [UploadedFile],
}

/// Syntactic check shared with the browser form, plus whatever the SMTP
/// transport would refuse to put in a header.
pub fn is_valid_address(address: &str) -> bool {
    EMAIL_RE.is_match(address) && address.parse::<lettre::Address>().is_ok()
}

/// Check every required field and report all failures at once.
pub fn validate(request: &EmailRequest) -> Result<(), ValidationError> {
    let mut errors = Vec::new();

    let recipients: Vec<&str> = request
        .recipients
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .collect();
    if recipients.is_empty() {
        errors.push(FieldError::RecipientsEmpty);
    }
    for recipient in recipients {
        if !is_valid_address(recipient) {
            errors.push(FieldError::InvalidRecipient(recipient.to_string()));
        }
    }
    for cc in request.cc.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
        if !is_valid_address(cc) {
            errors.push(FieldError::InvalidCc(cc.to_string()));
        }
    }
    if request.subject.trim().is_empty() {
        errors.push(FieldError::SubjectMissing);
    }
    if request.body.trim().is_empty() {
        errors.push(FieldError::ContentMissing);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::Fields(errors))
    }
}

/// Build the message shared by every recipient. Reads nothing from
/// disk, the stored files are only referenced by path.
pub fn compose(
    request: &EmailRequest,
    files: ComposeFiles<'_>,
) -> Result<ComposedMessage, ValidationError> {
    validate(request)?;

    let body_html = match request.format {
        BodyFormat::Plain => plain_to_html(&request.body),
        BodyFormat::Html => request.body.clone(),
    };

    let rewired = rewire_images(&body_html, files.content_images.len(), fresh_token);
    let mut html_body = wrap_with_design(&rewired.html, &request.design.resolved());
    if let Some(signature) = request
        .signature_html
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        html_body.push_str(&signature_block(signature));
    }

    let plain_text_body = match request.format {
        BodyFormat::Plain => request.body.clone(),
        BodyFormat::Html => html_to_text(&request.body),
    };

    let inline_parts = files
        .content_images
        .iter()
        .enumerate()
        .map(|(i, file)| {
            let (cid, tag_index) = match rewired.references.get(i) {
                Some(reference) => (reference.cid.clone(), Some(reference.tag_index)),
                None => (fresh_token(), None),
            };
            InlinePart {
                cid,
                tag_index,
                filename: file.original_name.clone(),
                file_path: file.stored_path.clone(),
                mime_type: file.mime_type.clone(),
            }
        })
        .collect();

    let attachment_parts = files
        .attachments
        .iter()
        .map(|file| AttachmentPart {
            filename: file.original_name.clone(),
            file_path: file.stored_path.clone(),
            mime_type: file.mime_type.clone(),
        })
        .collect();

    Ok(ComposedMessage {
        subject: request.subject.trim().to_string(),
        html_body,
        plain_text_body,
        inline_parts,
        attachment_parts,
        recipients: normalize_addresses(&request.recipients),
        cc: normalize_addresses(&request.cc),
    })
}

fn normalize_addresses(addresses: &[String]) -> Vec<String> {
    addresses
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .unique()
        .map(String::from)
        .collect()
}

/// `img_{timestamp}_{9 random lowercase alphanumerics}`
pub fn fresh_token() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect();
    format!("img_{}_{}", Utc::now().timestamp_millis(), suffix)
}

/// Escape the characters that would otherwise be read as markup and turn
/// newlines into line breaks.
pub fn plain_to_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace("\r\n", "\n")
        .replace('\n', "<br>")
}

#[derive(Debug)]
pub struct RewiredBody {
    pub html: String,
    pub references: Vec<ContentReference>,
}

/// Point the first `available` non-cid `<img>` tags (in document order)
/// at freshly generated content ids. Matching is positional: the nth
/// tag gets the nth content image. Tags past `available` are left as is,
/// and tags already pointing at a `cid:` are skipped without consuming a
/// slot, so running this over its own output changes nothing.
pub fn rewire_images(
    html: &str,
    available: usize,
    mut next_token: impl FnMut() -> String,
) -> RewiredBody {
    let mut references = Vec::new();
    let mut tag_index = 0;

    let rewritten = IMG_RE.replace_all(html, |caps: &Captures| {
        let (Some(whole), Some(src)) = (caps.get(0), caps.get(1)) else {
            return caps[0].to_string();
        };
        let tag = whole.as_str();
        if src.as_str().starts_with("cid:") {
            return tag.to_string();
        }

        let index = tag_index;
        tag_index += 1;
        if index >= available {
            return tag.to_string();
        }

        let cid = next_token();
        // Offsets of the src value within the tag
        let start = src.start() - whole.start();
        let end = src.end() - whole.start();
        let mut new_tag = String::with_capacity(tag.len() + 64);
        new_tag.push_str(&tag[..start]);
        new_tag.push_str("cid:");
        new_tag.push_str(&cid);
        new_tag.push_str(&tag[end..]);

        references.push(ContentReference {
            tag_index: index,
            cid,
        });
        format!(
            r#"<div class="{}" style="{}">{}</div>"#,
            IMAGE_WRAPPER_CLASS,
            IMAGE_WRAPPER_STYLE,
            with_image_style(&new_tag)
        )
    });

    RewiredBody {
        html: rewritten.into_owned(),
        references,
    }
}

fn with_image_style(tag: &str) -> String {
    if let Some(caps) = STYLE_ATTR_RE.captures(tag) {
        let existing = caps[1].trim().trim_end_matches(';');
        let merged = if existing.is_empty() {
            IMAGE_STYLE.to_string()
        } else {
            format!("{}; {}", existing, IMAGE_STYLE)
        };
        let range = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        return format!("{} style=\"{}\"{}", &tag[..range.start], merged, &tag[range.end..]);
    }

    let insert_at = if tag.ends_with("/>") {
        tag.len() - 2
    } else {
        tag.len() - 1
    };
    let head = tag[..insert_at].trim_end();
    format!("{} style=\"{}\"{}", head, IMAGE_STYLE, &tag[insert_at..])
}

/// Outer container styled from the design record, holding an 80% wide
/// centered block with the body.
pub fn wrap_with_design(body: &str, design: &ResolvedDesign) -> String {
    format!(
        concat!(
            r#"<div dir="ltr" style="background-color: {}; padding: {}; "#,
            r#"border: {} {} {}; border-radius: {}; max-width: {}; margin: 0 auto; "#,
            r#"font-family: {}; line-height: {}; direction: ltr; unicode-bidi: embed;">"#,
            r#"<div style="width: 80%; margin: 0 auto;">{}</div>"#,
            "</div>"
        ),
        design.background_color,
        design.padding,
        design.border_width,
        design.border_style,
        design.border_color,
        design.border_radius,
        design.max_width,
        design.font_family,
        design.line_height,
        body,
    )
}

fn signature_block(signature: &str) -> String {
    format!(r#"<div class="email-signature">{}</div>"#, signature)
}

/// Strip markup for the text alternative. Only `&nbsp; &amp; &lt; &gt;`
/// are decoded, any other entity is left in place.
pub fn html_to_text(html: &str) -> String {
    let text = BR_RE.replace_all(html, " ");
    let text = TAG_RE.replace_all(&text, "");
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}
