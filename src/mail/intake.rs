//! Upload Intake: decode the multipart submission, store each file
//! under a collision resistant name and own those paths until cleanup.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use axum::extract::Multipart;
use axum::extract::multipart::Field;
use chrono::Utc;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

use super::error::UploadError;
use super::models::{FileRole, UploadedFile};
use crate::core::UploadLimits;

/// Name of the text field carrying the JSON encoded email payload
pub const EMAIL_FIELD: &str = "email";

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Everything received in one request.
#[derive(Debug)]
pub struct Submission {
    pub email_json: Option<String>,
    pub uploads: Uploads,
}

/// Files stored for one request. Every stored path is deleted exactly
/// once, either through `cleanup` or when this is dropped.
#[derive(Debug, Default)]
pub struct Uploads {
    content_images: Vec<UploadedFile>,
    attachments: Vec<UploadedFile>,
    // Every path created on disk, including partially written files
    paths: Vec<PathBuf>,
}

impl Uploads {
    pub fn content_images(&self) -> &[UploadedFile] {
        &self.content_images
    }

    pub fn attachments(&self) -> &[UploadedFile] {
        &self.attachments
    }

    pub fn len(&self) -> usize {
        self.content_images.len() + self.attachments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    fn push(&mut self, file: UploadedFile) {
        match file.role {
            FileRole::ContentImage => self.content_images.push(file),
            FileRole::Attachment => self.attachments.push(file),
        }
    }

    /// Issue one deletion per stored path. The returned handle can be
    /// dropped, the deletions keep running in the background.
    pub fn cleanup(mut self) -> CleanupHandle {
        remove_all(std::mem::take(&mut self.paths))
    }
}

impl Drop for Uploads {
    fn drop(&mut self) {
        if !self.paths.is_empty() {
            let _ = remove_all(std::mem::take(&mut self.paths));
        }
    }
}

/// Dropping this detaches the deletions, they are not cancelled.
pub struct CleanupHandle {
    tasks: Vec<JoinHandle<()>>,
    attempted: usize,
}

impl CleanupHandle {
    /// Number of paths a deletion was issued for
    pub fn attempted(&self) -> usize {
        self.attempted
    }

    /// Wait until every deletion has finished
    pub async fn wait(self) {
        futures::future::join_all(self.tasks).await;
    }
}

fn remove_all(paths: Vec<PathBuf>) -> CleanupHandle {
    let mut tasks = Vec::with_capacity(paths.len());
    let attempted = paths.len();

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            for path in paths {
                tasks.push(handle.spawn(remove_file(path)));
            }
        }
        // Outside of a runtime (e.g. dropped during shutdown) delete inline
        Err(_) => {
            for path in paths {
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!("Failed to remove upload {}: {}", path.display(), e);
                }
            }
        }
    }

    CleanupHandle { tasks, attempted }
}

async fn remove_file(path: PathBuf) {
    match tokio::fs::remove_file(&path).await {
        Ok(()) => tracing::debug!("Removed upload {}", path.display()),
        Err(e) => tracing::warn!("Failed to remove upload {}: {}", path.display(), e),
    }
}

/// Enforces the per field and combined file caps as parts arrive.
#[derive(Debug)]
pub struct UploadCounter<'a> {
    limits: &'a UploadLimits,
    content_images: usize,
    attachments: usize,
}

impl<'a> UploadCounter<'a> {
    pub fn new(limits: &'a UploadLimits) -> Self {
        Self {
            limits,
            content_images: 0,
            attachments: 0,
        }
    }

    pub fn admit(&mut self, role: FileRole) -> Result<(), UploadError> {
        let (count, limit) = match role {
            FileRole::ContentImage => (&mut self.content_images, self.limits.max_content_images),
            FileRole::Attachment => (&mut self.attachments, self.limits.max_attachments),
        };
        if *count >= limit {
            return Err(UploadError::TooManyInField {
                field: role.field_name(),
                limit,
            });
        }
        if self.content_images + self.attachments >= self.limits.max_files {
            return Err(UploadError::TooManyFiles {
                limit: self.limits.max_files,
            });
        }

        match role {
            FileRole::ContentImage => self.content_images += 1,
            FileRole::Attachment => self.attachments += 1,
        }
        Ok(())
    }
}

/// `{base}-{timestamp}-{suffix}{.ext}` from the client supplied name,
/// keeping only the final path component.
pub fn storage_name(original: &str, timestamp: i64, suffix: &str) -> String {
    let base_name = Path::new(original)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let path = Path::new(base_name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("upload");
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();

    format!("{}-{}-{}{}", stem, timestamp, suffix, extension)
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..9)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

fn malformed(err: axum::extract::multipart::MultipartError) -> anyhow::Error {
    UploadError::Malformed(err.body_text()).into()
}

/// Read every part of the submission. Files are written to `upload_dir`
/// (created on first use) and returned with the raw email payload.
/// Any failure deletes whatever was already stored.
pub async fn receive(
    mut multipart: Multipart,
    limits: &UploadLimits,
    upload_dir: &Path,
) -> Result<Submission> {
    let mut uploads = Uploads::default();
    let mut counter = UploadCounter::new(limits);
    let mut email_json = None;
    let mut dir_ready = false;

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();

        if field.file_name().is_none() {
            if name == EMAIL_FIELD {
                email_json = Some(field.text().await.map_err(malformed)?);
            } else {
                tracing::debug!("Ignoring form field {}", name);
            }
            continue;
        }

        let role = FileRole::from_field_name(&name)
            .ok_or_else(|| UploadError::UnexpectedField(name.clone()))?;
        counter.admit(role)?;

        if !dir_ready {
            tokio::fs::create_dir_all(upload_dir)
                .await
                .with_context(|| format!("Failed to create {}", upload_dir.display()))?;
            dir_ready = true;
        }

        let file = store_field(field, role, limits, upload_dir, &mut uploads).await?;
        tracing::debug!(
            "Stored {} {} ({} bytes) at {}",
            role.field_name(),
            file.original_name,
            file.size_bytes,
            file.stored_path.display()
        );
        uploads.push(file);
    }

    Ok(Submission {
        email_json,
        uploads,
    })
}

async fn store_field(
    mut field: Field<'_>,
    role: FileRole,
    limits: &UploadLimits,
    upload_dir: &Path,
    uploads: &mut Uploads,
) -> Result<UploadedFile> {
    let original_name = field
        .file_name()
        .and_then(|n| Path::new(n).file_name())
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("upload")
        .to_string();
    let mime_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();

    if role == FileRole::ContentImage && !mime_type.starts_with("image/") {
        return Err(UploadError::UnsupportedType {
            name: original_name,
            mime_type,
        }
        .into());
    }

    let stored_path = upload_dir.join(storage_name(
        &original_name,
        Utc::now().timestamp_millis(),
        &random_suffix(),
    ));
    let mut out = tokio::fs::File::create(&stored_path)
        .await
        .with_context(|| format!("Failed to create {}", stored_path.display()))?;
    uploads.track(stored_path.clone());

    let mut size = 0usize;
    while let Some(chunk) = field.chunk().await.map_err(malformed)? {
        size += chunk.len();
        if size > limits.max_file_size {
            return Err(UploadError::FileTooLarge {
                name: original_name,
                limit: limits.max_file_size,
            }
            .into());
        }
        out.write_all(&chunk).await?;
    }
    out.flush().await?;

    Ok(UploadedFile {
        role,
        original_name,
        stored_path,
        mime_type,
        size_bytes: size as u64,
    })
}
