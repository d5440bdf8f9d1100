use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Caps enforced while decoding uploaded files.
#[derive(Clone, Debug)]
pub struct UploadLimits {
    pub max_content_images: usize,
    pub max_attachments: usize,
    pub max_files: usize,
    pub max_file_size: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_content_images: 10,
            max_attachments: 10,
            max_files: 20,
            max_file_size: 25 * 1024 * 1024,
        }
    }
}

impl UploadLimits {
    /// Largest request body that can carry a submission within the caps,
    /// plus headroom for the JSON field and multipart framing.
    pub fn max_body_size(&self) -> usize {
        self.max_files * self.max_file_size + 1024 * 1024
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_password: String,
    pub from_address: String,
    pub allowed_origins: Vec<String>,
    pub port: String,
    pub upload_dir: PathBuf,
    pub upload_limits: UploadLimits,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let smtp_user = env::var("SMTP_USER").context("Missing env var SMTP_USER")?;
        let smtp_password = env::var("SMTP_PASSWORD").context("Missing env var SMTP_PASSWORD")?;
        let smtp_host = env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string());
        let smtp_port = match env::var("SMTP_PORT") {
            Ok(port) => port
                .parse()
                .with_context(|| format!("Invalid SMTP_PORT: {}", port))?,
            Err(_) => 465,
        };
        let from_address = env::var("SMTP_FROM").unwrap_or_else(|_| smtp_user.clone());
        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .map(|origins| parse_origins(&origins))
            .unwrap_or_default();
        let port = env::var("PORT").unwrap_or_else(|_| "5000".to_string());
        let upload_dir = env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string());

        Ok(Self {
            smtp_host,
            smtp_port,
            smtp_user,
            smtp_password,
            from_address,
            allowed_origins,
            port,
            upload_dir: PathBuf::from(upload_dir),
            upload_limits: UploadLimits::default(),
        })
    }
}

fn parse_origins(origins: &str) -> Vec<String> {
    origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_origins() {
        assert_eq!(
            parse_origins("http://localhost:5173, https://mail.example.com,,"),
            vec!["http://localhost:5173", "https://mail.example.com"]
        );
        assert!(parse_origins("  ").is_empty());
    }

    #[test]
    fn test_body_limit_covers_all_files() {
        let limits = UploadLimits::default();
        assert!(limits.max_body_size() > 20 * 25 * 1024 * 1024);
    }
}
