//! File storage for message attachments.
//!
//! Files live under the media root at
//! `message_uploads/YYYY/MM/DD/<unique>_<name>`; the relative path is what
//! the database keeps. The on-disk name is sanitised, the name shown to
//! users is the client's own.

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::NewAttachment;

const UPLOAD_DIR: &str = "message_uploads";
const MAX_NAME_LEN: usize = 100;
/// Width of the `original_name` column
const MAX_ORIGINAL_NAME_CHARS: usize = 255;

/// A file received from a client, fully buffered
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait AttachmentStorage: Send + Sync {
    /// Write the file and return the reference to persist
    async fn save(&self, file: &UploadedFile) -> AppResult<NewAttachment>;

    async fn open(&self, file_path: &str) -> AppResult<Vec<u8>>;

    /// Best-effort delete; missing files are not an error
    async fn remove(&self, file_path: &str) -> AppResult<()>;
}

fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or_default()
}

/// The client's file name without directories, as shown on download.
/// Truncated from the front so the extension survives.
pub fn original_file_name(name: &str) -> String {
    let base = base_name(name).trim();
    let count = base.chars().count();
    let kept: String = base
        .chars()
        .skip(count.saturating_sub(MAX_ORIGINAL_NAME_CHARS))
        .collect();
    if kept.is_empty() {
        "file".to_string()
    } else {
        kept
    }
}

/// Keep the last path segment and replace anything unusual with `_`
pub fn sanitize_file_name(name: &str) -> String {
    let base = base_name(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // Only ASCII remains, so byte offsets are char offsets. Keep the tail
    // so the extension survives truncation.
    let cleaned = cleaned.trim_start_matches('.');
    let cleaned = &cleaned[cleaned.len().saturating_sub(MAX_NAME_LEN)..];
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

pub struct LocalAttachmentStorage {
    root: PathBuf,
}

impl LocalAttachmentStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a stored reference, refusing anything that escapes the root
    fn resolve(&self, file_path: &str) -> AppResult<PathBuf> {
        let relative = Path::new(file_path);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || file_path.is_empty() {
            return Err(AppError::BadRequest(format!(
                "invalid attachment path {file_path}"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl AttachmentStorage for LocalAttachmentStorage {
    async fn save(&self, file: &UploadedFile) -> AppResult<NewAttachment> {
        let now = Utc::now();
        let original_name = original_file_name(&file.name);
        let disk_name = sanitize_file_name(&file.name);
        let dir = format!(
            "{UPLOAD_DIR}/{:04}/{:02}/{:02}",
            now.year(),
            now.month(),
            now.day()
        );
        let file_path = format!("{dir}/{}_{disk_name}", Uuid::new_v4().simple());

        fs::create_dir_all(self.root.join(&dir)).await?;
        fs::write(self.root.join(&file_path), &file.bytes).await?;
        tracing::debug!(%file_path, size = file.bytes.len(), "attachment stored");

        Ok(NewAttachment {
            file_path,
            original_name,
        })
    }

    async fn open(&self, file_path: &str) -> AppResult<Vec<u8>> {
        let path = self.resolve(file_path)?;
        Ok(fs::read(path).await?)
    }

    async fn remove(&self, file_path: &str) -> AppResult<()> {
        let path = self.resolve(file_path)?;
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
