//! Multipart upload handling.
//!
//! Accepted files are written straight to the upload directory and handed back
//! as a [`StoredFile`]. The guard deletes the file when dropped, so every
//! early return between the upload and the point where the owning record is
//! saved leaves nothing behind. Call [`StoredFile::persist`] once the record
//! that references the file has been committed.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use axum::extract::multipart::{Field, Multipart};
use chrono::Utc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::StoredFileRef;

pub const FILE_FIELD: &str = "file";

pub const ALLOWED_EXTENSIONS: [&str; 6] = ["pdf", "doc", "docx", "jpg", "jpeg", "png"];

pub const ALLOWED_MIME_TYPES: [&str; 5] = [
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "image/jpeg",
    "image/png",
];

#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub dir: PathBuf,
    pub max_bytes: u64,
}

impl UploadPolicy {
    pub fn new(dir: PathBuf, max_bytes: u64) -> Self {
        Self { dir, max_bytes }
    }

    /// Checks the extension and declared MIME type, returning the normalized
    /// extension to store the file under.
    pub fn check_type(&self, file_name: &str, mime_type: &str) -> Result<String, ApiError> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let mime = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if ALLOWED_EXTENSIONS.contains(&extension.as_str())
            && ALLOWED_MIME_TYPES.contains(&mime.as_str())
        {
            Ok(extension)
        } else {
            Err(ApiError::UnsupportedMedia(format!(
                "Invalid file type '{file_name}' ({}). Only {} files are allowed",
                if mime.is_empty() { "no content type" } else { mime.as_str() },
                ALLOWED_EXTENSIONS.join(", ")
            )))
        }
    }

    pub async fn read_form(&self, multipart: &mut Multipart) -> Result<DocumentForm, ApiError> {
        let mut form = DocumentForm::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_owned);

            match file_name.as_deref() {
                // Browsers send an empty part when no file was picked.
                Some("") => continue,
                Some(_) => {
                    if name != FILE_FIELD {
                        return Err(ApiError::BadRequest(format!(
                            "Unexpected file field '{name}'"
                        )));
                    }
                    if form.file.is_some() {
                        return Err(ApiError::BadRequest(
                            "Only one file can be uploaded per request".to_string(),
                        ));
                    }
                    form.file = Some(self.store_field(field).await?);
                }
                None => {
                    let value = field.text().await?;
                    form.fields.insert(name, value);
                }
            }
        }

        Ok(form)
    }

    async fn store_field(&self, mut field: Field<'_>) -> Result<StoredFile, ApiError> {
        let field_name = field.name().unwrap_or(FILE_FIELD).to_string();
        let original_name = field
            .file_name()
            .and_then(|name| Path::new(name).file_name())
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        let mime_type = field.content_type().unwrap_or_default().to_string();

        let extension = self.check_type(&original_name, &mime_type)?;

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ApiError::storage("Failed to prepare upload directory", e.into()))?;

        let path = self.dir.join(stored_name(&field_name, &extension));
        let mut out = create_exclusive(&path).await?;
        // Armed only once the file is ours, so a name collision never removes another upload.
        let mut stored = StoredFile {
            path,
            original_name,
            size: 0,
            mime_type,
            armed: true,
        };

        while let Some(chunk) = field.chunk().await? {
            stored.size += chunk.len() as u64;
            if stored.size > self.max_bytes {
                return Err(ApiError::PayloadTooLarge(format!(
                    "File exceeds the maximum size of {} bytes",
                    self.max_bytes
                )));
            }
            out.write_all(&chunk)
                .await
                .map_err(|e| ApiError::storage("Failed to store upload", e.into()))?;
        }
        out.flush()
            .await
            .map_err(|e| ApiError::storage("Failed to store upload", e.into()))?;

        tracing::debug!(path = %stored.path.display(), size = stored.size, "upload stored");
        Ok(stored)
    }
}

/// Opens a fresh file, failing rather than truncating one that already exists.
async fn create_exclusive(path: &Path) -> Result<File, ApiError> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| ApiError::storage("Failed to store upload", e.into()))
}

/// `<field>-<unix millis>-<random>.<ext>`
fn stored_name(field: &str, extension: &str) -> String {
    let random = Uuid::new_v4().as_u128() % 1_000_000_000;
    format!(
        "{field}-{}-{random}.{extension}",
        Utc::now().timestamp_millis()
    )
}

/// Text fields of a multipart request plus the uploaded file, if any.
#[derive(Debug, Default)]
pub struct DocumentForm {
    pub fields: HashMap<String, String>,
    pub file: Option<StoredFile>,
}

impl DocumentForm {
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// An uploaded file on disk that is removed on drop unless persisted.
#[derive(Debug)]
pub struct StoredFile {
    path: PathBuf,
    original_name: String,
    size: u64,
    mime_type: String,
    armed: bool,
}

impl StoredFile {
    pub fn file_ref(&self) -> StoredFileRef {
        StoredFileRef {
            path: self.path.clone(),
            original_name: self.original_name.clone(),
            size: self.size,
            mime_type: self.mime_type.clone(),
        }
    }

    pub fn persist(mut self) -> StoredFileRef {
        self.armed = false;
        self.file_ref()
    }
}

impl Drop for StoredFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "discarded orphaned upload"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to discard orphaned upload")
            }
        }
    }
}

/// Removes a file that belonged to a deleted or replaced record.
pub async fn discard(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "removed stored file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "stored file was already missing")
        }
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove stored file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn policy() -> UploadPolicy {
        UploadPolicy::new(PathBuf::from("uploads"), 1024)
    }

    #[test]
    fn accepts_allowed_types() {
        assert_eq!(
            policy().check_type("lease.PDF", "application/pdf").unwrap(),
            "pdf"
        );
        assert_eq!(policy().check_type("scan.jpeg", "image/jpeg").unwrap(), "jpeg");
        assert_eq!(
            policy()
                .check_type(
                    "contract.docx",
                    "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
                )
                .unwrap(),
            "docx"
        );
    }

    #[test]
    fn rejects_bad_extension_or_mime() {
        assert!(matches!(
            policy().check_type("payload.exe", "application/pdf"),
            Err(ApiError::UnsupportedMedia(_))
        ));
        assert!(matches!(
            policy().check_type("notes.pdf", "text/plain"),
            Err(ApiError::UnsupportedMedia(_))
        ));
        assert!(matches!(
            policy().check_type("noext", ""),
            Err(ApiError::UnsupportedMedia(_))
        ));
    }

    #[test]
    fn generated_names_keep_field_and_extension() {
        let name = stored_name("file", "png");
        assert!(name.starts_with("file-"));
        assert!(name.ends_with(".png"));
        assert_eq!(name.split('-').count(), 3);
        assert_ne!(name, stored_name("file", "png"));
    }

    fn stored_in(dir: &Path) -> StoredFile {
        let path = dir.join("file-1-1.pdf");
        std::fs::write(&path, b"%PDF").unwrap();
        StoredFile {
            path,
            original_name: "a.pdf".to_string(),
            size: 4,
            mime_type: "application/pdf".to_string(),
            armed: true,
        }
    }

    #[test]
    fn dropped_upload_is_removed() {
        let dir = tempdir().unwrap();
        let stored = stored_in(dir.path());
        let path = stored.path.clone();
        drop(stored);
        assert!(!path.exists());
    }

    #[test]
    fn persisted_upload_stays() {
        let dir = tempdir().unwrap();
        let file_ref = stored_in(dir.path()).persist();
        assert!(file_ref.path.exists());
        assert_eq!(file_ref.size, 4);
        assert_eq!(file_ref.original_name, "a.pdf");
    }

    #[tokio::test]
    async fn name_collision_fails_without_clobbering() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file-1-1.pdf");
        std::fs::write(&path, b"first upload").unwrap();

        let err = create_exclusive(&path).await.unwrap_err();
        assert!(matches!(err, ApiError::Storage { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), b"first upload");
    }
}
