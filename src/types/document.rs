use std::path::Path;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{Error, Result};

/// Processing state of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentStatus {
    /// Queued for processing.
    Pending,
    /// Being parsed and embedded.
    Processing,
    /// Ready to be retrieved from.
    Completed,
    /// Processing failed.
    Failed,
}

impl DocumentStatus {
    /// Returns true once the backend will no longer change the status.
    pub fn is_settled(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }
}

/// A document stored in a context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Backend identifier.
    pub id: String,

    /// Original file name.
    pub filename: String,

    /// Upload time.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,

    /// Processing state.
    pub status: DocumentStatus,

    /// Link to download the original file.
    #[serde(default)]
    pub download_url: String,
}

/// Result of uploading a single document into an existing context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentUploadResponse {
    /// Identifier of the new document.
    pub document_id: String,

    /// Backend status message.
    #[serde(default)]
    pub message: String,
}

/// A file held in memory so a multipart request can be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    /// File name sent to the backend.
    pub filename: String,

    /// MIME type of the part.
    pub content_type: String,

    /// File contents.
    pub bytes: Vec<u8>,
}

impl UploadFile {
    /// A PDF held in memory.
    pub fn pdf(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: "application/pdf".to_string(),
            bytes,
        }
    }

    /// Read a PDF from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                Error::validation(
                    format!("{} has no usable file name", path.display()),
                    Some("path".to_string()),
                )
            })?
            .to_string();
        let bytes = std::fs::read(path)
            .map_err(|e| Error::io(format!("could not read {}: {e}", path.display()), e))?;
        Ok(Self::pdf(filename, bytes))
    }
}
