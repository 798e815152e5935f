//! The file a user selected for upload.
//!
//! Bytes are held in an `Arc<[u8]>` because the same buffer feeds two
//! independent consumers: the local renderer (spawned task) and the
//! upload request. Cloning an [`UploadFile`] never copies the PDF.
//!
//! No PDF validation happens here. A non-PDF buffer is still uploaded (the
//! backend decides) while the local preview reports a decode error.

use crate::error::ClientError;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// A named byte buffer ready to be submitted.
#[derive(Debug, Clone)]
pub struct UploadFile {
    file_name: String,
    bytes: Arc<[u8]>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a local file, mapping missing files and permission problems to
    /// their own errors.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ClientError::FileNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => ClientError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => ClientError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            },
        })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "upload.pdf".to_string());

        debug!("Selected '{}' ({} bytes)", file_name, bytes.len());
        Ok(Self::new(file_name, bytes))
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Shared handle to the file contents.
    pub fn bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
