//! Error types for the pdf-semantic-client library.
//!
//! Two distinct error types reflect two distinct failure scopes:
//!
//! * [`ClientError`]: the current *step* cannot proceed (no file selected,
//!   upload rejected, malformed result payload). Only an upload failure ends
//!   the whole session; every other variant is terminal to its own step.
//!
//! * [`PageError`]: a single preview page failed to rasterise while every
//!   other page is fine. Stored inside
//!   [`crate::render::PageSlot::Failed`] so the preview shows what it can
//!   instead of losing the whole document to one bad page.

use std::path::PathBuf;
use thiserror::Error;

/// All step-level errors returned by the pdf-semantic-client library.
#[derive(Debug, Error)]
pub enum ClientError {
    // ── Validation ───────────────────────────────────────────────────────
    /// `start_upload` was called without a file.
    #[error("No file selected. Choose a PDF before submitting.")]
    NoFileSelected,

    // ── Input errors ─────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists but reading it failed part-way.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Decode errors (local preview only) ───────────────────────────────
    /// The buffer does not start with the `%PDF` magic bytes.
    #[error("File is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// The PDF engine could not parse the document.
    #[error("PDF is corrupt: {detail}")]
    CorruptPdf { detail: String },

    // ── Upload errors ────────────────────────────────────────────────────
    /// The upload request never produced a usable response.
    #[error("Upload failed: {reason}")]
    UploadFailed { reason: String },

    /// The service answered the upload with a non-success status.
    #[error("Upload rejected with HTTP {status}: {body}")]
    UploadRejected { status: u16, body: String },

    // ── Polling errors ───────────────────────────────────────────────────
    /// One status query failed. Transient: the next tick retries.
    #[error("Status query for task {task_id} failed: {detail}")]
    PollTransport { task_id: String, detail: String },

    /// The backend reported `status: failed` for the job.
    #[error("Conversion failed: {message}")]
    JobFailed { task_id: String, message: String },

    // ── Result errors ────────────────────────────────────────────────────
    /// A result artifact could not be downloaded.
    #[error("Failed to fetch {artifact} result for task {task_id}: {reason}")]
    ResultFetch {
        task_id: String,
        artifact: &'static str,
        reason: String,
    },

    /// A result artifact was downloaded but is not well-formed JSON.
    #[error("Malformed {artifact} result: {detail}")]
    ResultParse {
        artifact: &'static str,
        detail: String,
    },

    // ── Session errors ───────────────────────────────────────────────────
    /// A newer upload started before this one resolved; its result was discarded.
    #[error("Upload superseded by a newer submission")]
    Superseded,

    /// An endpoint URL could not be built from the configured base URL.
    #[error("Invalid service endpoint: {0}")]
    InvalidEndpoint(String),

    // ── Pdfium binding errors ────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDFium is normally downloaded automatically on first run.\n\
If the auto-download failed, you can:\n\
  • Check your internet connection and try again.\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Config errors ────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ───────────────────────────────────────────────────────
    /// Could not write an output artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// True for failures the poller retries on its next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::PollTransport { .. })
    }

    /// True for errors that only concern the local preview.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            ClientError::NotAPdf { .. }
                | ClientError::CorruptPdf { .. }
                | ClientError::PdfiumBindingFailed(_)
        )
    }
}

/// A non-fatal error for a single preview page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    /// The page size could not be read.
    #[error("Page {page}: viewport unavailable: {detail}")]
    Viewport { page: usize, detail: String },

    /// Page rasterisation failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },
}

impl PageError {
    /// 1-indexed page number the error refers to.
    pub fn page(&self) -> usize {
        match self {
            PageError::Viewport { page, .. } | PageError::RenderFailed { page, .. } => *page,
        }
    }
}
