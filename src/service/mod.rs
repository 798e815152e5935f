//! Conversion service boundary.
//!
//! The backend is a black box reachable through four operations: accept an
//! upload, report a job's status, and serve the two result artifacts (plus
//! the optional intermediate layout dump). [`ConversionService`] is the seam
//! the session talks to; [`HttpConversionService`] is the production
//! implementation over `reqwest`.

pub mod http;

pub use http::HttpConversionService;

use crate::error::ClientError;
use crate::input::UploadFile;
use crate::task::{StatusReport, TaskId, UploadReceipt};
use async_trait::async_trait;
use reqwest::Url;

/// Operations the session needs from the conversion backend.
#[async_trait]
pub trait ConversionService: Send + Sync {
    /// Submit `file` as a new job. Issues exactly one request.
    ///
    /// # Errors
    /// `UploadRejected` for a non-success status, `UploadFailed` for
    /// transport failures or an unreadable response body.
    async fn upload(&self, file: &UploadFile) -> Result<UploadReceipt, ClientError>;

    /// Query the job's current status.
    ///
    /// # Errors
    /// `PollTransport` for any failure; callers treat it as transient.
    async fn status(&self, task_id: &TaskId) -> Result<StatusReport, ClientError>;

    /// Location of the converted HTML document. Not fetched by the client.
    fn html_url(&self, task_id: &TaskId) -> Result<Url, ClientError>;

    /// Raw body of the structured JSON result.
    ///
    /// # Errors
    /// `ResultFetch` when the artifact cannot be downloaded.
    async fn fetch_json(&self, task_id: &TaskId) -> Result<String, ClientError>;

    /// Raw body of the backend's intermediate layout dump.
    ///
    /// # Errors
    /// `ResultFetch` when the artifact cannot be downloaded.
    async fn fetch_intermediate(&self, task_id: &TaskId) -> Result<String, ClientError>;
}
