//! HTTP client for the conversion service.
//!
//! | Operation          | Request                                 |
//! |--------------------|-----------------------------------------|
//! | upload             | `POST /upload` (multipart, field `file`) |
//! | status             | `GET /status/{task_id}`                 |
//! | html_url           | `/results/{task_id}/html` (not fetched) |
//! | fetch_json         | `GET /results/{task_id}/json`           |
//! | fetch_intermediate | `GET /intermediate/{task_id}`           |
//!
//! Task ids are pushed as escaped path segments, never spliced into strings.

use super::ConversionService;
use crate::config::SessionConfig;
use crate::error::ClientError;
use crate::input::UploadFile;
use crate::task::{StatusReport, TaskId, UploadReceipt};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use tracing::{debug, info};

/// Longest response-body excerpt carried in an error.
const MAX_BODY_EXCERPT: usize = 200;

/// [`ConversionService`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpConversionService {
    client: Client,
    base_url: Url,
}

impl HttpConversionService {
    /// Build a client for `config.base_url` with `config.request_timeout`.
    pub fn new(config: &SessionConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ClientError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self::with_client(client, config.base_url.clone()))
    }

    /// Use an existing `reqwest::Client`.
    pub fn with_client(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `base_url` with `segments` appended as escaped path segments.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidEndpoint(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn fetch_artifact(
        &self,
        task_id: &TaskId,
        artifact: &'static str,
        url: Url,
    ) -> Result<String, ClientError> {
        let fetch_failed = |reason: String| ClientError::ResultFetch {
            task_id: task_id.to_string(),
            artifact,
            reason,
        };

        debug!("Fetching {} result: {}", artifact, url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_failed(format!("HTTP {status}")));
        }

        response.text().await.map_err(|e| fetch_failed(e.to_string()))
    }
}

#[async_trait]
impl ConversionService for HttpConversionService {
    async fn upload(&self, file: &UploadFile) -> Result<UploadReceipt, ClientError> {
        let url = self.endpoint(&["upload"])?;
        info!("Uploading '{}' ({} bytes) to {}", file.file_name(), file.len(), url);

        let part = Part::bytes(file.bytes().to_vec())
            .file_name(file.file_name().to_string())
            .mime_str("application/pdf")
            .map_err(|e| ClientError::UploadFailed {
                reason: e.to_string(),
            })?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ClientError::UploadFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::UploadRejected {
                status: status.as_u16(),
                body: excerpt(&body),
            });
        }

        let receipt: UploadReceipt =
            response
                .json()
                .await
                .map_err(|e| ClientError::UploadFailed {
                    reason: format!("unreadable upload response: {e}"),
                })?;
        info!(task_id = %receipt.task_id, "Upload accepted");
        Ok(receipt)
    }

    async fn status(&self, task_id: &TaskId) -> Result<StatusReport, ClientError> {
        let transport = |detail: String| ClientError::PollTransport {
            task_id: task_id.to_string(),
            detail,
        };
        let url = self.endpoint(&["status", task_id.as_str()])?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(transport(format!("HTTP {status}")));
        }

        response
            .json::<StatusReport>()
            .await
            .map_err(|e| transport(format!("unreadable status body: {e}")))
    }

    fn html_url(&self, task_id: &TaskId) -> Result<Url, ClientError> {
        self.endpoint(&["results", task_id.as_str(), "html"])
    }

    async fn fetch_json(&self, task_id: &TaskId) -> Result<String, ClientError> {
        let url = self.endpoint(&["results", task_id.as_str(), "json"])?;
        self.fetch_artifact(task_id, "JSON", url).await
    }

    async fn fetch_intermediate(&self, task_id: &TaskId) -> Result<String, ClientError> {
        let url = self.endpoint(&["intermediate", task_id.as_str()])?;
        self.fetch_artifact(task_id, "intermediate", url).await
    }
}

/// Trim a response body for inclusion in an error message.
fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_BODY_EXCERPT {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX_BODY_EXCERPT).collect();
    format!("{cut}\u{2026}")
}
