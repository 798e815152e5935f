//! Task data model: identifiers and the status vocabulary of the conversion service.
//!
//! The backend owns the status vocabulary. Only `completed` and `failed`
//! carry meaning for the client; every other value, including ones this
//! crate has never seen, counts as "still in progress".

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier the backend assigns to one conversion job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job status as reported by `GET /status/{task_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    /// Any value outside the known set, kept verbatim (e.g. `not_found`).
    Other(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Other(s) => s,
        }
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "queued" => TaskStatus::Queued,
            "processing" => TaskStatus::Processing,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Other(s),
        }
    }
}

impl From<TaskStatus> for String {
    fn from(s: TaskStatus) -> Self {
        match s {
            TaskStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a status query response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusReport {
    pub fn new(status: TaskStatus) -> Self {
        Self {
            status,
            step: None,
            error: None,
        }
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Best label for an in-progress job: the step when present, else the raw status.
    pub fn progress_label(&self) -> &str {
        match self.step.as_deref() {
            Some(step) if !step.is_empty() => step,
            _ => self.status.as_str(),
        }
    }
}

/// Body of a successful upload response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub task_id: TaskId,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl UploadReceipt {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: TaskId::new(task_id),
            status: None,
            filename: None,
        }
    }
}
