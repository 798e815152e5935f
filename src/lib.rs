//! # pdf-semantic-client
//!
//! Client-side orchestration for a remote PDF-to-semantic-HTML conversion
//! service: submit a PDF, follow the conversion job, load its results, and
//! preview the pages locally while the server works.
//!
//! ## Why this crate?
//!
//! The conversion itself happens on a server and can take minutes. What the
//! client has to get right is everything around it: the user should see
//! their document immediately, a second submission must cleanly supersede
//! the first (no stale status lines, no duplicate polling), and a broken
//! result artifact must not take the others down with it.
//!
//! ## Flow Overview
//!
//! ```text
//! PDF bytes
//!  │
//!  ├─ 1. Preview   rasterise pages locally via pdfium (concurrent, page order kept)
//!  ├─ 2. Upload    multipart POST → task id
//!  ├─ 3. Poll      status every N ms until completed / failed
//!  └─ 4. Load      HTML by URL + JSON pretty-printed, independently
//! ```
//!
//! Steps 1 and 2 start together; the preview never waits for the network.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_semantic_client::{NoopView, SessionConfig, SessionController, UploadFile};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::builder()
//!         .base_url("http://localhost:8000")
//!         .build()?;
//!     let session = SessionController::connect(config, Arc::new(NoopView))?;
//!
//!     let file = UploadFile::from_path("document.pdf").await?;
//!     let task_id = session.start_upload(Some(file)).await?;
//!     println!("task {task_id}: {:?}", session.wait_settled().await);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `pdfsem` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `bundled` | off     | Embeds the pdfium shared library in the binary |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf-semantic-client = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod input;
pub mod loader;
pub mod poller;
pub mod render;
pub mod service;
pub mod session;
pub mod task;
pub mod view;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{SessionConfig, SessionConfigBuilder};
pub use error::{ClientError, PageError};
pub use input::UploadFile;
pub use loader::pretty_json;
pub use poller::{PollHandle, PollMetrics};
pub use render::{
    LocalRenderer, PageSlot, PdfBackend, PdfDocumentHandle, PdfiumBackend, RenderSession, Surface,
    Viewport,
};
pub use service::{ConversionService, HttpConversionService};
pub use session::{SessionController, SessionPhase};
pub use task::{StatusReport, TaskId, TaskStatus, UploadReceipt};
pub use view::{ChannelView, NoopView, SessionView, ViewEvent, ViewHandle};
