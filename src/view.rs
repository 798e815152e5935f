//! UI boundary: the display surfaces a session drives.
//!
//! Inject an [`Arc<dyn SessionView>`] into [`crate::SessionController`] to
//! receive every user-visible effect: submit-control state, the status
//! line, the preview region, the embedded HTML document and the JSON text
//! region.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: a
//! terminal spinner, a GUI toolkit or a test recorder can all implement it
//! without the library knowing how the host renders. Hosts that prefer a
//! channel can use [`ChannelView`], which forwards every callback as a
//! [`ViewEvent`].
//!
//! # Reentrancy
//!
//! Callbacks run while the session holds its state lock, which is what
//! makes the "no stale update after a newer upload" guarantee hold.
//! Implementations must return quickly and must not call back into the
//! controller.
//!
//! # Example
//!
//! ```rust
//! use pdf_semantic_client::SessionView;
//! use std::sync::Mutex;
//!
//! struct StatusLog(Mutex<Vec<String>>);
//!
//! impl SessionView for StatusLog {
//!     fn on_status(&self, text: &str) {
//!         self.0.lock().unwrap().push(text.to_string());
//!     }
//! }
//!
//! let log = StatusLog(Mutex::new(Vec::new()));
//! log.on_status("Uploading…");
//! log.on_views_cleared(); // default no-op
//! assert_eq!(log.0.lock().unwrap().len(), 1);
//! ```

use crate::render::Surface;
use reqwest::Url;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Display surfaces driven by a conversion session.
///
/// All methods have default no-op implementations so hosts only override
/// the regions they actually show.
pub trait SessionView: Send + Sync {
    /// Enable or disable the submission control.
    fn on_submit_enabled(&self, enabled: bool) {
        let _ = enabled;
    }

    /// Reset the preview, HTML and JSON regions to their empty state.
    fn on_views_cleared(&self) {}

    /// Replace the status line.
    fn on_status(&self, text: &str) {
        let _ = text;
    }

    /// Show a blocking notice (validation problems).
    fn on_notice(&self, text: &str) {
        let _ = text;
    }

    /// The preview will hold `page_count` pages; allocate placeholders.
    fn on_preview_started(&self, page_count: usize) {
        let _ = page_count;
    }

    /// Page `page_num` (1-indexed) finished rasterising. Pages arrive in
    /// completion order; place each into its own slot.
    fn on_preview_page(&self, page_num: usize, surface: &Surface) {
        let _ = (page_num, surface);
    }

    /// Show a message in the preview region (decode or page failure).
    fn on_preview_error(&self, message: &str) {
        let _ = message;
    }

    /// Point the embedded document viewer at the converted HTML.
    fn on_html_ready(&self, url: &Url) {
        let _ = url;
    }

    /// Fill the text region with the pretty-printed JSON result.
    fn on_json_ready(&self, pretty: &str) {
        let _ = pretty;
    }

    /// Show a message in place of the JSON result.
    fn on_json_error(&self, message: &str) {
        let _ = message;
    }

    /// Pretty-printed intermediate layout dump, when requested.
    fn on_intermediate_ready(&self, pretty: &str) {
        let _ = pretty;
    }
}

/// A no-op view for headless use.
pub struct NoopView;

impl SessionView for NoopView {}

/// Convenience alias matching the type stored in the controller.
pub type ViewHandle = Arc<dyn SessionView>;

/// Owned form of every [`SessionView`] callback.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    SubmitEnabled(bool),
    ViewsCleared,
    Status(String),
    Notice(String),
    PreviewStarted(usize),
    PreviewPage { page_num: usize, surface: Surface },
    PreviewError(String),
    HtmlReady(Url),
    JsonReady(String),
    JsonError(String),
    IntermediateReady(String),
}

/// Forwards every callback into an unbounded channel.
///
/// Sending never blocks, so it is safe under the session lock. Events
/// sent after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelView {
    tx: UnboundedSender<ViewEvent>,
}

impl ChannelView {
    pub fn new(tx: UnboundedSender<ViewEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: ViewEvent) {
        let _ = self.tx.send(event);
    }
}

impl SessionView for ChannelView {
    fn on_submit_enabled(&self, enabled: bool) {
        self.send(ViewEvent::SubmitEnabled(enabled));
    }

    fn on_views_cleared(&self) {
        self.send(ViewEvent::ViewsCleared);
    }

    fn on_status(&self, text: &str) {
        self.send(ViewEvent::Status(text.to_string()));
    }

    fn on_notice(&self, text: &str) {
        self.send(ViewEvent::Notice(text.to_string()));
    }

    fn on_preview_started(&self, page_count: usize) {
        self.send(ViewEvent::PreviewStarted(page_count));
    }

    fn on_preview_page(&self, page_num: usize, surface: &Surface) {
        self.send(ViewEvent::PreviewPage {
            page_num,
            surface: surface.clone(),
        });
    }

    fn on_preview_error(&self, message: &str) {
        self.send(ViewEvent::PreviewError(message.to_string()));
    }

    fn on_html_ready(&self, url: &Url) {
        self.send(ViewEvent::HtmlReady(url.clone()));
    }

    fn on_json_ready(&self, pretty: &str) {
        self.send(ViewEvent::JsonReady(pretty.to_string()));
    }

    fn on_json_error(&self, message: &str) {
        self.send(ViewEvent::JsonError(message.to_string()));
    }

    fn on_intermediate_ready(&self, pretty: &str) {
        self.send(ViewEvent::IntermediateReady(pretty.to_string()));
    }
}
