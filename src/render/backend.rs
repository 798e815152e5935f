//! PDF engine boundary.
//!
//! The renderer only needs "given a byte buffer, produce N pages, each
//! independently rasterisable at a given scale". These two traits capture
//! exactly that, so tests can swap in a scripted engine and production uses
//! [`super::PdfiumBackend`].

use super::{Surface, Viewport};
use crate::error::{ClientError, PageError};
use async_trait::async_trait;
use std::sync::Arc;

/// Opens PDF documents from memory.
#[async_trait]
pub trait PdfBackend: Send + Sync {
    /// Parse `bytes` into a document handle.
    ///
    /// # Errors
    /// `CorruptPdf` when the engine rejects the buffer, `PdfiumBindingFailed`
    /// when the engine itself is unavailable.
    async fn open(&self, bytes: Arc<[u8]>) -> Result<Arc<dyn PdfDocumentHandle>, ClientError>;
}

/// One open document. Page indices are 0-based.
#[async_trait]
pub trait PdfDocumentHandle: Send + Sync {
    fn page_count(&self) -> usize;

    /// Intrinsic size of page `index` at `scale`.
    async fn viewport(&self, index: usize, scale: f32) -> Result<Viewport, PageError>;

    /// Rasterise page `index` onto `surface`, which is sized to `viewport`.
    async fn render(
        &self,
        index: usize,
        viewport: &Viewport,
        surface: &mut Surface,
    ) -> Result<(), PageError>;
}

/// How far into the buffer the `%PDF` header may start. Engines tolerate a
/// byte-order mark or leading junk before it.
pub const PDF_HEADER_WINDOW: usize = 1024;

/// Reject buffers with no `%PDF` header in their first [`PDF_HEADER_WINDOW`]
/// bytes before handing them to an engine.
pub fn check_pdf_magic(bytes: &[u8]) -> Result<(), ClientError> {
    let head = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    if head.windows(4).any(|w| w == b"%PDF") {
        return Ok(());
    }
    Err(ClientError::NotAPdf {
        magic: bytes.iter().take(4).copied().collect(),
    })
}
