//! Local preview: rasterise every page of the selected PDF onto surfaces.
//!
//! The renderer never touches the network or the remote task. It decodes
//! the buffer through a [`PdfBackend`], announces the page count, then
//! rasterises pages concurrently. Completion order across pages is not
//! guaranteed, so each result is written into the slot of its own page
//! index; the preview order is page order no matter which page finishes
//! first.
//!
//! ```text
//! bytes ──▶ magic check ──▶ backend.open ──▶ N slots
//!                                   │
//!              page 1..N (buffer_unordered) ──▶ viewport ──▶ allocate ──▶ render
//!                                   │
//!                      slot[page-1] = Ready | Failed
//! ```

pub mod backend;
pub mod pdfium;

pub use backend::{check_pdf_magic, PdfBackend, PdfDocumentHandle};
pub use pdfium::PdfiumBackend;

use crate::config::SessionConfig;
use crate::error::{ClientError, PageError};
use crate::view::SessionView;
use futures::stream::{self, StreamExt};
use image::RgbaImage;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Longest surface edge the preview will allocate, in pixels.
pub const MAX_SURFACE_SIDE: u32 = 16_384;

/// Largest surface area the preview will allocate (256 MiB of RGBA).
pub const MAX_SURFACE_PIXELS: u64 = 64 * 1024 * 1024;

/// Intrinsic size of a page at a given scale, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    pub scale: f32,
}

impl Viewport {
    /// Build a viewport from a page size in PDF points.
    pub fn from_points(width_pt: f32, height_pt: f32, scale: f32) -> Self {
        Self {
            width: width_pt * scale,
            height: height_pt * scale,
            scale,
        }
    }

    /// Whole-pixel surface size covering the viewport (at least 1×1).
    pub fn pixel_size(&self) -> (u32, u32) {
        let px = |v: f32| {
            if v.is_finite() && v > 1.0 {
                v.ceil() as u32
            } else {
                1
            }
        };
        (px(self.width), px(self.height))
    }

    /// Like [`Self::pixel_size`], but `None` when the surface would exceed
    /// [`MAX_SURFACE_SIDE`] or [`MAX_SURFACE_PIXELS`].
    pub fn checked_pixel_size(&self) -> Option<(u32, u32)> {
        let fits = |v: f32| v.is_nan() || v <= MAX_SURFACE_SIDE as f32;
        if !fits(self.width) || !fits(self.height) {
            return None;
        }
        let (w, h) = self.pixel_size();
        (u64::from(w) * u64::from(h) <= MAX_SURFACE_PIXELS).then_some((w, h))
    }
}

/// A drawable RGBA bitmap holding one rasterised page.
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    page_num: usize,
    image: RgbaImage,
}

impl Surface {
    /// Allocate a transparent surface sized exactly to `viewport`.
    ///
    /// # Errors
    /// `PageError::Viewport` when the viewport is larger than the surface caps.
    pub fn allocate(page_num: usize, viewport: &Viewport) -> Result<Self, PageError> {
        let (w, h) = viewport
            .checked_pixel_size()
            .ok_or_else(|| PageError::Viewport {
                page: page_num,
                detail: format!(
                    "{:.0}x{:.0} px exceeds the preview surface limit ({} px per side, {} px total)",
                    viewport.width, viewport.height, MAX_SURFACE_SIDE, MAX_SURFACE_PIXELS
                ),
            })?;
        Ok(Self::blank(page_num, w, h))
    }

    pub fn blank(page_num: usize, width: u32, height: u32) -> Self {
        Self {
            page_num,
            image: RgbaImage::new(width.max(1), height.max(1)),
        }
    }

    /// 1-indexed page this surface shows.
    pub fn page_num(&self) -> usize {
        self.page_num
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    /// Write the surface as a PNG file.
    pub fn save_png(&self, path: &Path) -> Result<(), ClientError> {
        self.image
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| ClientError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: std::io::Error::other(e.to_string()),
            })
    }
}

/// State of one page in the preview.
#[derive(Debug, Clone, PartialEq)]
pub enum PageSlot {
    /// Not rasterised yet.
    Pending,
    Ready(Surface),
    Failed(PageError),
}

/// The preview of one uploaded file: one slot per page, in page order.
///
/// Replaced wholesale on every upload, never patched across uploads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderSession {
    slots: Vec<PageSlot>,
}

impl RenderSession {
    /// Pre-allocate `page_count` pending slots.
    pub fn with_pages(page_count: usize) -> Self {
        Self {
            slots: vec![PageSlot::Pending; page_count],
        }
    }

    pub fn page_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[PageSlot] {
        &self.slots
    }

    /// Rasterised surfaces in page order, skipping failed or pending pages.
    pub fn surfaces(&self) -> impl Iterator<Item = &Surface> {
        self.slots.iter().filter_map(|slot| match slot {
            PageSlot::Ready(surface) => Some(surface),
            _ => None,
        })
    }

    pub fn failed_pages(&self) -> impl Iterator<Item = &PageError> {
        self.slots.iter().filter_map(|slot| match slot {
            PageSlot::Failed(err) => Some(err),
            _ => None,
        })
    }

    /// True once no slot is pending.
    pub fn is_complete(&self) -> bool {
        !self.slots.iter().any(|s| matches!(s, PageSlot::Pending))
    }

    /// Store the outcome for the 0-indexed page `index`.
    fn fill(&mut self, index: usize, outcome: Result<Surface, PageError>) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = match outcome {
                Ok(surface) => PageSlot::Ready(surface),
                Err(err) => PageSlot::Failed(err),
            };
        }
    }
}

/// Rasterises a PDF buffer into a [`RenderSession`].
#[derive(Clone)]
pub struct LocalRenderer {
    backend: Arc<dyn PdfBackend>,
    scale: f32,
    concurrency: usize,
}

impl LocalRenderer {
    pub fn new(backend: Arc<dyn PdfBackend>, config: &SessionConfig) -> Self {
        Self {
            backend,
            scale: config.effective_render_scale(),
            concurrency: config.render_concurrency.max(1),
        }
    }

    /// Decode `bytes` and rasterise every page, reporting progress to `view`.
    ///
    /// # Errors
    /// Returns a decode error (`NotAPdf`, `CorruptPdf`, `PdfiumBindingFailed`)
    /// when the document cannot be opened; the same message is shown in the
    /// preview region first. Individual page failures are not errors: they
    /// are stored in their slot.
    pub async fn render(
        &self,
        bytes: Arc<[u8]>,
        view: &dyn SessionView,
    ) -> Result<RenderSession, ClientError> {
        let document = match self.open(bytes).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Preview unavailable: {}", e);
                view.on_preview_error(&e.to_string());
                return Err(e);
            }
        };

        let page_count = document.page_count();
        info!("Preview: {} pages at scale {}", page_count, self.scale);

        let mut session = RenderSession::with_pages(page_count);
        view.on_preview_started(page_count);

        let scale = self.scale;
        let mut pages = stream::iter(0..page_count)
            .map(|index| {
                let document = Arc::clone(&document);
                async move { (index, rasterize_page(document.as_ref(), index, scale).await) }
            })
            .buffer_unordered(self.concurrency);

        while let Some((index, outcome)) = pages.next().await {
            match &outcome {
                Ok(surface) => {
                    debug!(
                        "Rendered page {} → {}x{} px",
                        index + 1,
                        surface.width(),
                        surface.height()
                    );
                    view.on_preview_page(index + 1, surface);
                }
                Err(e) => {
                    warn!("{}", e);
                    view.on_preview_error(&e.to_string());
                }
            }
            session.fill(index, outcome);
        }

        Ok(session)
    }

    async fn open(&self, bytes: Arc<[u8]>) -> Result<Arc<dyn PdfDocumentHandle>, ClientError> {
        check_pdf_magic(&bytes)?;
        self.backend.open(bytes).await
    }
}

/// One independent page unit: viewport, allocation, rasterisation.
async fn rasterize_page(
    document: &dyn PdfDocumentHandle,
    index: usize,
    scale: f32,
) -> Result<Surface, PageError> {
    let viewport = document.viewport(index, scale).await?;
    let mut surface = Surface::allocate(index + 1, &viewport)?;
    document.render(index, &viewport, &mut surface).await?;
    Ok(surface)
}
