//! pdfium-backed [`PdfBackend`].
//!
//! ## Why a dedicated worker thread?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which keeps
//! global state and is not safe to drive from async contexts. Binding it
//! more than once per process is also unsafe: dropping one `Pdfium` tears
//! the library down for every other instance. So one named thread binds
//! pdfium once, owns every open `PdfDocument`, and serves requests from a
//! channel. Async callers get their answers back over `tokio` oneshots, so
//! page requests from the renderer stay independent futures even though
//! the engine executes them one at a time.

use super::backend::{PdfBackend, PdfDocumentHandle};
use super::{Surface, Viewport};
use crate::error::{ClientError, PageError};
use async_trait::async_trait;
use image::RgbaImage;
use pdfium_render::prelude::*;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

type Reply<T> = oneshot::Sender<T>;

enum Job {
    Open {
        bytes: Arc<[u8]>,
        reply: Reply<Result<(u64, usize), ClientError>>,
    },
    Viewport {
        doc: u64,
        index: usize,
        scale: f32,
        reply: Reply<Result<Viewport, PageError>>,
    },
    Render {
        doc: u64,
        index: usize,
        width: u32,
        height: u32,
        reply: Reply<Result<RgbaImage, PageError>>,
    },
    Close {
        doc: u64,
    },
}

static WORKER: Mutex<Option<Sender<Job>>> = Mutex::new(None);

/// Queue `job` on the pdfium worker, starting it on first use.
fn submit(job: Job) -> Result<(), ClientError> {
    let mut guard = WORKER.lock().unwrap_or_else(PoisonError::into_inner);
    if guard.is_none() {
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("pdfium-worker".into())
            .spawn(move || run_worker(rx))
            .map_err(|e| ClientError::Internal(format!("Failed to start pdfium worker: {e}")))?;
        *guard = Some(tx);
    }

    let sent = guard.as_ref().map(|tx| tx.send(job));
    match sent {
        Some(Ok(())) => Ok(()),
        _ => {
            // The worker is gone; the next call starts a fresh one.
            *guard = None;
            Err(ClientError::Internal("pdfium worker stopped".into()))
        }
    }
}

fn run_worker(jobs: Receiver<Job>) {
    match pdfium_auto::bind_pdfium_silent() {
        Ok(pdfium) => {
            info!("pdfium bound; preview worker ready");
            serve(&pdfium, jobs);
        }
        Err(e) => {
            warn!("pdfium unavailable: {}", e);
            refuse(jobs, &e.to_string());
        }
    }
}

fn serve(pdfium: &Pdfium, jobs: Receiver<Job>) {
    let mut documents: HashMap<u64, PdfDocument<'_>> = HashMap::new();
    let mut next_id: u64 = 0;

    for job in jobs {
        match job {
            Job::Open { bytes, reply } => {
                let outcome = pdfium
                    .load_pdf_from_byte_vec(bytes.to_vec(), None)
                    .map_err(|e| ClientError::CorruptPdf {
                        detail: format!("{:?}", e),
                    })
                    .map(|document| {
                        let page_count = document.pages().len() as usize;
                        next_id += 1;
                        documents.insert(next_id, document);
                        debug!("Opened document #{} ({} pages)", next_id, page_count);
                        (next_id, page_count)
                    });
                let _ = reply.send(outcome);
            }
            Job::Viewport {
                doc,
                index,
                scale,
                reply,
            } => {
                let outcome = documents
                    .get(&doc)
                    .ok_or_else(|| closed(index))
                    .and_then(|document| {
                        let page = document.pages().get(index as u16).map_err(|e| {
                            PageError::Viewport {
                                page: index + 1,
                                detail: format!("{:?}", e),
                            }
                        })?;
                        Ok(Viewport::from_points(
                            page.width().value,
                            page.height().value,
                            scale,
                        ))
                    });
                let _ = reply.send(outcome);
            }
            Job::Render {
                doc,
                index,
                width,
                height,
                reply,
            } => {
                let outcome = documents
                    .get(&doc)
                    .ok_or_else(|| closed(index))
                    .and_then(|document| render_page(document, index, width, height));
                let _ = reply.send(outcome);
            }
            Job::Close { doc } => {
                documents.remove(&doc);
            }
        }
    }
}

fn render_page(
    document: &PdfDocument<'_>,
    index: usize,
    width: u32,
    height: u32,
) -> Result<RgbaImage, PageError> {
    let failed = |e: PdfiumError| PageError::RenderFailed {
        page: index + 1,
        detail: format!("{:?}", e),
    };

    let page = document.pages().get(index as u16).map_err(failed)?;
    let render_config = PdfRenderConfig::new()
        .set_target_width(width as i32)
        .set_maximum_height(height as i32);
    let bitmap = page.render_with_config(&render_config).map_err(failed)?;

    Ok(bitmap.as_image().to_rgba8())
}

fn closed(index: usize) -> PageError {
    PageError::RenderFailed {
        page: index + 1,
        detail: "document already closed".into(),
    }
}

/// Answer every job with the binding failure.
fn refuse(jobs: Receiver<Job>, reason: &str) {
    for job in jobs {
        match job {
            Job::Open { reply, .. } => {
                let _ = reply.send(Err(ClientError::PdfiumBindingFailed(reason.to_string())));
            }
            Job::Viewport { index, reply, .. } => {
                let _ = reply.send(Err(PageError::Viewport {
                    page: index + 1,
                    detail: reason.to_string(),
                }));
            }
            Job::Render { index, reply, .. } => {
                let _ = reply.send(Err(PageError::RenderFailed {
                    page: index + 1,
                    detail: reason.to_string(),
                }));
            }
            Job::Close { .. } => {}
        }
    }
}

/// Production [`PdfBackend`] driving the shared pdfium worker.
///
/// The library is located by `pdfium-auto`: `PDFIUM_LIB_PATH` when set,
/// otherwise a cached download.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfiumBackend;

impl PdfiumBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PdfBackend for PdfiumBackend {
    async fn open(&self, bytes: Arc<[u8]>) -> Result<Arc<dyn PdfDocumentHandle>, ClientError> {
        let (reply, rx) = oneshot::channel();
        submit(Job::Open { bytes, reply })?;
        let (id, page_count) = rx
            .await
            .map_err(|_| ClientError::Internal("pdfium worker dropped the request".into()))??;
        Ok(Arc::new(PdfiumDocument { id, page_count }))
    }
}

struct PdfiumDocument {
    id: u64,
    page_count: usize,
}

impl PdfiumDocument {
    async fn ask<T>(
        &self,
        index: usize,
        job: impl FnOnce(Reply<Result<T, PageError>>) -> Job,
    ) -> Result<T, PageError> {
        let lost = |detail: String| PageError::RenderFailed {
            page: index + 1,
            detail,
        };
        let (reply, rx) = oneshot::channel();
        submit(job(reply)).map_err(|e| lost(e.to_string()))?;
        rx.await
            .map_err(|_| lost("pdfium worker dropped the request".into()))?
    }
}

#[async_trait]
impl PdfDocumentHandle for PdfiumDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    async fn viewport(&self, index: usize, scale: f32) -> Result<Viewport, PageError> {
        let doc = self.id;
        self.ask(index, |reply| Job::Viewport {
            doc,
            index,
            scale,
            reply,
        })
        .await
    }

    async fn render(
        &self,
        index: usize,
        viewport: &Viewport,
        surface: &mut Surface,
    ) -> Result<(), PageError> {
        let doc = self.id;
        let (width, height) = viewport.pixel_size();
        let bitmap = self
            .ask(index, |reply| Job::Render {
                doc,
                index,
                width,
                height,
                reply,
            })
            .await?;
        image::imageops::replace(surface.image_mut(), &bitmap, 0, 0);
        Ok(())
    }
}

impl Drop for PdfiumDocument {
    fn drop(&mut self) {
        let _ = submit(Job::Close { doc: self.id });
    }
}
