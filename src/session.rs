//! Session controller: owns the current task, the poll handle and the preview.
//!
//! ## Identity tickets
//!
//! Every deferred effect (a rendered page, a status update, a loaded
//! result) carries a [`Ticket`]: the session epoch it was started under
//! and, for task effects, the task id. [`Shared::apply`] runs the effect
//! under the state lock only if the ticket still matches. `start_upload`
//! bumps the epoch and cancels the old poll handle under that same lock,
//! so once a newer upload has begun nothing from an older one can reach
//! the view, even if its network call resolves later.
//!
//! ## Ownership
//!
//! Spawned tasks hold a `Weak<Shared>`; dropping the last
//! [`SessionController`] drops the state, which cancels the poll handle and
//! aborts the preview task.

use crate::config::SessionConfig;
use crate::error::ClientError;
use crate::input::UploadFile;
use crate::poller::{self, PollHandle, PollMetrics};
use crate::render::{LocalRenderer, PdfBackend, PdfiumBackend, RenderSession, Surface};
use crate::service::{ConversionService, HttpConversionService};
use crate::task::TaskId;
use crate::view::{SessionView, ViewHandle};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Blocking notice shown when submitting without a file.
pub const NO_FILE_NOTICE: &str = "Please select a PDF file first.";

/// Status line while the upload request is in flight.
pub const UPLOADING_MESSAGE: &str = "Uploading…";

/// Observable lifecycle of the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    /// Nothing submitted yet.
    Idle,
    /// Upload request in flight.
    Uploading,
    /// Task accepted; polling.
    Active(TaskId),
    /// Backend reported `completed`; results are being loaded.
    Loading(TaskId),
    /// Results loaded (individual artifacts may have failed).
    Completed(TaskId),
    /// Backend reported `failed`.
    Failed { task_id: TaskId, error: String },
    /// The upload itself failed; no task exists.
    Aborted(String),
}

impl SessionPhase {
    /// True when no further transition happens without a new upload.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            SessionPhase::Idle
                | SessionPhase::Completed(_)
                | SessionPhase::Failed { .. }
                | SessionPhase::Aborted(_)
        )
    }
}

/// Identity of the upload (and task) an effect belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Ticket {
    epoch: u64,
    task: Option<TaskId>,
}

impl Ticket {
    fn for_task(&self, task_id: TaskId) -> Self {
        Self {
            epoch: self.epoch,
            task: Some(task_id),
        }
    }
}

#[derive(Default)]
pub(crate) struct SessionState {
    epoch: u64,
    task: Option<TaskId>,
    poll: Option<PollHandle>,
    render: Option<AbortHandle>,
    preview: Option<RenderSession>,
}

impl SessionState {
    fn is_current(&self, ticket: &Ticket) -> bool {
        self.epoch == ticket.epoch
            && match &ticket.task {
                Some(task) => self.task.as_ref() == Some(task),
                None => true,
            }
    }

    /// Stop everything belonging to the previous upload.
    fn reset(&mut self) {
        if let Some(handle) = self.poll.take() {
            debug!(task_id = %handle.task_id(), "Cancelling previous poll handle");
            handle.cancel();
        }
        if let Some(render) = self.render.take() {
            render.abort();
        }
        self.task = None;
        self.preview = None;
    }
}

/// State shared between the controller, the poller and the loader.
pub(crate) struct Shared {
    pub(crate) config: SessionConfig,
    pub(crate) service: Arc<dyn ConversionService>,
    pub(crate) metrics: Arc<PollMetrics>,
    view: ViewHandle,
    state: Mutex<SessionState>,
    phase: watch::Sender<SessionPhase>,
    preview_done: watch::Sender<u64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_current(&self, ticket: &Ticket) -> bool {
        self.lock().is_current(ticket)
    }

    /// Run `effect` if `ticket` is still current; `None` when superseded.
    pub(crate) fn apply<R>(
        &self,
        ticket: &Ticket,
        effect: impl FnOnce(&mut SessionState, &dyn SessionView) -> R,
    ) -> Option<R> {
        let mut state = self.lock();
        if !state.is_current(ticket) {
            return None;
        }
        Some(effect(&mut state, self.view.as_ref()))
    }

    pub(crate) fn set_phase(&self, phase: SessionPhase) {
        self.phase.send_replace(phase);
    }

    fn mark_preview_done(&self, epoch: u64) {
        self.preview_done.send_modify(|done| *done = (*done).max(epoch));
    }
}

/// [`Shared::apply`] through a weak reference; `None` once the session is gone.
pub(crate) fn apply_weak<R>(
    session: &Weak<Shared>,
    ticket: &Ticket,
    effect: impl FnOnce(&mut SessionState, &dyn SessionView) -> R,
) -> Option<R> {
    session.upgrade()?.apply(ticket, effect)
}

/// Forwards preview callbacks only while its upload is current.
struct GatedView {
    session: Weak<Shared>,
    ticket: Ticket,
}

impl SessionView for GatedView {
    fn on_preview_started(&self, page_count: usize) {
        apply_weak(&self.session, &self.ticket, |_, view| {
            view.on_preview_started(page_count)
        });
    }

    fn on_preview_page(&self, page_num: usize, surface: &Surface) {
        apply_weak(&self.session, &self.ticket, |_, view| {
            view.on_preview_page(page_num, surface)
        });
    }

    fn on_preview_error(&self, message: &str) {
        apply_weak(&self.session, &self.ticket, |_, view| {
            view.on_preview_error(message)
        });
    }
}

/// Marks the preview of `epoch` finished, including on abort or panic.
struct PreviewDone {
    session: Weak<Shared>,
    epoch: u64,
}

impl Drop for PreviewDone {
    fn drop(&mut self) {
        if let Some(shared) = self.session.upgrade() {
            shared.mark_preview_done(self.epoch);
        }
    }
}

/// Top-level orchestrator of uploads, polling and result loading.
///
/// Cheap to clone; clones drive the same session.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
    renderer: LocalRenderer,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        service: Arc<dyn ConversionService>,
        backend: Arc<dyn PdfBackend>,
        view: ViewHandle,
    ) -> Self {
        let renderer = LocalRenderer::new(backend, &config);
        let (phase, _) = watch::channel(SessionPhase::Idle);
        let (preview_done, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            config,
            service,
            metrics: Arc::new(PollMetrics::default()),
            view,
            state: Mutex::new(SessionState::default()),
            phase,
            preview_done,
        });
        Self { shared, renderer }
    }

    /// Controller over HTTP with the pdfium preview backend.
    pub fn connect(config: SessionConfig, view: ViewHandle) -> Result<Self, ClientError> {
        let service = HttpConversionService::new(&config)?;
        Ok(Self::new(
            config,
            Arc::new(service),
            Arc::new(PdfiumBackend::new()),
            view,
        ))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Start a new upload, superseding whatever the session was doing.
    ///
    /// In order: disable submit, clear all views, cancel the previous poll
    /// handle and preview, spawn the local preview, then upload. On success
    /// the task becomes current and polling starts.
    ///
    /// # Errors
    /// - `NoFileSelected` when `file` is `None` (a notice is shown, nothing
    ///   else changes and no request is sent).
    /// - `UploadRejected` / `UploadFailed` when the upload fails; submit is
    ///   re-enabled and no polling starts.
    /// - `Superseded` when a newer upload started while this one was in flight.
    pub async fn start_upload(&self, file: Option<UploadFile>) -> Result<TaskId, ClientError> {
        let Some(file) = file else {
            self.shared.view.on_notice(NO_FILE_NOTICE);
            return Err(ClientError::NoFileSelected);
        };

        let ticket = self.begin(&file);
        info!(epoch = ticket.epoch, "Submitting '{}'", file.file_name());

        let outcome = self.shared.service.upload(&file).await;

        let shared = &self.shared;
        let applied = shared.apply(&ticket, |state, view| match outcome {
            Ok(receipt) => {
                let task_id = receipt.task_id;
                let label = receipt
                    .status
                    .as_ref()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|| "queued".to_string());
                state.task = Some(task_id.clone());
                state.poll = Some(PollHandle::start(
                    Arc::downgrade(shared),
                    ticket.for_task(task_id.clone()),
                    task_id.clone(),
                    &shared.metrics,
                    shared.config.poll_interval(),
                ));
                view.on_status(&poller::progress_message(&label));
                shared.set_phase(SessionPhase::Active(task_id.clone()));
                Ok(task_id)
            }
            Err(e) => {
                warn!("{}", e);
                view.on_status(&e.to_string());
                view.on_submit_enabled(true);
                shared.set_phase(SessionPhase::Aborted(e.to_string()));
                Err(e)
            }
        });

        match applied {
            Some(result) => result,
            None => {
                debug!(epoch = ticket.epoch, "Upload resolved after a newer submission");
                Err(ClientError::Superseded)
            }
        }
    }

    /// Synchronous prologue of `start_upload`: new epoch, cleared views, preview spawned.
    fn begin(&self, file: &UploadFile) -> Ticket {
        let mut state = self.shared.lock();
        state.reset();
        state.epoch += 1;
        let ticket = Ticket {
            epoch: state.epoch,
            task: None,
        };

        let view = self.shared.view.as_ref();
        view.on_submit_enabled(false);
        view.on_views_cleared();
        view.on_status(UPLOADING_MESSAGE);
        self.shared.set_phase(SessionPhase::Uploading);

        state.render = Some(self.spawn_preview(file.bytes(), ticket.clone()));
        ticket
    }

    fn spawn_preview(&self, bytes: Arc<[u8]>, ticket: Ticket) -> AbortHandle {
        let renderer = self.renderer.clone();
        let session = Arc::downgrade(&self.shared);
        let done = PreviewDone {
            session: session.clone(),
            epoch: ticket.epoch,
        };
        let gate = GatedView { session, ticket };

        tokio::spawn(async move {
            let _done = done;
            let outcome = renderer.render(bytes, &gate).await;
            apply_weak(&gate.session, &gate.ticket, |state, _| {
                if let Ok(preview) = outcome {
                    state.preview = Some(preview);
                }
            });
        })
        .abort_handle()
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.phase.borrow().clone()
    }

    /// Receiver notified on every phase change.
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.shared.phase.subscribe()
    }

    /// Wait until the session reaches a settled phase and return it.
    pub async fn wait_settled(&self) -> SessionPhase {
        let mut rx = self.subscribe();
        let settled = rx.wait_for(SessionPhase::is_settled).await.map(|p| p.clone());
        settled.unwrap_or_else(|_| self.phase())
    }

    /// Wait for the preview of the latest upload and return it.
    ///
    /// `None` when the document could not be decoded or no upload started.
    pub async fn wait_preview(&self) -> Option<RenderSession> {
        let epoch = self.shared.lock().epoch;
        let mut rx = self.shared.preview_done.subscribe();
        let _ = rx.wait_for(|done| *done >= epoch).await;
        self.preview()
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.shared.lock().task.clone()
    }

    /// The finished preview of the latest upload, if any.
    pub fn preview(&self) -> Option<RenderSession> {
        self.shared.lock().preview.clone()
    }

    /// Counters instrumenting poll handle starts and stops.
    pub fn poll_metrics(&self) -> Arc<PollMetrics> {
        Arc::clone(&self.shared.metrics)
    }
}
