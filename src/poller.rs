//! Task poller: a cancellable repeating status query bound to one task.
//!
//! ```text
//!  Idle ──(upload ok)──▶ Active ──(completed)──▶ Terminal(Completed) ──▶ result loader
//!                          │  ▲
//!                          │  └── any other status: status line = step or status
//!                          │      transport error: log, retry next tick
//!                          └────(failed)───▶ Terminal(Failed)
//! ```
//!
//! Ticks are spaced by the configured period and never overlap: the next
//! tick is scheduled only after the previous query returned. The only
//! retry in the system is this loop retrying a failed query on its next
//! tick, indefinitely.

use crate::error::ClientError;
use crate::loader;
use crate::session::{SessionPhase, Shared, Ticket};
use crate::task::{StatusReport, TaskId, TaskStatus};
use crate::view::SessionView;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Status line once the backend reports `completed`.
pub const COMPLETED_MESSAGE: &str = "Conversion complete.";

/// Used when a failed job carries no error text.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Unknown error";

/// Status line for an in-progress job.
pub fn progress_message(label: &str) -> String {
    format!("Processing: {label}")
}

/// The backend's error text for a failed job, or the default when blank.
pub fn failure_reason(error: Option<&str>) -> &str {
    error
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .unwrap_or(DEFAULT_FAILURE_MESSAGE)
}

fn unavailable_message(failures: u32, error: &ClientError) -> String {
    format!("Status unavailable after {failures} attempts, still retrying ({error})")
}

/// Start/stop counters for poll handles.
#[derive(Debug, Default)]
pub struct PollMetrics {
    active: AtomicUsize,
    peak: AtomicUsize,
    started: AtomicUsize,
}

impl PollMetrics {
    /// Handles currently polling.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously active handles ever observed.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Handles started so far.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Counts one handle as active until released, exactly once.
#[derive(Clone)]
struct Liveness {
    live: Arc<AtomicBool>,
    metrics: Arc<PollMetrics>,
}

impl Liveness {
    fn enter(metrics: &Arc<PollMetrics>) -> Self {
        metrics.enter();
        Self {
            live: Arc::new(AtomicBool::new(true)),
            metrics: Arc::clone(metrics),
        }
    }

    fn release(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            self.metrics.leave();
        }
    }
}

/// Releases on every exit path of the poll loop, panics included.
struct ActiveGuard(Liveness);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// The single live repeating status query of a session.
///
/// Dropping the handle cancels it.
pub struct PollHandle {
    task_id: TaskId,
    join: JoinHandle<()>,
    liveness: Liveness,
}

impl PollHandle {
    pub(crate) fn start(
        session: Weak<Shared>,
        ticket: Ticket,
        task_id: TaskId,
        metrics: &Arc<PollMetrics>,
        period: Duration,
    ) -> Self {
        let liveness = Liveness::enter(metrics);
        info!(%task_id, period_ms = period.as_millis() as u64, "Polling started");
        let join = tokio::spawn(run(
            session,
            ticket,
            task_id.clone(),
            period,
            liveness.clone(),
        ));
        Self {
            task_id,
            join,
            liveness,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Stop future ticks and abandon any in-flight query. Idempotent.
    pub fn cancel(&self) {
        self.liveness.release();
        self.join.abort();
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    Continue,
    Completed,
    Failed,
}

async fn run(
    session: Weak<Shared>,
    ticket: Ticket,
    task_id: TaskId,
    period: Duration,
    liveness: Liveness,
) {
    let guard = ActiveGuard(liveness);
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures: u32 = 0;

    let terminal = loop {
        ticker.tick().await;

        let Some(shared) = session.upgrade() else {
            return;
        };
        if !shared.is_current(&ticket) {
            debug!(%task_id, "Stray tick for a superseded task; stopping");
            return;
        }

        match shared.service.status(&task_id).await {
            Ok(report) => {
                failures = 0;
                let step =
                    shared.apply(&ticket, |_, view| observe(&shared, view, &task_id, &report));
                match step {
                    Some(Tick::Continue) => continue,
                    Some(terminal) => break terminal,
                    None => {
                        debug!(%task_id, "Status arrived after task was superseded; dropped");
                        return;
                    }
                }
            }
            Err(e) => {
                failures += 1;
                warn!(%task_id, failures, "Status query failed: {}", e);
                if let Some(limit) = shared.config.max_silent_poll_failures {
                    if failures >= limit {
                        shared.apply(&ticket, |_, view| {
                            view.on_status(&unavailable_message(failures, &e))
                        });
                    }
                }
            }
        }
    };

    drop(guard);

    if terminal == Tick::Completed {
        if let Some(shared) = session.upgrade() {
            loader::load_results(&shared, &ticket, &task_id).await;
        }
    }
}

/// Apply one status report to the current task.
fn observe(
    shared: &Shared,
    view: &dyn SessionView,
    task_id: &TaskId,
    report: &StatusReport,
) -> Tick {
    match report.status {
        TaskStatus::Completed => {
            info!(%task_id, "Conversion completed");
            view.on_status(COMPLETED_MESSAGE);
            view.on_submit_enabled(true);
            shared.set_phase(SessionPhase::Loading(task_id.clone()));
            Tick::Completed
        }
        TaskStatus::Failed => {
            let reason = failure_reason(report.error.as_deref()).to_string();
            let failure = ClientError::JobFailed {
                task_id: task_id.to_string(),
                message: reason.clone(),
            };
            warn!(%task_id, "{}", failure);
            view.on_status(&failure.to_string());
            view.on_submit_enabled(true);
            shared.set_phase(SessionPhase::Failed {
                task_id: task_id.clone(),
                error: reason,
            });
            Tick::Failed
        }
        _ => {
            let label = report.progress_label();
            debug!(%task_id, status = %report.status, "Progress: {}", label);
            view.on_status(&progress_message(label));
            Tick::Continue
        }
    }
}
