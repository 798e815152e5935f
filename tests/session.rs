//! Session behaviour against in-memory fakes of the conversion service and
//! the PDF engine, on a paused tokio clock.

use async_trait::async_trait;
use pdf_semantic_client::session::{NO_FILE_NOTICE, UPLOADING_MESSAGE};
use pdf_semantic_client::{
    ChannelView, ClientError, ConversionService, PageError, PageSlot, PdfBackend,
    PdfDocumentHandle, SessionConfig, SessionController, SessionPhase, StatusReport, Surface,
    TaskId, TaskStatus, UploadFile, UploadReceipt, ViewEvent, Viewport,
};
use reqwest::Url;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::sleep;

// ── Fake conversion service ──────────────────────────────────────────────────

struct UploadStep {
    delay: Duration,
    outcome: Result<String, (u16, String)>,
}

struct StatusStep {
    delay: Duration,
    outcome: Result<StatusReport, String>,
}

struct JsonStep {
    delay: Duration,
    body: Option<String>,
}

#[derive(Default)]
struct FakeService {
    uploads: Mutex<VecDeque<UploadStep>>,
    statuses: Mutex<HashMap<String, VecDeque<StatusStep>>>,
    json: Mutex<VecDeque<JsonStep>>,
    upload_calls: AtomicUsize,
    status_calls: Mutex<Vec<String>>,
    json_calls: AtomicUsize,
    intermediate_calls: AtomicUsize,
}

impl FakeService {
    fn accept(&self, task_id: &str, delay: Duration) {
        self.uploads.lock().unwrap().push_back(UploadStep {
            delay,
            outcome: Ok(task_id.to_string()),
        });
    }

    fn reject(&self, status: u16, body: &str) {
        self.uploads.lock().unwrap().push_back(UploadStep {
            delay: Duration::ZERO,
            outcome: Err((status, body.to_string())),
        });
    }

    fn report(&self, task_id: &str, delay: Duration, outcome: Result<StatusReport, String>) {
        self.statuses
            .lock()
            .unwrap()
            .entry(task_id.to_string())
            .or_default()
            .push_back(StatusStep { delay, outcome });
    }

    fn status(&self, task_id: &str, report: StatusReport) {
        self.report(task_id, Duration::ZERO, Ok(report));
    }

    fn json(&self, delay: Duration, body: Option<&str>) {
        self.json.lock().unwrap().push_back(JsonStep {
            delay,
            body: body.map(str::to_string),
        });
    }

    fn status_calls_for(&self, task_id: &str) -> usize {
        self.status_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == task_id)
            .count()
    }
}

#[async_trait]
impl ConversionService for FakeService {
    async fn upload(&self, _file: &UploadFile) -> Result<UploadReceipt, ClientError> {
        let n = self.upload_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let step = self.uploads.lock().unwrap().pop_front();
        let step = step.unwrap_or(UploadStep {
            delay: Duration::ZERO,
            outcome: Ok(format!("task-{n}")),
        });
        sleep(step.delay).await;
        match step.outcome {
            Ok(id) => Ok(UploadReceipt::new(id)),
            Err((status, body)) => Err(ClientError::UploadRejected { status, body }),
        }
    }

    async fn status(&self, task_id: &TaskId) -> Result<StatusReport, ClientError> {
        self.status_calls.lock().unwrap().push(task_id.to_string());
        let step = self
            .statuses
            .lock()
            .unwrap()
            .get_mut(task_id.as_str())
            .and_then(VecDeque::pop_front);
        let step = step.unwrap_or(StatusStep {
            delay: Duration::ZERO,
            outcome: Ok(StatusReport::new(TaskStatus::Processing)),
        });
        sleep(step.delay).await;
        step.outcome.map_err(|detail| ClientError::PollTransport {
            task_id: task_id.to_string(),
            detail,
        })
    }

    fn html_url(&self, task_id: &TaskId) -> Result<Url, ClientError> {
        Url::parse(&format!("http://fake.test/results/{task_id}/html"))
            .map_err(|e| ClientError::InvalidEndpoint(e.to_string()))
    }

    async fn fetch_json(&self, task_id: &TaskId) -> Result<String, ClientError> {
        self.json_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.json.lock().unwrap().pop_front();
        let step = step.unwrap_or(JsonStep {
            delay: Duration::ZERO,
            body: Some("{}".to_string()),
        });
        sleep(step.delay).await;
        step.body.ok_or_else(|| ClientError::ResultFetch {
            task_id: task_id.to_string(),
            artifact: "JSON",
            reason: "HTTP 500 Internal Server Error".to_string(),
        })
    }

    async fn fetch_intermediate(&self, _task_id: &TaskId) -> Result<String, ClientError> {
        self.intermediate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(r#"{"blocks":[{"type":"heading"}]}"#.to_string())
    }
}

// ── Fake PDF engine ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct FakePage {
    delay_ms: u64,
    fail: bool,
    oversized: bool,
}

fn pages(delays_ms: &[u64]) -> Vec<FakePage> {
    delays_ms
        .iter()
        .map(|&delay_ms| FakePage {
            delay_ms,
            fail: false,
            oversized: false,
        })
        .collect()
}

#[derive(Clone)]
struct FakePdf {
    pages: Vec<FakePage>,
}

impl FakePdf {
    fn new(pages: Vec<FakePage>) -> Arc<Self> {
        Arc::new(Self { pages })
    }
}

#[async_trait]
impl PdfBackend for FakePdf {
    async fn open(&self, bytes: Arc<[u8]>) -> Result<Arc<dyn PdfDocumentHandle>, ClientError> {
        if bytes.windows(7).any(|w| w == b"corrupt") {
            return Err(ClientError::CorruptPdf {
                detail: "xref table missing".into(),
            });
        }
        Ok(Arc::new(FakeDoc {
            pages: self.pages.clone(),
        }))
    }
}

struct FakeDoc {
    pages: Vec<FakePage>,
}

#[async_trait]
impl PdfDocumentHandle for FakeDoc {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    async fn viewport(&self, index: usize, scale: f32) -> Result<Viewport, PageError> {
        if self.pages[index].oversized {
            return Ok(Viewport::from_points(1e10, 1e10, scale));
        }
        Ok(Viewport::from_points(40.0 + index as f32, 60.0, scale))
    }

    async fn render(
        &self,
        index: usize,
        _viewport: &Viewport,
        surface: &mut Surface,
    ) -> Result<(), PageError> {
        let page = self.pages[index];
        sleep(Duration::from_millis(page.delay_ms)).await;
        if page.fail {
            return Err(PageError::RenderFailed {
                page: index + 1,
                detail: "bad content stream".into(),
            });
        }
        for px in surface.image_mut().pixels_mut() {
            *px = image::Rgba([0, 0, 0, 255]);
        }
        Ok(())
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

fn config() -> SessionConfig {
    SessionConfig::builder()
        .base_url("http://fake.test")
        .poll_interval_ms(100)
        .build()
        .unwrap()
}

fn session_with(
    config: SessionConfig,
    service: &Arc<FakeService>,
    pdf: Arc<FakePdf>,
) -> (SessionController, UnboundedReceiver<ViewEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = SessionController::new(
        config,
        Arc::clone(service) as Arc<dyn ConversionService>,
        pdf,
        Arc::new(ChannelView::new(tx)),
    );
    (session, rx)
}

fn pdf_file(name: &str) -> UploadFile {
    UploadFile::new(name, b"%PDF-1.7\n%fake body\n".to_vec())
}

fn drain(rx: &mut UnboundedReceiver<ViewEvent>) -> Vec<ViewEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn status_lines(events: &[ViewEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ViewEvent::Status(text) => Some(text.clone()),
            _ => None,
        })
        .collect()
}

/// Events emitted after the last views reset, i.e. for the latest upload.
fn since_last_clear(events: &[ViewEvent]) -> &[ViewEvent] {
    let start = events
        .iter()
        .rposition(|e| *e == ViewEvent::ViewsCleared)
        .map_or(0, |i| i + 1);
    &events[start..]
}

async fn wait_for_phase(session: &SessionController, want: impl Fn(&SessionPhase) -> bool) {
    let mut rx = session.subscribe();
    rx.wait_for(|p| want(p)).await.unwrap();
}

// ── Progress and completion ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn progress_steps_then_completion_loads_results_once() {
    let service = Arc::new(FakeService::default());
    service.accept("t1", Duration::ZERO);
    service.status(
        "t1",
        StatusReport::new(TaskStatus::Processing).with_step("parsing"),
    );
    service.status(
        "t1",
        StatusReport::new(TaskStatus::Processing).with_step("analyzing"),
    );
    service.status("t1", StatusReport::new(TaskStatus::Completed));
    service.json(Duration::ZERO, Some(r#"{"a":1,"b":[2,3]}"#));

    let (session, mut rx) = session_with(config(), &service, FakePdf::new(pages(&[0])));
    let task = session.start_upload(Some(pdf_file("a.pdf"))).await.unwrap();
    assert_eq!(task.as_str(), "t1");

    let phase = session.wait_settled().await;
    assert_eq!(phase, SessionPhase::Completed(TaskId::from("t1")));

    sleep(Duration::from_secs(5)).await;
    let events = drain(&mut rx);

    assert_eq!(
        status_lines(&events),
        vec![
            UPLOADING_MESSAGE.to_string(),
            "Processing: queued".to_string(),
            "Processing: parsing".to_string(),
            "Processing: analyzing".to_string(),
            "Conversion complete.".to_string(),
        ]
    );
    assert_eq!(service.status_calls_for("t1"), 3, "no query after completion");
    assert_eq!(service.json_calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.intermediate_calls.load(Ordering::SeqCst), 0);

    let html = events.iter().find_map(|e| match e {
        ViewEvent::HtmlReady(url) => Some(url.as_str().to_string()),
        _ => None,
    });
    assert_eq!(html.as_deref(), Some("http://fake.test/results/t1/html"));

    let json = events.iter().find_map(|e| match e {
        ViewEvent::JsonReady(pretty) => Some(pretty.clone()),
        _ => None,
    });
    let json = json.expect("JSON result shown");
    assert_eq!(json, "{\n  \"a\": 1,\n  \"b\": [\n    2,\n    3\n  ]\n}");

    assert!(events.contains(&ViewEvent::SubmitEnabled(true)));
    assert_eq!(session.poll_metrics().active(), 0);
}

#[tokio::test(start_paused = true)]
async fn submit_is_disabled_until_the_job_settles() {
    let service = Arc::new(FakeService::default());
    service.accept("t1", Duration::ZERO);
    service.status("t1", StatusReport::new(TaskStatus::Completed));

    let (session, mut rx) = session_with(config(), &service, FakePdf::new(pages(&[0])));
    session.start_upload(Some(pdf_file("a.pdf"))).await.unwrap();
    session.wait_settled().await;

    let toggles: Vec<bool> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            ViewEvent::SubmitEnabled(on) => Some(on),
            _ => None,
        })
        .collect();
    assert_eq!(toggles, vec![false, true]);
}

#[tokio::test(start_paused = true)]
async fn failed_job_shows_error_and_stops_polling() {
    let service = Arc::new(FakeService::default());
    service.accept("t1", Duration::ZERO);
    service.status("t1", StatusReport::new(TaskStatus::Processing));
    service.status(
        "t1",
        StatusReport::new(TaskStatus::Failed).with_error("timeout"),
    );

    let (session, mut rx) = session_with(config(), &service, FakePdf::new(pages(&[0])));
    session.start_upload(Some(pdf_file("a.pdf"))).await.unwrap();

    let phase = session.wait_settled().await;
    assert_eq!(
        phase,
        SessionPhase::Failed {
            task_id: TaskId::from("t1"),
            error: "timeout".into()
        }
    );

    sleep(Duration::from_secs(10)).await;
    let events = drain(&mut rx);
    assert_eq!(
        status_lines(&events).last().map(String::as_str),
        Some("Conversion failed: timeout")
    );
    assert_eq!(service.status_calls_for("t1"), 2);
    assert_eq!(service.json_calls.load(Ordering::SeqCst), 0);
    assert!(!events.iter().any(|e| matches!(e, ViewEvent::HtmlReady(_))));
}

#[tokio::test(start_paused = true)]
async fn failed_job_without_error_text_uses_default() {
    let service = Arc::new(FakeService::default());
    service.accept("t1", Duration::ZERO);
    service.status("t1", StatusReport::new(TaskStatus::Failed));

    let (session, mut rx) = session_with(config(), &service, FakePdf::new(pages(&[0])));
    session.start_upload(Some(pdf_file("a.pdf"))).await.unwrap();
    session.wait_settled().await;

    let lines = status_lines(&drain(&mut rx));
    assert_eq!(
        lines.last().map(String::as_str),
        Some("Conversion failed: Unknown error")
    );
}

#[tokio::test(start_paused = true)]
async fn unknown_status_values_are_shown_and_polling_continues() {
    let service = Arc::new(FakeService::default());
    service.accept("t1", Duration::ZERO);
    service.status("t1", StatusReport::new(TaskStatus::Other("not_found".into())));
    service.status("t1", StatusReport::new(TaskStatus::Completed));

    let (session, mut rx) = session_with(config(), &service, FakePdf::new(pages(&[0])));
    session.start_upload(Some(pdf_file("a.pdf"))).await.unwrap();
    session.wait_settled().await;

    let lines = status_lines(&drain(&mut rx));
    assert!(lines.contains(&"Processing: not_found".to_string()), "{lines:?}");
    assert_eq!(service.status_calls_for("t1"), 2);
}

// ── Transport failures ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn transport_errors_keep_polling_silently() {
    let service = Arc::new(FakeService::default());
    service.accept("t1", Duration::ZERO);
    for _ in 0..3 {
        service.report("t1", Duration::ZERO, Err("connection refused".into()));
    }
    service.status("t1", StatusReport::new(TaskStatus::Completed));

    let (session, mut rx) = session_with(config(), &service, FakePdf::new(pages(&[0])));
    session.start_upload(Some(pdf_file("a.pdf"))).await.unwrap();

    let phase = session.wait_settled().await;
    assert_eq!(phase, SessionPhase::Completed(TaskId::from("t1")));
    assert_eq!(service.status_calls_for("t1"), 4);

    let lines = status_lines(&drain(&mut rx));
    assert!(
        !lines.iter().any(|l| l.contains("connection refused")),
        "transport errors stay off the status line: {lines:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn repeated_transport_errors_are_reported_past_the_threshold() {
    let service = Arc::new(FakeService::default());
    service.accept("t1", Duration::ZERO);
    for _ in 0..3 {
        service.report("t1", Duration::ZERO, Err("connection refused".into()));
    }
    service.status("t1", StatusReport::new(TaskStatus::Completed));

    let config = SessionConfig::builder()
        .base_url("http://fake.test")
        .poll_interval_ms(100)
        .max_silent_poll_failures(Some(2))
        .build()
        .unwrap();
    let (session, mut rx) = session_with(config, &service, FakePdf::new(pages(&[0])));
    session.start_upload(Some(pdf_file("a.pdf"))).await.unwrap();
    session.wait_settled().await;

    let lines = status_lines(&drain(&mut rx));
    let unavailable: Vec<&String> = lines
        .iter()
        .filter(|l| l.starts_with("Status unavailable"))
        .collect();
    assert_eq!(unavailable.len(), 2, "{lines:?}");
    assert!(unavailable[0].contains("after 2 attempts"));
    assert_eq!(lines.last().map(String::as_str), Some("Conversion complete."));
}

// ── Upload validation and failure ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn submitting_without_a_file_only_shows_a_notice() {
    let service = Arc::new(FakeService::default());
    let (session, mut rx) = session_with(config(), &service, FakePdf::new(pages(&[0])));

    let err = session.start_upload(None).await.unwrap_err();
    assert!(matches!(err, ClientError::NoFileSelected));

    sleep(Duration::from_secs(1)).await;
    assert_eq!(
        drain(&mut rx),
        vec![ViewEvent::Notice(NO_FILE_NOTICE.to_string())]
    );
    assert_eq!(service.upload_calls.load(Ordering::SeqCst), 0);
    assert_eq!(session.phase(), SessionPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn rejected_upload_reenables_submit_and_never_polls() {
    let service = Arc::new(FakeService::default());
    service.reject(400, "Only PDF files are allowed");

    let (session, mut rx) = session_with(config(), &service, FakePdf::new(pages(&[0])));
    let err = session
        .start_upload(Some(pdf_file("a.pdf")))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::UploadRejected { status: 400, .. }));
    assert!(matches!(session.phase(), SessionPhase::Aborted(_)));

    sleep(Duration::from_secs(5)).await;
    let events = drain(&mut rx);
    assert_eq!(events.first(), Some(&ViewEvent::SubmitEnabled(false)));
    assert!(events.contains(&ViewEvent::SubmitEnabled(true)));
    let lines = status_lines(&events);
    assert!(
        lines.last().is_some_and(|l| l.contains("Only PDF files are allowed")),
        "{lines:?}"
    );
    assert!(service.status_calls.lock().unwrap().is_empty());
    assert_eq!(session.poll_metrics().started(), 0);
    assert_eq!(session.current_task(), None);
}

// ── Resubmission ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn resubmission_keeps_a_single_live_poller() {
    let service = Arc::new(FakeService::default());
    service.accept("a", Duration::ZERO);
    service.accept("b", Duration::ZERO);

    let (session, _rx) = session_with(config(), &service, FakePdf::new(pages(&[0])));
    session.start_upload(Some(pdf_file("a.pdf"))).await.unwrap();
    sleep(Duration::from_millis(550)).await;
    assert!(service.status_calls_for("a") >= 4);

    session.start_upload(Some(pdf_file("b.pdf"))).await.unwrap();
    let a_calls = service.status_calls_for("a");
    sleep(Duration::from_secs(2)).await;

    let metrics = session.poll_metrics();
    assert_eq!(metrics.peak(), 1);
    assert_eq!(metrics.active(), 1);
    assert_eq!(metrics.started(), 2);
    assert_eq!(service.status_calls_for("a"), a_calls, "old poller stopped");
    assert!(service.status_calls_for("b") >= 15);
    assert_eq!(session.current_task(), Some(TaskId::from("b")));
}

#[tokio::test(start_paused = true)]
async fn late_status_of_a_superseded_task_is_dropped() {
    let service = Arc::new(FakeService::default());
    service.accept("a", Duration::ZERO);
    service.accept("b", Duration::ZERO);
    service.report(
        "a",
        Duration::from_secs(3),
        Ok(StatusReport::new(TaskStatus::Processing).with_step("a-step")),
    );
    service.status("b", StatusReport::new(TaskStatus::Processing).with_step("b-step"));

    let config = SessionConfig::builder()
        .base_url("http://fake.test")
        .poll_interval_ms(1000)
        .build()
        .unwrap();
    let (session, mut rx) = session_with(config, &service, FakePdf::new(pages(&[0])));

    session.start_upload(Some(pdf_file("a.pdf"))).await.unwrap();
    // A's first query goes out at 1s and answers at 4s; B starts at 2s.
    sleep(Duration::from_secs(2)).await;
    session.start_upload(Some(pdf_file("b.pdf"))).await.unwrap();
    sleep(Duration::from_secs(4)).await;

    let events = drain(&mut rx);
    let lines = status_lines(&events);
    assert!(!lines.iter().any(|l| l.contains("a-step")), "{lines:?}");
    assert!(status_lines(since_last_clear(&events)).contains(&"Processing: b-step".to_string()));
    assert_eq!(service.status_calls_for("a"), 1);
}

#[tokio::test(start_paused = true)]
async fn late_upload_response_is_superseded() {
    let service = Arc::new(FakeService::default());
    service.accept("a", Duration::from_secs(5));
    service.accept("b", Duration::ZERO);

    let (session, mut rx) = session_with(config(), &service, FakePdf::new(pages(&[0])));

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.start_upload(Some(pdf_file("a.pdf"))).await })
    };
    sleep(Duration::from_secs(1)).await;
    let b = session.start_upload(Some(pdf_file("b.pdf"))).await.unwrap();
    assert_eq!(b.as_str(), "b");

    let a = first.await.unwrap();
    assert!(matches!(a, Err(ClientError::Superseded)), "{a:?}");

    sleep(Duration::from_secs(1)).await;
    assert_eq!(session.current_task(), Some(TaskId::from("b")));
    assert_eq!(session.poll_metrics().started(), 1);
    assert_eq!(service.status_calls_for("a"), 0);

    let events = drain(&mut rx);
    let queued = status_lines(&events)
        .into_iter()
        .filter(|l| l == "Processing: queued")
        .count();
    assert_eq!(queued, 1);
}

#[tokio::test(start_paused = true)]
async fn results_of_a_superseded_task_never_reach_the_view() {
    let service = Arc::new(FakeService::default());
    service.accept("a", Duration::ZERO);
    service.accept("b", Duration::ZERO);
    service.status("a", StatusReport::new(TaskStatus::Completed));
    service.json(Duration::from_secs(5), Some(r#"{"from":"a"}"#));

    let (session, mut rx) = session_with(config(), &service, FakePdf::new(pages(&[0])));
    session.start_upload(Some(pdf_file("a.pdf"))).await.unwrap();
    wait_for_phase(&session, |p| matches!(p, SessionPhase::Loading(_))).await;

    session.start_upload(Some(pdf_file("b.pdf"))).await.unwrap();
    sleep(Duration::from_secs(10)).await;

    let events = drain(&mut rx);
    assert!(
        !since_last_clear(&events)
            .iter()
            .any(|e| matches!(e, ViewEvent::JsonReady(_) | ViewEvent::HtmlReady(_))),
        "{events:?}"
    );
    assert_eq!(session.phase(), SessionPhase::Active(TaskId::from("b")));
}

// ── Result loading ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn malformed_json_is_reported_without_touching_html() {
    let service = Arc::new(FakeService::default());
    service.accept("t1", Duration::ZERO);
    service.status("t1", StatusReport::new(TaskStatus::Completed));
    service.json(Duration::ZERO, Some("{oops"));

    let (session, mut rx) = session_with(config(), &service, FakePdf::new(pages(&[0])));
    session.start_upload(Some(pdf_file("a.pdf"))).await.unwrap();
    assert_eq!(
        session.wait_settled().await,
        SessionPhase::Completed(TaskId::from("t1"))
    );

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, ViewEvent::HtmlReady(_))));
    assert!(events
        .iter()
        .any(|e| matches!(e, ViewEvent::JsonError(m) if m.contains("Malformed JSON"))));
    assert!(!events.iter().any(|e| matches!(e, ViewEvent::JsonReady(_))));
    let lines = status_lines(&events);
    assert!(
        lines.last().is_some_and(|l| l.contains("JSON result is unavailable")),
        "{lines:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn json_fetch_failure_is_reported() {
    let service = Arc::new(FakeService::default());
    service.accept("t1", Duration::ZERO);
    service.status("t1", StatusReport::new(TaskStatus::Completed));
    service.json(Duration::ZERO, None);

    let (session, mut rx) = session_with(config(), &service, FakePdf::new(pages(&[0])));
    session.start_upload(Some(pdf_file("a.pdf"))).await.unwrap();
    session.wait_settled().await;

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, ViewEvent::JsonError(m) if m.contains("HTTP 500"))));
}

#[tokio::test(start_paused = true)]
async fn intermediate_layout_is_loaded_on_request() {
    let service = Arc::new(FakeService::default());
    service.accept("t1", Duration::ZERO);
    service.status("t1", StatusReport::new(TaskStatus::Completed));

    let config = SessionConfig::builder()
        .base_url("http://fake.test")
        .poll_interval_ms(100)
        .load_intermediate(true)
        .build()
        .unwrap();
    let (session, mut rx) = session_with(config, &service, FakePdf::new(pages(&[0])));
    session.start_upload(Some(pdf_file("a.pdf"))).await.unwrap();
    session.wait_settled().await;

    let events = drain(&mut rx);
    let dump = events.iter().find_map(|e| match e {
        ViewEvent::IntermediateReady(pretty) => Some(pretty.clone()),
        _ => None,
    });
    assert!(dump.is_some_and(|d| d.contains("\"heading\"")));
    assert_eq!(service.intermediate_calls.load(Ordering::SeqCst), 1);
}

// ── Local preview ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn preview_keeps_page_order_despite_completion_order() {
    let service = Arc::new(FakeService::default());
    // Page 1 finishes last, page 2 first.
    let (session, mut rx) = session_with(config(), &service, FakePdf::new(pages(&[30, 10, 20])));

    session.start_upload(Some(pdf_file("a.pdf"))).await.unwrap();
    let preview = session.wait_preview().await.expect("preview rendered");

    let order: Vec<usize> = preview.surfaces().map(Surface::page_num).collect();
    assert_eq!(order, vec![1, 2, 3]);
    let sizes: Vec<(u32, u32)> = preview.surfaces().map(|s| (s.width(), s.height())).collect();
    assert_eq!(sizes, vec![(40, 60), (41, 60), (42, 60)]);

    let events = drain(&mut rx);
    let started = events
        .iter()
        .position(|e| *e == ViewEvent::PreviewStarted(3))
        .expect("page count announced");
    let arrivals: Vec<(usize, usize)> = events
        .iter()
        .enumerate()
        .filter_map(|(i, e)| match e {
            ViewEvent::PreviewPage { page_num, .. } => Some((i, *page_num)),
            _ => None,
        })
        .collect();
    assert!(arrivals.iter().all(|(i, _)| *i > started));
    let completion: Vec<usize> = arrivals.into_iter().map(|(_, p)| p).collect();
    assert_eq!(completion, vec![2, 3, 1]);
}

#[tokio::test(start_paused = true)]
async fn failing_page_leaves_the_rest_of_the_preview() {
    let service = Arc::new(FakeService::default());
    let mut layout = pages(&[0, 0, 0]);
    layout[1].fail = true;
    let (session, mut rx) = session_with(config(), &service, FakePdf::new(layout));

    session.start_upload(Some(pdf_file("a.pdf"))).await.unwrap();
    let preview = session.wait_preview().await.expect("preview rendered");

    assert!(matches!(preview.slots()[0], PageSlot::Ready(_)));
    assert!(matches!(&preview.slots()[1], PageSlot::Failed(e) if e.page() == 2));
    assert!(matches!(preview.slots()[2], PageSlot::Ready(_)));

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, ViewEvent::PreviewError(m) if m.contains("Page 2"))));
}

#[tokio::test(start_paused = true)]
async fn oversized_page_fails_its_slot_only() {
    let service = Arc::new(FakeService::default());
    let mut layout = pages(&[0, 0]);
    layout[0].oversized = true;
    let (session, mut rx) = session_with(config(), &service, FakePdf::new(layout));

    session.start_upload(Some(pdf_file("a.pdf"))).await.unwrap();
    let preview = session.wait_preview().await.expect("preview rendered");

    assert!(preview.is_complete());
    assert!(matches!(
        &preview.slots()[0],
        PageSlot::Failed(PageError::Viewport { page: 1, .. })
    ));
    assert!(matches!(preview.slots()[1], PageSlot::Ready(_)));

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        ViewEvent::PreviewError(m) if m.contains("Page 1") && m.contains("limit")
    )));
}

#[tokio::test(start_paused = true)]
async fn pdf_header_after_a_byte_order_mark_still_previews() {
    let service = Arc::new(FakeService::default());
    let (session, _rx) = session_with(config(), &service, FakePdf::new(pages(&[0])));

    let bytes = b"\xEF\xBB\xBF\r\n%PDF-1.4\n%fake body\n".to_vec();
    session
        .start_upload(Some(UploadFile::new("bom.pdf", bytes)))
        .await
        .unwrap();

    let preview = session.wait_preview().await.expect("preview rendered");
    assert_eq!(preview.surfaces().count(), 1);
}

#[tokio::test(start_paused = true)]
async fn non_pdf_fails_the_preview_but_still_uploads() {
    let service = Arc::new(FakeService::default());
    service.accept("t1", Duration::ZERO);
    service.status("t1", StatusReport::new(TaskStatus::Completed));

    let (session, mut rx) = session_with(config(), &service, FakePdf::new(pages(&[0])));
    session
        .start_upload(Some(UploadFile::new("notes.txt", b"hello world".to_vec())))
        .await
        .unwrap();

    assert!(session.wait_preview().await.is_none());
    assert_eq!(
        session.wait_settled().await,
        SessionPhase::Completed(TaskId::from("t1"))
    );
    assert_eq!(service.upload_calls.load(Ordering::SeqCst), 1);

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, ViewEvent::PreviewError(m) if m.contains("not a valid PDF"))));
    assert!(!status_lines(&events)
        .iter()
        .any(|l| l.contains("not a valid PDF")));
}

#[tokio::test(start_paused = true)]
async fn corrupt_pdf_is_reported_in_the_preview() {
    let service = Arc::new(FakeService::default());
    let (session, mut rx) = session_with(config(), &service, FakePdf::new(pages(&[0])));

    session
        .start_upload(Some(UploadFile::new(
            "broken.pdf",
            b"%PDF-1.4 corrupt".to_vec(),
        )))
        .await
        .unwrap();
    assert!(session.wait_preview().await.is_none());

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, ViewEvent::PreviewError(m) if m.contains("xref table missing"))));
}

#[tokio::test(start_paused = true)]
async fn new_upload_replaces_the_previous_preview() {
    let service = Arc::new(FakeService::default());
    let (session, mut rx) = session_with(config(), &service, FakePdf::new(pages(&[0, 0])));

    session.start_upload(Some(pdf_file("a.pdf"))).await.unwrap();
    assert_eq!(session.wait_preview().await.map(|p| p.page_count()), Some(2));

    session
        .start_upload(Some(UploadFile::new("b.txt", b"nope".to_vec())))
        .await
        .unwrap();
    assert!(session.wait_preview().await.is_none());
    assert!(session.preview().is_none());

    let events = drain(&mut rx);
    let cleared = events
        .iter()
        .filter(|e| **e == ViewEvent::ViewsCleared)
        .count();
    assert_eq!(cleared, 2);
}
