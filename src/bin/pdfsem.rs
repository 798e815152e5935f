//! CLI binary for pdf-semantic-client.
//!
//! A thin shim over the library crate: maps CLI flags to `SessionConfig`,
//! drives one upload through a `SessionController`, and turns the view
//! events into terminal output and files.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf_semantic_client::{
    config::DEFAULT_BASE_URL, ChannelView, SessionConfig, SessionController, SessionPhase,
    UploadFile, ViewEvent,
};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert and print the JSON result to stdout
  pdfsem paper.pdf

  # Keep everything: page previews, JSON, HTML link, intermediate layout
  pdfsem paper.pdf --output-dir out/ --intermediate

  # Talk to a remote conversion service, polling every second
  pdfsem --server http://converter.internal:8000 --poll-interval-ms 1000 paper.pdf

OUTPUT DIRECTORY LAYOUT:
  preview/page-001.png   locally rendered page previews
  result.json            pretty-printed structured result
  result_html.url        address of the converted HTML document
  intermediate.json      backend layout dump (with --intermediate)

ENVIRONMENT VARIABLES:
  PDFSEM_SERVER           Conversion service base URL
  PDFIUM_LIB_PATH         Path to an existing libpdfium, skips auto-download
  PDFIUM_AUTO_CACHE_DIR   Override the default pdfium cache directory
  RUST_LOG                Override the log filter
"#;

/// Submit PDFs to a semantic conversion service and collect the results.
#[derive(Parser, Debug)]
#[command(
    name = "pdfsem",
    version,
    about = "Submit a PDF to a semantic conversion service and collect the results",
    long_about = "Uploads a PDF to a conversion service, follows the job until it completes \
or fails, and downloads the structured JSON result. Pages are previewed locally with pdfium \
while the server works.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file to submit.
    input: Option<PathBuf>,

    /// Conversion service base URL.
    #[arg(long, env = "PDFSEM_SERVER", default_value = DEFAULT_BASE_URL)]
    server: String,

    /// Write previews and results into this directory instead of stdout.
    #[arg(short, long, env = "PDFSEM_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Milliseconds between two status queries.
    #[arg(long, env = "PDFSEM_POLL_INTERVAL_MS", default_value_t = 2000)]
    poll_interval_ms: u64,

    /// Preview scale (1.0 = one pixel per PDF point).
    #[arg(long, env = "PDFSEM_SCALE", default_value_t = 1.0)]
    scale: f32,

    /// Pages rasterised concurrently for the preview.
    #[arg(long, env = "PDFSEM_RENDER_CONCURRENCY", default_value_t = 4)]
    render_concurrency: usize,

    /// HTTP request timeout in seconds.
    #[arg(long, env = "PDFSEM_REQUEST_TIMEOUT", default_value_t = 120)]
    request_timeout: u64,

    /// Report on the status line after this many consecutive failed status queries.
    #[arg(long, env = "PDFSEM_MAX_SILENT_FAILURES")]
    max_silent_failures: Option<u32>,

    /// Also fetch the backend's intermediate layout dump.
    #[arg(long, env = "PDFSEM_INTERMEDIATE")]
    intermediate: bool,

    /// Disable the status spinner.
    #[arg(long, env = "PDFSEM_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFSEM_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the JSON result.
    #[arg(short, long, env = "PDFSEM_QUIET")]
    quiet: bool,
}

// ── Terminal view ────────────────────────────────────────────────────────────

/// What the event consumer produced, for the final summary.
#[derive(Debug, Default)]
struct Outcome {
    preview_errors: usize,
    html_url: Option<String>,
    json_written: bool,
    json_error: Option<String>,
}

/// Turns view events into spinner updates, log lines and files.
struct Terminal {
    bar: Option<ProgressBar>,
    quiet: bool,
    output_dir: Option<PathBuf>,
}

impl Terminal {
    fn new(show_progress: bool, quiet: bool, output_dir: Option<PathBuf>) -> Self {
        let bar = show_progress.then(|| {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_strings(TICKS),
            );
            bar.set_prefix("Converting");
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        Self {
            bar,
            quiet,
            output_dir,
        }
    }

    fn line(&self, text: String) {
        if self.quiet {
            return;
        }
        match &self.bar {
            Some(bar) => bar.println(text),
            None => eprintln!("{text}"),
        }
    }

    async fn run(self, mut events: UnboundedReceiver<ViewEvent>) -> Result<Outcome> {
        let mut outcome = Outcome::default();

        while let Some(event) = events.recv().await {
            match event {
                ViewEvent::Status(text) => match &self.bar {
                    Some(bar) => bar.set_message(text),
                    None => self.line(format!("{} {}", cyan("◆"), text)),
                },
                ViewEvent::Notice(text) => eprintln!("{} {}", red("✘"), text),
                ViewEvent::PreviewStarted(count) => {
                    self.line(format!("{} Previewing {count} pages", cyan("◆")));
                }
                ViewEvent::PreviewPage { page_num, surface } => {
                    if let Some(dir) = &self.output_dir {
                        let path = dir.join("preview").join(format!("page-{page_num:03}.png"));
                        surface.save_png(&path)?;
                    }
                    self.line(format!(
                        "  {} Page {:>3}  {}",
                        green("✓"),
                        page_num,
                        dim(&format!("{}x{} px", surface.width(), surface.height()))
                    ));
                }
                ViewEvent::PreviewError(message) => {
                    outcome.preview_errors += 1;
                    self.line(format!("  {} {}", red("✗"), message));
                }
                ViewEvent::HtmlReady(url) => {
                    if let Some(dir) = &self.output_dir {
                        write_file(&dir.join("result_html.url"), format!("{url}\n")).await?;
                    }
                    outcome.html_url = Some(url.to_string());
                }
                ViewEvent::JsonReady(pretty) => {
                    match &self.output_dir {
                        Some(dir) => write_file(&dir.join("result.json"), pretty).await?,
                        None => println!("{pretty}"),
                    }
                    outcome.json_written = true;
                }
                ViewEvent::JsonError(message) => {
                    self.line(format!("{} {}", red("✗"), message));
                    outcome.json_error = Some(message);
                }
                ViewEvent::IntermediateReady(pretty) => {
                    if let Some(dir) = &self.output_dir {
                        write_file(&dir.join("intermediate.json"), pretty).await?;
                    }
                }
                ViewEvent::SubmitEnabled(_) | ViewEvent::ViewsCleared => {}
            }
        }

        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
        Ok(outcome)
    }
}

async fn write_file(path: &Path, contents: String) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

// ── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner carries the status line; library INFO logs would only
    // tear it apart.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let session = SessionController::connect(config, Arc::new(ChannelView::new(tx)))
        .context("Failed to set up the conversion client")?;

    // ── Validation ───────────────────────────────────────────────────────
    let Some(input) = cli.input.clone() else {
        // Shows the "select a file" notice; nothing is sent.
        let _ = session.start_upload(None).await;
        drop(session);
        Terminal::new(false, cli.quiet, None).run(rx).await?;
        return Ok(ExitCode::from(2));
    };

    ensure_pdfium(cli.quiet)?;

    if let Some(dir) = &cli.output_dir {
        tokio::fs::create_dir_all(dir.join("preview"))
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let file = UploadFile::from_path(&input)
        .await
        .context("Failed to read input PDF")?;

    let terminal = Terminal::new(show_progress, cli.quiet, cli.output_dir.clone());
    let consumer = tokio::spawn(terminal.run(rx));

    // ── Run session ──────────────────────────────────────────────────────
    let submitted = session.start_upload(Some(file)).await;
    let phase = match &submitted {
        Ok(_) => session.wait_settled().await,
        Err(_) => session.phase(),
    };
    let preview = session.wait_preview().await;
    drop(session);

    let outcome = consumer.await.context("Output task panicked")??;

    // ── Summary ──────────────────────────────────────────────────────────
    if !cli.quiet {
        if let Some(preview) = &preview {
            eprintln!(
                "{} Preview: {}/{} pages rendered",
                if outcome.preview_errors == 0 {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                preview.surfaces().count(),
                preview.page_count(),
            );
        }
        if let Some(url) = &outcome.html_url {
            eprintln!("   HTML result: {}", bold(url));
        }
        if let Some(dir) = &cli.output_dir {
            if outcome.json_written {
                eprintln!("   JSON result: {}", bold(&dir.join("result.json").display().to_string()));
            }
        }
    }

    let code = match phase {
        SessionPhase::Completed(task_id) => {
            if let Some(err) = &outcome.json_error {
                eprintln!("{} Task {} completed, but: {}", cyan("⚠"), task_id, err);
                ExitCode::from(1)
            } else {
                if !cli.quiet {
                    eprintln!("{} Task {} completed", green("✔"), bold(task_id.as_str()));
                }
                ExitCode::SUCCESS
            }
        }
        SessionPhase::Failed { task_id, error } => {
            eprintln!("{} Task {} failed: {}", red("✘"), task_id, error);
            ExitCode::from(1)
        }
        SessionPhase::Aborted(reason) => {
            eprintln!("{} {}", red("✘"), reason);
            ExitCode::from(1)
        }
        other => {
            if let Err(e) = submitted {
                eprintln!("{} {}", red("✘"), e);
            } else {
                eprintln!("{} Session ended in {:?}", red("✘"), other);
            }
            ExitCode::from(1)
        }
    };
    Ok(code)
}

/// Map CLI args to `SessionConfig`.
fn build_config(cli: &Cli) -> Result<SessionConfig> {
    SessionConfig::builder()
        .base_url(cli.server.as_str())
        .poll_interval_ms(cli.poll_interval_ms)
        .render_scale(cli.scale)
        .render_concurrency(cli.render_concurrency)
        .request_timeout_secs(cli.request_timeout)
        .max_silent_poll_failures(cli.max_silent_failures)
        .load_intermediate(cli.intermediate)
        .build()
        .context("Invalid configuration")
}

/// Make sure a pdfium library is available before the preview needs it.
///
/// The first run downloads it into the cache (or extracts the embedded copy
/// when built with `bundled`); later runs only check the path.
fn ensure_pdfium(quiet: bool) -> Result<()> {
    if pdfium_auto::is_pdfium_cached() {
        return Ok(());
    }
    if quiet {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to download PDFium engine")?;
        return Ok(());
    }

    let dl_bar = ProgressBar::new(0);
    dl_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    dl_bar.set_prefix("PDF engine");
    dl_bar.enable_steady_tick(Duration::from_millis(80));

    let bar = dl_bar.clone();
    tokio::task::block_in_place(|| {
        pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
            if let Some(t) = total {
                if bar.length().unwrap_or(0) != t {
                    bar.set_length(t);
                }
            }
            bar.set_position(downloaded);
        }))
    })
    .context("Failed to download PDFium engine")?;

    dl_bar.finish_with_message("ready ✓");
    Ok(())
}
