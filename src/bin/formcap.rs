//! CLI binary for formula-capture.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ClientConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use formula_capture::{
    detect_file_with, inspect_file, text_to_latex, AcquisitionError, CaptureScheduler,
    ClientConfig, DetectionOutcome, FrameRound, MediaSource, NoDocumentSupport, NoopObserver,
    PipelineObserver, ResultBoard, ResultPresenter, StillCamera, UploadManager, UploadState,
    ValidationError, Validator,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
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

// ── Upload progress bar ──────────────────────────────────────────────────────

/// Renders upload progress for `detect` as a percentage bar.
struct UploadBar {
    bar: ProgressBar,
}

impl UploadBar {
    fn new(file: &str) -> Arc<Self> {
        let bar = ProgressBar::new(1000);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {percent:>3}%  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Uploading");
        bar.set_message(file.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PipelineObserver for UploadBar {
    fn on_upload_progress(&self, progress: f32) {
        self.bar.set_position((progress * 1000.0) as u64);
        if progress >= 1.0 {
            self.bar.set_prefix("Detecting");
        }
    }

    fn on_upload_outcome(&self, _generation: Option<u64>, _state: &UploadState) {
        self.bar.finish_and_clear();
    }

    fn on_rejected(&self, _generation: Option<u64>, _error: &ValidationError) {
        self.bar.finish_and_clear();
    }
}

// ── Watch-mode reporter ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
struct WatchProgress {
    completed: u64,
    ended: bool,
}

/// Prints one line (plus entries) per finished capture round.
struct WatchReporter {
    progress: watch::Sender<WatchProgress>,
    quiet: bool,
}

impl WatchReporter {
    fn finish_round(&self) {
        self.progress.send_modify(|p| p.completed += 1);
    }
}

impl PipelineObserver for WatchReporter {
    fn on_round_skipped(&self, _generation: u64) {
        if !self.quiet {
            eprintln!("{} {}", dim("·"), dim("tick skipped, previous round still running"));
        }
    }

    fn on_capture_error(&self, _generation: u64, error: &AcquisitionError) {
        eprintln!("{} camera: {}", red("✗"), error);
        self.progress.send_modify(|p| p.ended = true);
    }

    fn on_rejected(&self, _generation: Option<u64>, error: &ValidationError) {
        eprintln!("{} frame rejected: {}", red("✗"), error);
        self.finish_round();
    }

    fn on_upload_outcome(&self, _generation: Option<u64>, state: &UploadState) {
        match state {
            UploadState::Succeeded(result) => {
                eprintln!("{} {} formula(s)", green("✓"), result.entries.len());
                print!("{}", ResultPresenter::render_text(&ResultPresenter::present_one(result)));
            }
            UploadState::NoDetection { message } => {
                if !self.quiet {
                    eprintln!("{} {}", cyan("○"), message);
                }
            }
            UploadState::Failed(e) => eprintln!("{} {}", red("✗"), e.user_message()),
            UploadState::Cancelled | UploadState::Uploading { .. } => {}
        }
        self.finish_round();
    }

    fn on_stale_result(&self, generation: u64) {
        eprintln!(
            "{}",
            dim(&format!("discarded a result from ended session {generation}"))
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Detect formulas in a photo or a PDF worksheet
  formcap detect worksheet.pdf
  formcap detect --json photo.png > result.json

  # Check a file against the upload rules without sending it
  formcap inspect worksheet.pdf

  # Replay a directory of frames as a camera, one round every 2 s
  formcap watch ./frames --interval-ms 2000 --rounds 10

  # Convert a sentence to LaTeX
  formcap latex "x squared plus one equals zero"

UPLOAD RULES:
  Images     jpeg, png, webp   up to 5 MB
  Documents  pdf               up to 50 MB, 1–50 pages

ENVIRONMENT VARIABLES:
  FORMCAP_BASE_URL        Detection service base URL
  FORMCAP_SESSION_COOKIE  Session cookie sent with every request (name=value)
  FORMCAP_TIMEOUT         Request timeout in seconds
  PDFIUM_LIB_PATH         Path to libpdfium, used to count PDF pages
  RUST_LOG                Log filter (overrides -v / -q)
"#;

/// Capture, validate and upload images and PDFs to a formula-detection service.
#[derive(Parser, Debug)]
#[command(
    name = "formcap",
    version,
    about = "Send photos, camera frames and PDFs to a formula-detection service",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Detection service base URL.
    #[arg(
        long,
        global = true,
        env = "FORMCAP_BASE_URL",
        default_value = "http://localhost:8000"
    )]
    base_url: String,

    /// Session cookie (`name=value`) sent with every request.
    #[arg(long, global = true, env = "FORMCAP_SESSION_COOKIE", hide_env_values = true)]
    session_cookie: Option<String>,

    /// Request timeout in seconds.
    #[arg(long, global = true, env = "FORMCAP_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// Path to the pdfium shared library.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "FORMCAP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except results and errors.
    #[arg(short, long, global = true, env = "FORMCAP_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate and upload one image or PDF, then print what was detected.
    Detect {
        /// Image (jpeg/png/webp) or PDF file.
        file: PathBuf,

        /// Print the detection as JSON.
        #[arg(long)]
        json: bool,

        /// Disable the progress bar.
        #[arg(long, env = "FORMCAP_NO_PROGRESS")]
        no_progress: bool,
    },

    /// Run the upload rules on a file without sending it.
    Inspect {
        file: PathBuf,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Treat an image file or a directory of images as a camera and upload
    /// one frame per interval.
    Watch {
        /// Image file or directory of images, replayed in name order.
        source: PathBuf,

        /// Milliseconds between capture rounds.
        #[arg(long, env = "FORMCAP_INTERVAL_MS", default_value_t = 5000)]
        interval_ms: u64,

        /// Stop after this many finished rounds (default: until Ctrl-C).
        #[arg(long)]
        rounds: Option<u64>,

        /// Frame width requested from the camera.
        #[arg(long, default_value_t = 1280)]
        width: u32,

        /// Frame height requested from the camera.
        #[arg(long, default_value_t = 720)]
        height: u32,
    },

    /// Convert free text into LaTeX.
    Latex {
        /// Text to convert.
        text: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.global.verbose {
        "debug"
    } else if cli.global.quiet {
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

    match cli.command {
        Command::Detect {
            ref file,
            json,
            no_progress,
        } => {
            let config = build_config(&cli.global, None)?;
            run_detect(&cli.global, &config, file, json, no_progress).await
        }
        Command::Inspect { ref file, json } => {
            let config = build_config(&cli.global, None)?;
            run_inspect(&config, file, json).await
        }
        Command::Watch {
            ref source,
            interval_ms,
            rounds,
            width,
            height,
        } => {
            let config = build_config(
                &cli.global,
                Some((Duration::from_millis(interval_ms), width, height)),
            )?;
            run_watch(&cli.global, &config, source, rounds).await
        }
        Command::Latex { ref text } => {
            let config = build_config(&cli.global, None)?;
            let latex = text_to_latex(text, &config)
                .await
                .context("Text conversion failed")?;
            println!("{latex}");
            Ok(())
        }
    }
}

/// Map CLI args to `ClientConfig`.
fn build_config(
    global: &GlobalArgs,
    camera: Option<(Duration, u32, u32)>,
) -> Result<ClientConfig> {
    let mut builder = ClientConfig::builder()
        .base_url(global.base_url.clone())
        .request_timeout_secs(global.timeout);
    if let Some(ref cookie) = global.session_cookie {
        builder = builder.session_cookie(cookie.clone());
    }
    if let Some(ref path) = global.pdfium_lib {
        builder = builder.pdfium_library_path(path.clone());
    }
    if let Some((interval, width, height)) = camera {
        builder = builder.capture_interval(interval).frame_size(width, height);
    }
    builder.build().context("Invalid configuration")
}

async fn run_detect(
    global: &GlobalArgs,
    config: &ClientConfig,
    file: &Path,
    json: bool,
    no_progress: bool,
) -> Result<()> {
    let show_progress = !global.quiet && !no_progress && !json;
    let observer: Arc<dyn PipelineObserver> = if show_progress {
        UploadBar::new(&file.display().to_string()) as Arc<dyn PipelineObserver>
    } else {
        Arc::new(NoopObserver)
    };

    let detection = detect_file_with(file, config, None, observer)
        .await
        .with_context(|| format!("Detection failed for {}", file.display()))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&detection).context("Failed to serialise detection")?
        );
        return Ok(());
    }

    match detection.outcome {
        DetectionOutcome::Detected => {
            if !global.quiet {
                eprintln!(
                    "{} {} formula(s) in {}{}",
                    green("✔"),
                    bold(&detection.entries.len().to_string()),
                    detection.file,
                    detection
                        .page_count
                        .map(|p| dim(&format!("  ({p} pages)")))
                        .unwrap_or_default()
                );
                if let Some(ref message) = detection.message {
                    eprintln!("  {}", dim(message));
                }
            }
            print!("{}", ResultPresenter::render_text(&detection.entries));
        }
        DetectionOutcome::NoDetection => {
            eprintln!(
                "{} {}",
                cyan("○"),
                detection.message.as_deref().unwrap_or("Nothing detected")
            );
        }
    }
    Ok(())
}

async fn run_inspect(config: &ClientConfig, file: &Path, json: bool) -> Result<()> {
    let report = inspect_file(file, config)
        .await
        .with_context(|| format!("{} would be rejected", file.display()))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else {
        println!("File:   {}", report.file);
        println!("Type:   {} ({})", report.declared_type, report.kind);
        println!("Size:   {} bytes", report.size);
        if let Some(pages) = report.page_count {
            println!("Pages:  {pages}");
        }
        println!("Status: {}", green("accepted"));
    }
    Ok(())
}

async fn run_watch(
    global: &GlobalArgs,
    config: &ClientConfig,
    source: &Path,
    rounds: Option<u64>,
) -> Result<()> {
    let media = Arc::new(MediaSource::new(Arc::new(StillCamera::new(source)), config));
    let generation = media
        .acquire()
        .await
        .with_context(|| format!("Could not open {} as a camera", source.display()))?;

    let (tx, mut rx) = watch::channel(WatchProgress::default());
    let reporter = Arc::new(WatchReporter {
        progress: tx,
        quiet: global.quiet,
    });

    let round = FrameRound::new(
        Arc::clone(&media),
        Validator::new(config.limits, Arc::new(NoDocumentSupport)),
        Arc::new(UploadManager::new(config).context("Failed to build HTTP client")?),
        Arc::new(ResultBoard::new()),
    )
    .with_observer(reporter.clone());

    let scheduler = CaptureScheduler::start_with_observer(
        Arc::clone(&media),
        Arc::new(round),
        config.capture_interval,
        reporter,
    )
    .context("Failed to start capture")?;

    if !global.quiet {
        eprintln!(
            "{} {} (session {generation}, every {:?}) — Ctrl-C to stop",
            cyan("◆"),
            bold(&format!("Watching {}", source.display())),
            config.capture_interval
        );
    }
    scheduler.trigger_now();

    let target = rounds.unwrap_or(u64::MAX);
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            eprintln!();
        }
        _ = rx.wait_for(|p| p.ended || p.completed >= target) => {}
    }

    let started = scheduler.rounds_started();
    scheduler.stop();
    if !global.quiet {
        eprintln!(
            "{} stopped after {} round(s)",
            green("✔"),
            bold(&started.to_string())
        );
    }
    Ok(())
}
