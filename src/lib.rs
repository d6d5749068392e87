//! # formula-capture
//!
//! Client pipeline for a formula-detection service: capture camera frames or
//! pick local files, validate them, upload them, and present the formulas the
//! service recognised.
//!
//! ## Pipeline Overview
//!
//! ```text
//! camera ─ MediaSource ─ CaptureScheduler ─┐
//!                                           ├─ Validator ─ UploadManager ─ ResultPresenter
//! local file ─ input::load_candidate ──────┘      │
//!                                           rejected: no network call
//! ```
//!
//! - **MediaSource** acquires and releases the camera and grabs JPEG frames.
//! - **CaptureScheduler** runs one capture round per tick, skipping ticks
//!   while a round is still in flight.
//! - **Validator** checks presence, declared type, size and (for PDFs) page
//!   count before anything touches the network.
//! - **UploadManager** sends frames as raw JPEG and files as multipart
//!   forms, reports progress, and classifies responses. HTTP 404 means
//!   "nothing detected" and is not an error.
//! - **ResultPresenter** turns results into an ordered display list.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use formula_capture::{detect_file, ClientConfig, DetectionOutcome};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .base_url("http://localhost:8000")
//!         .session_cookie("sessionid=abc123")
//!         .build()?;
//!     let detection = detect_file("worksheet.pdf", &config).await?;
//!     match detection.outcome {
//!         DetectionOutcome::Detected => {
//!             for entry in &detection.entries {
//!                 print!("{entry}");
//!             }
//!         }
//!         DetectionOutcome::NoDetection => println!("{:?}", detection.message),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `formcap` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! formula-capture = { version = "0.1", default-features = false }
//! ```
//!
//! PDF page counting needs a pdfium shared library at runtime (system
//! library, `PDFIUM_LIB_PATH`, or [`ClientConfigBuilder::pdfium_library_path`]).

// ── Modules ──────────────────────────────────────────────────────────────

pub mod board;
pub mod candidate;
pub mod config;
pub mod detect;
pub mod encode;
pub mod error;
pub mod input;
pub mod media;
pub mod pages;
pub mod presenter;
pub mod progress;
pub mod response;
pub mod round;
pub mod scheduler;
pub mod upload;
pub mod validate;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use board::{BoardSnapshot, Notice, NoticeLevel, ResultBoard};
pub use candidate::{CandidateFile, CandidateSource, MediaKind};
pub use config::{ClientConfig, ClientConfigBuilder, ValidationLimits};
pub use detect::{
    detect_file, detect_file_sync, detect_file_with, inspect_file, inspect_file_with,
    text_to_latex, Detection, DetectionOutcome, Inspection,
};
pub use error::{AcquisitionError, ClientError, UploadError, ValidationError};
pub use media::{
    CameraDevice, CaptureSession, MediaSource, MediaStatus, StillCamera, VideoConstraints,
    VideoStream,
};
pub use pages::{NoDocumentSupport, PageCounter, PdfiumPageCounter, UnreadableDocument};
pub use presenter::{Availability, DisplayEntry, ResultPresenter};
pub use progress::{NoopObserver, Observer, PipelineObserver};
pub use response::{FormulaEntry, ProcessingResult};
pub use round::FrameRound;
pub use scheduler::{CaptureRound, CaptureScheduler, SchedulerPhase, TriggerOutcome};
pub use upload::{build_http_client, Encoding, Endpoint, UploadManager, UploadState, UploadTask};
pub use validate::{AcceptedFile, ValidationOutcome, Validator};
