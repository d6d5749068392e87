//! Error types for the formula-capture library.
//!
//! Each pipeline boundary owns its own error type so callers can tell a
//! user-correctable problem from a hard failure without string matching:
//!
//! * [`AcquisitionError`] — the camera could not be opened or started.
//!   Surfaced inline; the user retries by acquiring again.
//!
//! * [`ValidationError`] — the candidate file broke a client-side rule.
//!   Blocks submission entirely: no request is ever issued for it.
//!
//! * [`UploadError`] — the submission failed hard (transport, non-success
//!   status, unparseable body). "No formula found" is **not** an error; it is
//!   the soft [`crate::upload::UploadState::NoDetection`] outcome.
//!
//! * [`ClientError`] — fatal errors from the one-shot entry points in
//!   [`crate::detect`] and from construction (bad config, pdfium binding).

use std::path::PathBuf;
use thiserror::Error;

/// Why the camera could not be brought to the streaming state.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize)]
pub enum AcquisitionError {
    /// The user or the platform refused access to the device.
    #[error("Camera access denied: {detail}")]
    PermissionDenied { detail: String },

    /// No device matched, or the device is busy/unplugged.
    #[error("Camera unavailable: {detail}")]
    DeviceUnavailable { detail: String },

    /// The stream was obtained but playback could not be started.
    #[error("Camera stream could not start: {detail}")]
    PlaybackStartFailed { detail: String },

    /// `release()` was called while the acquisition was still pending.
    #[error("Camera was released before acquisition completed")]
    Released,
}

/// A client-side validation rule that a candidate file violated.
///
/// Display gives the user-facing message; [`ValidationError::code`] gives a
/// stable machine-readable reason code.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize)]
pub enum ValidationError {
    /// No payload at all (nothing selected, or an empty buffer).
    #[error("No file was provided")]
    MissingFile,

    /// The declared media type is not on the allow-list.
    #[error("Unsupported file type '{declared}'. Allowed: {allowed}")]
    UnsupportedType { declared: String, allowed: String },

    /// The payload exceeds the per-kind size ceiling.
    #[error("File exceeds {} ({size} bytes, limit {limit} bytes)", size_label(.limit))]
    FileTooLarge { size: u64, limit: u64 },

    /// The document could not be opened to count its pages.
    #[error("Document could not be read: {detail}")]
    UnreadableDocument { detail: String },

    /// The document page count falls outside the accepted range.
    #[error("Document has {pages} pages; between {min} and {max} are allowed")]
    PageCountOutOfRange { pages: u32, min: u32, max: u32 },
}

/// `5MB`, `1.5MB`, `512KB` or `300 bytes`.
fn size_label(bytes: &u64) -> String {
    let bytes = *bytes;
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB {
        if bytes % MIB == 0 {
            format!("{}MB", bytes / MIB)
        } else {
            format!("{:.1}MB", bytes as f64 / MIB as f64)
        }
    } else if bytes >= KIB && bytes % KIB == 0 {
        format!("{}KB", bytes / KIB)
    } else {
        format!("{bytes} bytes")
    }
}

impl ValidationError {
    /// Stable reason code, safe to match on or log.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingFile => "missing_file",
            ValidationError::UnsupportedType { .. } => "unsupported_type",
            ValidationError::FileTooLarge { .. } => "file_too_large",
            ValidationError::UnreadableDocument { .. } => "unreadable_document",
            ValidationError::PageCountOutOfRange { .. } => "page_count_out_of_range",
        }
    }
}

/// Hard failure of one upload.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize)]
pub enum UploadError {
    /// No response was received (connection refused, reset, timeout).
    #[error("Network error: {detail}")]
    Transport { detail: String },

    /// The service answered with a non-success, non-soft status.
    #[error("Server returned HTTP {status}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Server { status: u16, message: Option<String> },

    /// A success status whose body did not match the endpoint's contract.
    #[error("Unexpected response from server: {detail}")]
    MalformedResponse { detail: String },

    /// The upload task ended without publishing an outcome.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    /// Message to show the user: the server's own text when it sent one,
    /// a generic line otherwise.
    pub fn user_message(&self) -> String {
        match self {
            UploadError::Server {
                message: Some(m), ..
            } if !m.trim().is_empty() => m.clone(),
            UploadError::Transport { .. } => {
                "Could not reach the detection service. Check your connection and try again."
                    .to_string()
            }
            _ => "The file could not be processed. Please try again.".to_string(),
        }
    }
}

/// Fatal errors returned by the library's entry points.
#[derive(Debug, Error)]
pub enum ClientError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Reading the file failed for another reason.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// The candidate was rejected before any network call.
    #[error("{0}")]
    Rejected(#[from] ValidationError),

    /// The upload failed hard.
    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),

    /// The camera could not be acquired.
    #[error("{0}")]
    Acquisition(#[from] AcquisitionError),

    /// A capture scheduler was started without a streaming camera.
    #[error("Camera is not streaming; acquire it before starting captures")]
    NotStreaming,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDF page counting needs the pdfium shared library. You can:\n\
  • Install libpdfium system-wide.\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium (or pass --pdfium-lib).\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}
