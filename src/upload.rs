//! Submission of validated files to the detection service.
//!
//! ## One slot, one live upload
//!
//! An [`UploadManager`] is one user-visible action slot (the camera feed,
//! or the file picker). Submitting while a previous upload in the same slot
//! is still running cancels the previous one: its task is aborted, which
//! drops the in-flight request at the transport layer, and its published
//! state becomes [`UploadState::Cancelled`]. At most one upload per slot is
//! ever live.
//!
//! ## Two encodings behind one call
//!
//! Captured frames go out as a raw `image/jpeg` body; user files go out as a
//! multipart form with a `pdf` or `imagen` field. [`Endpoint`] picks the URL
//! and the [`Encoding`]; the rest of the upload path is shared.
//!
//! ## Progress
//!
//! The payload is streamed to the transport in fixed-size chunks and the
//! fraction handed over so far is published after every chunk. The value
//! only ever grows.

use crate::candidate::{CandidateFile, CandidateSource, MediaKind};
use crate::config::ClientConfig;
use crate::error::{ClientError, UploadError};
use crate::response::{self, ProcessingResult};
use crate::validate::AcceptedFile;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use reqwest::cookie::Jar;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

/// Service endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Endpoint {
    /// `/api/procesar_fotograma/` — raw JPEG frame.
    Frame,
    /// `/api/procesar_pdf/` — multipart field `pdf`.
    Document,
    /// `/api/procesar_imagen/` — multipart field `imagen`.
    Image,
    /// `/api/procesar_texto/` — JSON `{texto}`.
    Text,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Frame => "api/procesar_fotograma/",
            Endpoint::Document => "api/procesar_pdf/",
            Endpoint::Image => "api/procesar_imagen/",
            Endpoint::Text => "api/procesar_texto/",
        }
    }

    /// Where an accepted file is sent.
    pub fn for_file(file: &AcceptedFile) -> Self {
        match (file.candidate().source(), file.kind()) {
            (CandidateSource::CameraFrame, _) => Endpoint::Frame,
            (CandidateSource::UserFile, MediaKind::Document) => Endpoint::Document,
            (CandidateSource::UserFile, MediaKind::Image) => Endpoint::Image,
        }
    }

    /// How the payload is put on the wire for this endpoint.
    pub fn encoding(self) -> Encoding {
        match self {
            Endpoint::Frame => Encoding::RawBody,
            Endpoint::Document => Encoding::Multipart { field: "pdf" },
            Endpoint::Image => Encoding::Multipart { field: "imagen" },
            Endpoint::Text => Encoding::Json,
        }
    }
}

/// Payload encoding strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// The payload is the whole body; `Content-Type` is its declared type.
    RawBody,
    /// The payload is one file part of a `multipart/form-data` body.
    Multipart { field: &'static str },
    /// A JSON request object; carries no file payload.
    Json,
}

impl Encoding {
    /// Attach `body` (the streamed payload of `candidate`) to `request`.
    pub fn attach(
        self,
        request: RequestBuilder,
        candidate: &CandidateFile,
        body: Body,
    ) -> Result<RequestBuilder, UploadError> {
        match self {
            Encoding::RawBody => Ok(request
                .header(CONTENT_TYPE, candidate.declared_type())
                .body(body)),
            Encoding::Multipart { field } => {
                let part = Part::stream_with_length(body, candidate.size())
                    .file_name(candidate.name().to_string())
                    .mime_str(candidate.declared_type())
                    .map_err(|e| UploadError::Internal(format!("bad part type: {e}")))?;
                Ok(request.multipart(Form::new().part(field, part)))
            }
            Encoding::Json => Err(UploadError::Internal(
                "JSON endpoints do not take a file payload".into(),
            )),
        }
    }
}

/// Published state of one upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadState {
    /// Bytes are going out; `progress` is in `[0, 1]`.
    Uploading { progress: f32 },
    /// The service recognised at least one formula (or, for documents,
    /// answered successfully).
    Succeeded(ProcessingResult),
    /// Valid input, nothing recognised. Not an error.
    NoDetection { message: String },
    /// Hard failure.
    Failed(UploadError),
    /// Superseded by a newer upload in the same slot, or cancelled.
    Cancelled,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UploadState::Uploading { .. })
    }

    /// Upload progress; terminal states report 1.0 except `Cancelled`.
    pub fn progress(&self) -> f32 {
        match self {
            UploadState::Uploading { progress } => *progress,
            UploadState::Cancelled => 0.0,
            _ => 1.0,
        }
    }
}

/// Handle on one submission attempt.
///
/// Dropping the handle does not cancel the upload; use
/// [`UploadTask::cancel`] or submit a newer file in the same slot.
#[derive(Debug)]
pub struct UploadTask {
    id: u64,
    endpoint: Endpoint,
    state: Arc<watch::Sender<UploadState>>,
    rx: watch::Receiver<UploadState>,
    abort: AbortHandle,
}

impl UploadTask {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> UploadState {
        self.rx.borrow().clone()
    }

    /// Wait for the terminal state.
    pub async fn outcome(&self) -> UploadState {
        let mut rx = self.rx.clone();
        let outcome = match rx.wait_for(UploadState::is_terminal).await {
            Ok(state) => state.clone(),
            Err(_) => UploadState::Failed(UploadError::Internal(
                "upload task ended without an outcome".into(),
            )),
        };
        outcome
    }

    /// Stream of state changes, starting with the current one.
    pub fn updates(&self) -> WatchStream<UploadState> {
        WatchStream::new(self.rx.clone())
    }

    /// Cancel this upload. No-op once it has reached a terminal state.
    pub fn cancel(&self) {
        cancel(self.id, &self.state, &self.abort);
    }
}

fn cancel(id: u64, state: &watch::Sender<UploadState>, abort: &AbortHandle) {
    let cancelled = state.send_if_modified(|s| {
        if s.is_terminal() {
            false
        } else {
            *s = UploadState::Cancelled;
            true
        }
    });
    abort.abort();
    if cancelled {
        info!("Upload {} cancelled", id);
    }
}

fn publish_terminal(state: &watch::Sender<UploadState>, outcome: UploadState) {
    state.send_if_modified(|s| {
        if s.is_terminal() {
            false
        } else {
            *s = outcome;
            true
        }
    });
}

fn publish_progress(state: &watch::Sender<UploadState>, fraction: f32) {
    let fraction = fraction.clamp(0.0, 1.0);
    state.send_if_modified(|s| match s {
        UploadState::Uploading { progress } if fraction > *progress => {
            *progress = fraction;
            true
        }
        _ => false,
    });
}

struct Slot {
    id: u64,
    state: Arc<watch::Sender<UploadState>>,
    abort: AbortHandle,
}

/// Build the HTTP client shared by every slot.
///
/// The client always carries a cookie jar, so session cookies set by the
/// service (or seeded through `session_cookie`) go out with every request.
pub fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client, ClientError> {
    let base = config.parsed_base_url()?;
    let jar = Arc::new(Jar::default());
    if let Some(ref cookie) = config.session_cookie {
        jar.add_cookie_str(cookie, &base);
    }
    reqwest::Client::builder()
        .cookie_provider(jar)
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .user_agent(concat!("formcap/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ClientError::HttpClient(e.to_string()))
}

/// Submits accepted files for one action slot.
pub struct UploadManager {
    http: reqwest::Client,
    base_url: Url,
    chunk_size: usize,
    timeout_secs: u64,
    next_id: AtomicU64,
    slot: Mutex<Option<Slot>>,
}

impl UploadManager {
    /// A slot with its own HTTP client.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::with_client(build_http_client(config)?, config)
    }

    /// A slot sharing an existing client (and therefore its cookie jar).
    pub fn with_client(http: reqwest::Client, config: &ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            http,
            base_url: config.parsed_base_url()?,
            chunk_size: config.upload_chunk_size.max(1),
            timeout_secs: config.request_timeout_secs,
            next_id: AtomicU64::new(0),
            slot: Mutex::new(None),
        })
    }

    fn url(&self, endpoint: Endpoint) -> Result<Url, UploadError> {
        self.base_url
            .join(endpoint.path())
            .map_err(|e| UploadError::Internal(format!("bad endpoint URL: {e}")))
    }

    /// Submit an accepted file to the endpoint its origin and kind select.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, file: AcceptedFile) -> UploadTask {
        let endpoint = Endpoint::for_file(&file);
        self.submit_to(endpoint, file.into_candidate())
    }

    /// Submit a candidate to an explicit endpoint.
    ///
    /// Takes a [`CandidateFile`] rather than an [`AcceptedFile`] so callers
    /// can target a non-default endpoint; validation is still their job.
    pub fn submit_to(&self, endpoint: Endpoint, candidate: CandidateFile) -> UploadTask {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = watch::channel(UploadState::Uploading { progress: 0.0 });
        let state = Arc::new(tx);

        info!(
            "Upload {}: {} ({} bytes) → {}",
            id,
            candidate.name(),
            candidate.size(),
            endpoint.path()
        );

        let request = self.url(endpoint).map(|url| self.http.post(url));
        let chunk_size = self.chunk_size;
        let timeout_secs = self.timeout_secs;
        let task_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            let outcome = match request {
                Ok(request) => {
                    run_upload(request, endpoint, &candidate, chunk_size, timeout_secs, &task_state)
                        .await
                }
                Err(e) => UploadState::Failed(e),
            };
            log_outcome(id, &outcome);
            publish_terminal(&task_state, outcome);
        });
        let abort = handle.abort_handle();

        let previous = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Slot {
                id,
                state: Arc::clone(&state),
                abort: abort.clone(),
            });
        if let Some(prev) = previous {
            debug!("Upload {} supersedes upload {}", id, prev.id);
            cancel(prev.id, &prev.state, &prev.abort);
        }

        UploadTask {
            id,
            endpoint,
            state,
            rx,
            abort,
        }
    }

    /// Cancel whatever upload is live in this slot.
    pub fn cancel_current(&self) {
        let current = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(slot) = current {
            cancel(slot.id, &slot.state, &slot.abort);
        }
    }

    /// Convert free text to LaTeX through `/api/procesar_texto/`.
    pub async fn text_to_latex(&self, text: &str) -> Result<String, UploadError> {
        #[derive(Serialize)]
        struct TextRequest<'a> {
            texto: &'a str,
        }
        #[derive(Deserialize)]
        struct TextResponse {
            latex: String,
        }

        let url = self.url(Endpoint::Text)?;
        let response = self
            .http
            .post(url)
            .header(ACCEPT, "application/json")
            .json(&TextRequest { texto: text })
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout_secs))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, self.timeout_secs))?;
        if !status.is_success() {
            return Err(UploadError::Server {
                status: status.as_u16(),
                message: response::extract_message(&body),
            });
        }
        serde_json::from_slice::<TextResponse>(&body)
            .map(|r| r.latex)
            .map_err(|e| UploadError::MalformedResponse {
                detail: e.to_string(),
            })
    }
}

impl Drop for UploadManager {
    fn drop(&mut self) {
        self.cancel_current();
    }
}

async fn run_upload(
    request: RequestBuilder,
    endpoint: Endpoint,
    candidate: &CandidateFile,
    chunk_size: usize,
    timeout_secs: u64,
    state: &Arc<watch::Sender<UploadState>>,
) -> UploadState {
    let body = progress_body(candidate.payload().clone(), chunk_size, Arc::clone(state));
    let request = match endpoint.encoding().attach(request, candidate, body) {
        Ok(request) => request.header(ACCEPT, "application/json"),
        Err(e) => return UploadState::Failed(e),
    };

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => return UploadState::Failed(transport_error(e, timeout_secs)),
    };
    publish_progress(state, 1.0);

    let status = response.status().as_u16();
    match response.bytes().await {
        Ok(body) => response::classify(endpoint, status, &body),
        Err(e) => UploadState::Failed(transport_error(e, timeout_secs)),
    }
}

/// Stream `payload` in chunks, publishing the fraction handed over so far.
fn progress_body(
    payload: Bytes,
    chunk_size: usize,
    state: Arc<watch::Sender<UploadState>>,
) -> Body {
    let total = payload.len();
    let chunks: Vec<Bytes> = (0..total)
        .step_by(chunk_size)
        .map(|start| payload.slice(start..(start + chunk_size).min(total)))
        .collect();

    let mut sent = 0usize;
    let chunks = stream::iter(chunks).map(move |chunk| {
        sent += chunk.len();
        publish_progress(&state, sent as f32 / total as f32);
        Ok::<Bytes, std::io::Error>(chunk)
    });
    Body::wrap_stream(chunks)
}

fn transport_error(e: reqwest::Error, timeout_secs: u64) -> UploadError {
    let detail = if e.is_timeout() {
        format!("request timed out after {timeout_secs}s")
    } else if e.is_connect() {
        format!("could not connect: {e}")
    } else {
        e.to_string()
    };
    UploadError::Transport { detail }
}

fn log_outcome(id: u64, outcome: &UploadState) {
    match outcome {
        UploadState::Succeeded(r) => info!("Upload {}: {} formula(s)", id, r.entries.len()),
        UploadState::NoDetection { message } => info!("Upload {}: no detection ({})", id, message),
        UploadState::Failed(e) => warn!("Upload {} failed: {}", id, e),
        UploadState::Cancelled | UploadState::Uploading { .. } => {}
    }
}
