//! In-process fake of the detection service, shared by the integration tests.
//!
//! Binds `127.0.0.1:0`, records every request (path, content type, cookie,
//! body) and answers with whatever the test's reply function returns.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use formula_capture::{
    AcceptedFile, CandidateFile, ClientConfig, PageCounter, UnreadableDocument, ValidationLimits,
    Validator,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Route library logs through the test harness. `RUST_LOG` picks the level;
/// nothing is printed by default.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off")),
        )
        .with_test_writer()
        .try_init();
}

/// One request as the service saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub content_type: Option<String>,
    pub cookie: Option<String>,
    pub body: Bytes,
}

impl Recorded {
    pub fn body_contains(&self, needle: &str) -> bool {
        self.body
            .windows(needle.len())
            .any(|w| w == needle.as_bytes())
    }
}

/// What the fake answers.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
    pub delay: Option<Duration>,
}

impl Reply {
    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string(),
            delay: None,
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type ReplyFn = dyn Fn(&Recorded, usize) -> Reply + Send + Sync;

struct Inner {
    requests: Mutex<Vec<Recorded>>,
    reply: Box<ReplyFn>,
}

pub struct FakeService {
    pub base_url: String,
    inner: Arc<Inner>,
}

impl FakeService {
    /// Start a fake whose reply depends on the request and its 0-based index.
    pub async fn start(
        reply: impl Fn(&Recorded, usize) -> Reply + Send + Sync + 'static,
    ) -> Self {
        init_logging();
        let inner = Arc::new(Inner {
            requests: Mutex::new(Vec::new()),
            reply: Box::new(reply),
        });
        let app = Router::new()
            .fallback(handle)
            .layer(DefaultBodyLimit::disable())
            .with_state(Arc::clone(&inner));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            inner,
        }
    }

    /// A fake that answers every request the same way.
    pub async fn always(reply: Reply) -> Self {
        Self::start(move |_, _| reply.clone()).await
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.inner.requests.lock().unwrap().clone()
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::builder()
            .base_url(self.base_url.clone())
            .request_timeout_secs(10)
            .build()
            .unwrap()
    }
}

async fn handle(
    State(inner): State<Arc<Inner>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_str = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let recorded = Recorded {
        path: uri.path().to_string(),
        content_type: header_str(header::CONTENT_TYPE),
        cookie: header_str(header::COOKIE),
        body,
    };
    let index = {
        let mut requests = inner.requests.lock().unwrap();
        requests.push(recorded.clone());
        requests.len() - 1
    };

    let reply = (inner.reply)(&recorded, index);
    if let Some(delay) = reply.delay {
        tokio::time::sleep(delay).await;
    }
    (
        StatusCode::from_u16(reply.status).unwrap(),
        [(header::CONTENT_TYPE, reply.content_type)],
        reply.body,
    )
        .into_response()
}

// ── Page counters ────────────────────────────────────────────────────────────

/// Fixed page count, or unreadable.
pub struct FakePages(pub Result<u32, &'static str>);

#[async_trait]
impl PageCounter for FakePages {
    async fn count_pages(&self, _payload: bytes::Bytes) -> Result<u32, UnreadableDocument> {
        self.0.map_err(|e| UnreadableDocument(e.to_string()))
    }
}

/// Page counter argument for `detect_file_with`.
pub fn pages(answer: Result<u32, &'static str>) -> Option<Arc<dyn PageCounter>> {
    Some(Arc::new(FakePages(answer)))
}

/// Run the validator and unwrap the accepted file.
pub async fn accept(candidate: CandidateFile, pages: u32) -> AcceptedFile {
    Validator::new(ValidationLimits::default(), Arc::new(FakePages(Ok(pages))))
        .validate(candidate)
        .await
        .into_result()
        .expect("candidate should be accepted")
}

pub fn frame_success(formula: &str) -> Reply {
    Reply::json(
        200,
        serde_json::json!({
            "message": "Fórmula detectada",
            "formula": formula,
            "tipo": "algebra",
            "latex_image": "iVBORw0KGgo=",
        }),
    )
}
