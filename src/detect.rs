//! One-shot entry points for the user-file flow.
//!
//! [`detect_file`] is the whole pipeline for a file on disk: load, validate,
//! upload, present. It waits for the terminal outcome and returns it; use
//! [`crate::upload::UploadManager`] directly for fire-and-follow uploads.
//!
//! A soft failure (nothing recognised) is an `Ok` with
//! [`DetectionOutcome::NoDetection`], not an error.

use crate::candidate::MediaKind;
use crate::config::ClientConfig;
use crate::error::{ClientError, UploadError, ValidationError};
use crate::input;
use crate::pages::{NoDocumentSupport, PageCounter, PdfiumPageCounter};
use crate::presenter::{DisplayEntry, ResultPresenter};
use crate::progress::{NoopObserver, Observer};
use crate::upload::{UploadManager, UploadState};
use crate::validate::{AcceptedFile, Validator};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionOutcome {
    Detected,
    NoDetection,
}

/// Result of [`detect_file`].
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub file: String,
    pub kind: MediaKind,
    /// Page count, for documents.
    pub page_count: Option<u32>,
    pub outcome: DetectionOutcome,
    /// The service's status line (or the no-detection message).
    pub message: Option<String>,
    pub entries: Vec<DisplayEntry>,
}

/// Result of [`inspect_file`]: what validation saw, no network involved.
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub file: String,
    pub declared_type: String,
    pub size: u64,
    pub kind: MediaKind,
    pub page_count: Option<u32>,
}

fn page_counter_for(
    kind: Option<MediaKind>,
    config: &ClientConfig,
) -> Result<Arc<dyn PageCounter>, ClientError> {
    match kind {
        Some(MediaKind::Document) => Ok(Arc::new(PdfiumPageCounter::new(
            config.pdfium_library_path.clone(),
        )?)),
        _ => Ok(Arc::new(NoDocumentSupport)),
    }
}

async fn load_and_validate(
    path: &Path,
    config: &ClientConfig,
    pages: Option<Arc<dyn PageCounter>>,
    observer: &Observer,
) -> Result<AcceptedFile, ClientError> {
    let reject = |reason: ValidationError| {
        observer.on_rejected(None, &reason);
        ClientError::Rejected(reason)
    };
    let candidate = input::load_candidate(path).await?;
    let pages = match pages {
        Some(pages) => pages,
        None => {
            // pdfium is bound only for a document that passes the synchronous rules.
            let kind = Validator::new(config.limits, Arc::new(NoDocumentSupport))
                .check_sync(&candidate)
                .map_err(reject)?;
            page_counter_for(Some(kind), config)?
        }
    };
    Validator::new(config.limits, pages)
        .validate(candidate)
        .await
        .into_result()
        .map_err(reject)
}

/// Validate, upload and present one local file.
pub async fn detect_file(
    path: impl AsRef<Path>,
    config: &ClientConfig,
) -> Result<Detection, ClientError> {
    detect_file_inner(path.as_ref(), config, None, Arc::new(NoopObserver)).await
}

/// [`detect_file`] with an observer and, optionally, an explicit page
/// counter (pdfium is bound on demand otherwise).
pub async fn detect_file_with(
    path: impl AsRef<Path>,
    config: &ClientConfig,
    pages: Option<Arc<dyn PageCounter>>,
    observer: Observer,
) -> Result<Detection, ClientError> {
    detect_file_inner(path.as_ref(), config, pages, observer).await
}

async fn detect_file_inner(
    path: &Path,
    config: &ClientConfig,
    pages: Option<Arc<dyn PageCounter>>,
    observer: Observer,
) -> Result<Detection, ClientError> {
    let accepted = load_and_validate(path, config, pages, &observer).await?;
    let file = accepted.candidate().name().to_string();
    let kind = accepted.kind();
    let page_count = accepted.page_count();
    info!(
        "Submitting {} ({}{})",
        file,
        kind,
        page_count.map(|p| format!(", {p} pages")).unwrap_or_default()
    );

    let uploads = UploadManager::new(config)?;
    let task = uploads.submit(accepted);
    let mut updates = task.updates();
    let mut outcome = None;
    while let Some(state) = updates.next().await {
        match state {
            UploadState::Uploading { progress } => observer.on_upload_progress(progress),
            terminal => {
                outcome = Some(terminal);
                break;
            }
        }
    }
    let outcome = match outcome {
        Some(state) => state,
        None => task.outcome().await,
    };
    observer.on_upload_outcome(None, &outcome);

    let (outcome, message, entries) = match outcome {
        UploadState::Succeeded(result) => (
            DetectionOutcome::Detected,
            result.message.clone(),
            ResultPresenter::present_one(&result),
        ),
        UploadState::NoDetection { message } => {
            (DetectionOutcome::NoDetection, Some(message), Vec::new())
        }
        UploadState::Failed(e) => return Err(e.into()),
        UploadState::Cancelled | UploadState::Uploading { .. } => {
            return Err(UploadError::Internal("upload was cancelled".into()).into())
        }
    };

    Ok(Detection {
        file,
        kind,
        page_count,
        outcome,
        message,
        entries,
    })
}

/// Synchronous wrapper around [`detect_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn detect_file_sync(
    path: impl AsRef<Path>,
    config: &ClientConfig,
) -> Result<Detection, ClientError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ClientError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(detect_file(path, config))
}

/// Run every validation rule on a local file without uploading it.
pub async fn inspect_file(
    path: impl AsRef<Path>,
    config: &ClientConfig,
) -> Result<Inspection, ClientError> {
    let observer: Observer = Arc::new(NoopObserver);
    let accepted = load_and_validate(path.as_ref(), config, None, &observer).await?;
    Ok(inspection_of(&accepted))
}

/// [`inspect_file`] with an explicit page counter.
pub async fn inspect_file_with(
    path: impl AsRef<Path>,
    config: &ClientConfig,
    pages: Arc<dyn PageCounter>,
) -> Result<Inspection, ClientError> {
    let observer: Observer = Arc::new(NoopObserver);
    let accepted = load_and_validate(path.as_ref(), config, Some(pages), &observer).await?;
    Ok(inspection_of(&accepted))
}

fn inspection_of(accepted: &AcceptedFile) -> Inspection {
    let candidate = accepted.candidate();
    Inspection {
        file: candidate.name().to_string(),
        declared_type: candidate.declared_type().to_string(),
        size: candidate.size(),
        kind: accepted.kind(),
        page_count: accepted.page_count(),
    }
}

/// Convert free text into LaTeX via the service.
pub async fn text_to_latex(text: &str, config: &ClientConfig) -> Result<String, ClientError> {
    if text.trim().is_empty() {
        return Err(ClientError::InvalidConfig("text must not be empty".into()));
    }
    let uploads = UploadManager::new(config)?;
    Ok(uploads.text_to_latex(text).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::tests::FixedPages;

    #[tokio::test]
    async fn oversized_image_is_rejected_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.png");
        std::fs::write(&path, vec![0u8; 6 * 1024 * 1024]).unwrap();
        // Nothing listens here; a request would fail with Transport, not Rejected.
        let config = ClientConfig::builder()
            .base_url("http://127.0.0.1:9")
            .build()
            .unwrap();

        let err = detect_file(&path, &config).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Rejected(ValidationError::FileTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn document_size_rules_run_before_pdfium_is_bound() {
        let dir = tempfile::tempdir().unwrap();
        let huge = dir.path().join("huge.pdf");
        std::fs::write(&huge, vec![b' '; 51 * 1024 * 1024]).unwrap();
        let empty = dir.path().join("empty.pdf");
        std::fs::write(&empty, b"").unwrap();
        // An unloadable library path: binding would fail if it were attempted.
        let config = ClientConfig::builder()
            .base_url("http://127.0.0.1:9")
            .pdfium_library_path(dir.path().join("no-libpdfium.so"))
            .build()
            .unwrap();

        let err = inspect_file(&huge, &config).await.unwrap_err();
        assert!(
            matches!(err, ClientError::Rejected(ValidationError::FileTooLarge { .. })),
            "{err:?}"
        );
        let err = detect_file(&empty, &config).await.unwrap_err();
        assert!(
            matches!(err, ClientError::Rejected(ValidationError::MissingFile)),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn inspect_reports_page_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, b"%PDF-1.7 fake").unwrap();
        let config = ClientConfig::default();

        let report = inspect_file_with(&path, &config, FixedPages::ok(3))
            .await
            .unwrap();
        assert_eq!(report.kind, MediaKind::Document);
        assert_eq!(report.page_count, Some(3));
        assert_eq!(report.declared_type, "application/pdf");
    }

    #[tokio::test]
    async fn inspect_rejects_too_many_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.pdf");
        std::fs::write(&path, b"%PDF-1.7 fake").unwrap();

        let err = inspect_file_with(&path, &ClientConfig::default(), FixedPages::ok(51))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Rejected(ValidationError::PageCountOutOfRange { pages: 51, .. })
        ));
    }

    #[tokio::test]
    async fn empty_text_is_refused_locally() {
        let err = text_to_latex("   ", &ClientConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(_)));
    }
}
