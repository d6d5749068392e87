//! Page counting for documents.
//!
//! The [`crate::validate::Validator`] never talks to a PDF library
//! directly; it is handed a [`PageCounter`]. Production code uses
//! [`PdfiumPageCounter`]; tests inject a fake.
//!
//! ## Scoped open/release
//!
//! `count_pages` opens the document, reads the page count and drops the
//! document before returning, on the success path and on the parse-failure
//! path alike. No document handle ever escapes the call.

use crate::error::ClientError;
use async_trait::async_trait;
use bytes::Bytes;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// The payload could not be opened as a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct UnreadableDocument(pub String);

/// Opens a document payload and reports how many pages it has.
#[async_trait]
pub trait PageCounter: Send + Sync {
    async fn count_pages(&self, payload: Bytes) -> Result<u32, UnreadableDocument>;
}

/// Page counter backed by the pdfium library.
///
/// Binding happens once in [`PdfiumPageCounter::new`] to fail fast when the
/// library is missing; each count rebinds on a blocking thread because
/// pdfium keeps thread-local state.
#[derive(Debug, Clone)]
pub struct PdfiumPageCounter {
    library_path: Option<PathBuf>,
}

impl PdfiumPageCounter {
    /// Bind to pdfium, preferring `library_path`, then `PDFIUM_LIB_PATH`,
    /// then the system library.
    pub fn new(library_path: Option<PathBuf>) -> Result<Self, ClientError> {
        let library_path =
            library_path.or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));
        bind(library_path.as_ref()).map_err(ClientError::PdfiumBindingFailed)?;
        Ok(Self { library_path })
    }
}

#[async_trait]
impl PageCounter for PdfiumPageCounter {
    async fn count_pages(&self, payload: Bytes) -> Result<u32, UnreadableDocument> {
        let library_path = self.library_path.clone();
        tokio::task::spawn_blocking(move || count_blocking(library_path.as_ref(), &payload))
            .await
            .map_err(|e| UnreadableDocument(format!("page count task panicked: {e}")))?
    }
}

/// Counter for pipelines that only ever see images (camera frames).
/// Every document is unreadable to it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDocumentSupport;

#[async_trait]
impl PageCounter for NoDocumentSupport {
    async fn count_pages(&self, _payload: Bytes) -> Result<u32, UnreadableDocument> {
        Err(UnreadableDocument("document support is not loaded".into()))
    }
}

fn bind(library_path: Option<&PathBuf>) -> Result<Pdfium, String> {
    let bindings = match library_path {
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| format!("{e:?}"))?;
    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of page counting.
fn count_blocking(library_path: Option<&PathBuf>, payload: &[u8]) -> Result<u32, UnreadableDocument> {
    let pdfium = bind(library_path).map_err(UnreadableDocument)?;

    let pages = {
        let document = pdfium
            .load_pdf_from_byte_slice(payload, None)
            .map_err(|e| UnreadableDocument(format!("{e:?}")))?;
        document.pages().len() as u32
        // `document` is released here
    };

    debug!("Counted {} pages in {} byte document", pages, payload.len());
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Needs a real libpdfium; run with PDFIUM_TESTS=1.
    #[tokio::test]
    async fn pdfium_rejects_garbage() {
        if std::env::var("PDFIUM_TESTS").is_err() {
            println!("SKIP — set PDFIUM_TESTS=1 to run pdfium tests");
            return;
        }
        let counter = PdfiumPageCounter::new(None).expect("pdfium should bind");
        let result = counter
            .count_pages(Bytes::from_static(b"definitely not a pdf"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn images_only_counter_refuses_documents() {
        let err = NoDocumentSupport
            .count_pages(Bytes::from_static(b"%PDF-1.7"))
            .await
            .unwrap_err();
        assert!(err.0.contains("not loaded"));
    }

    #[test]
    fn unreadable_document_displays_detail() {
        let e = UnreadableDocument("bad xref".into());
        assert_eq!(e.to_string(), "bad xref");
    }
}
