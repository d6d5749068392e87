//! Client-side validation of candidate files.
//!
//! Rules run in a fixed order and the first violation wins:
//!
//! 1. presence (non-empty payload)
//! 2. declared type against the image / document allow-lists
//! 3. byte ceiling for the declared kind
//! 4. documents only: page count within `[min_pages, max_pages]`
//!
//! Steps 1–3 never suspend. Step 4 awaits the injected [`PageCounter`].
//! Only an [`AcceptedFile`] can be handed to the
//! [`crate::upload::UploadManager`], so a rejected file can never reach the
//! network.

use crate::candidate::{CandidateFile, MediaKind, DOCUMENT_TYPES, IMAGE_TYPES};
use crate::config::ValidationLimits;
use crate::error::ValidationError;
use crate::pages::PageCounter;
use std::sync::Arc;
use tracing::debug;

/// Result of validating one candidate.
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Accepted(AcceptedFile),
    Rejected(ValidationError),
}

impl ValidationOutcome {
    /// Convert into a `Result`, for `?`-style callers.
    pub fn into_result(self) -> Result<AcceptedFile, ValidationError> {
        match self {
            ValidationOutcome::Accepted(file) => Ok(file),
            ValidationOutcome::Rejected(reason) => Err(reason),
        }
    }
}

/// A candidate that passed every rule.
///
/// Can only be constructed by the [`Validator`].
#[derive(Debug, Clone)]
pub struct AcceptedFile {
    candidate: CandidateFile,
    kind: MediaKind,
    page_count: Option<u32>,
}

impl AcceptedFile {
    pub fn candidate(&self) -> &CandidateFile {
        &self.candidate
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Page count for documents, `None` for images.
    pub fn page_count(&self) -> Option<u32> {
        self.page_count
    }

    pub fn into_candidate(self) -> CandidateFile {
        self.candidate
    }
}

/// Accepts or rejects candidate files before any network use.
#[derive(Clone)]
pub struct Validator {
    limits: ValidationLimits,
    pages: Arc<dyn PageCounter>,
}

impl Validator {
    pub fn new(limits: ValidationLimits, pages: Arc<dyn PageCounter>) -> Self {
        Self { limits, pages }
    }

    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    /// Run the synchronous rules only (presence, type, size).
    pub fn check_sync(&self, candidate: &CandidateFile) -> Result<MediaKind, ValidationError> {
        if candidate.payload().is_empty() {
            return Err(ValidationError::MissingFile);
        }

        let kind = candidate
            .kind()
            .ok_or_else(|| ValidationError::UnsupportedType {
                declared: if candidate.declared_type().is_empty() {
                    "unknown".to_string()
                } else {
                    candidate.declared_type().to_string()
                },
                allowed: IMAGE_TYPES
                    .iter()
                    .chain(DOCUMENT_TYPES)
                    .copied()
                    .collect::<Vec<_>>()
                    .join(", "),
            })?;

        let limit = match kind {
            MediaKind::Image => self.limits.image_max_bytes,
            MediaKind::Document => self.limits.document_max_bytes,
        };
        if candidate.size() > limit {
            return Err(ValidationError::FileTooLarge {
                size: candidate.size(),
                limit,
            });
        }

        Ok(kind)
    }

    /// Run every rule, including the document page count.
    pub async fn validate(&self, candidate: CandidateFile) -> ValidationOutcome {
        let kind = match self.check_sync(&candidate) {
            Ok(kind) => kind,
            Err(reason) => {
                debug!("Rejected {:?}: {}", candidate, reason.code());
                return ValidationOutcome::Rejected(reason);
            }
        };

        let page_count = match kind {
            MediaKind::Image => None,
            MediaKind::Document => {
                let pages = match self.pages.count_pages(candidate.payload().clone()).await {
                    Ok(pages) => pages,
                    Err(e) => {
                        debug!("Rejected {:?}: unreadable ({})", candidate, e);
                        return ValidationOutcome::Rejected(ValidationError::UnreadableDocument {
                            detail: e.0,
                        });
                    }
                };
                if pages < self.limits.min_pages || pages > self.limits.max_pages {
                    return ValidationOutcome::Rejected(ValidationError::PageCountOutOfRange {
                        pages,
                        min: self.limits.min_pages,
                        max: self.limits.max_pages,
                    });
                }
                Some(pages)
            }
        };

        debug!("Accepted {:?} ({} pages)", candidate, page_count.unwrap_or(0));
        ValidationOutcome::Accepted(AcceptedFile {
            candidate,
            kind,
            page_count,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::MIB;
    use crate::pages::UnreadableDocument;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fake counter: a fixed answer, plus a count of how often it was asked.
    pub(crate) struct FixedPages {
        pub answer: Result<u32, String>,
        pub calls: AtomicUsize,
    }

    impl FixedPages {
        pub fn ok(pages: u32) -> Arc<Self> {
            Arc::new(Self {
                answer: Ok(pages),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn unreadable() -> Arc<Self> {
            Arc::new(Self {
                answer: Err("not a PDF".into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PageCounter for FixedPages {
        async fn count_pages(&self, _payload: Bytes) -> Result<u32, UnreadableDocument> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone().map_err(UnreadableDocument)
        }
    }

    fn validator(pages: Arc<FixedPages>) -> Validator {
        Validator::new(ValidationLimits::default(), pages)
    }

    fn bytes_of(len: u64) -> Vec<u8> {
        vec![0u8; len as usize]
    }

    #[tokio::test]
    async fn empty_payload_is_missing() {
        let v = validator(FixedPages::ok(1));
        let c = CandidateFile::user_file("a.png", "image/png", Vec::<u8>::new());
        let out = v.validate(c).await.into_result().unwrap_err();
        assert_eq!(out, ValidationError::MissingFile);
    }

    #[tokio::test]
    async fn six_mib_image_is_too_large() {
        let v = validator(FixedPages::ok(1));
        let c = CandidateFile::user_file("big.jpg", "image/jpeg", bytes_of(6 * MIB));
        let err = v.validate(c).await.into_result().unwrap_err();
        assert_eq!(err.code(), "file_too_large");
        assert!(err.to_string().contains("exceeds 5MB"));
    }

    #[tokio::test]
    async fn exactly_five_mib_image_is_accepted() {
        let v = validator(FixedPages::ok(1));
        let c = CandidateFile::user_file("edge.png", "image/png", bytes_of(5 * MIB));
        let accepted = v.validate(c).await.into_result().unwrap();
        assert_eq!(accepted.kind(), MediaKind::Image);
        assert_eq!(accepted.page_count(), None);
    }

    #[tokio::test]
    async fn unsupported_type_is_checked_before_size() {
        let v = validator(FixedPages::ok(1));
        let c = CandidateFile::user_file("anim.gif", "image/gif", bytes_of(6 * MIB));
        let err = v.validate(c).await.into_result().unwrap_err();
        assert_eq!(err.code(), "unsupported_type");
        assert!(err.to_string().contains("image/gif"));
    }

    #[tokio::test]
    async fn images_never_reach_the_page_counter() {
        let pages = FixedPages::ok(3);
        let v = validator(pages.clone());
        let c = CandidateFile::user_file("a.webp", "image/webp", bytes_of(10));
        assert!(v.validate(c).await.into_result().is_ok());
        assert_eq!(pages.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_document_skips_page_count() {
        let pages = FixedPages::ok(3);
        let v = validator(pages.clone());
        let c = CandidateFile::user_file("huge.pdf", "application/pdf", bytes_of(51 * MIB));
        let err = v.validate(c).await.into_result().unwrap_err();
        assert_eq!(err.code(), "file_too_large");
        assert_eq!(pages.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn page_bounds_are_inclusive() {
        for (pages, ok) in [(0, false), (1, true), (50, true), (51, false)] {
            let v = validator(FixedPages::ok(pages));
            let c = CandidateFile::user_file("doc.pdf", "application/pdf", bytes_of(100));
            let out = v.validate(c).await.into_result();
            assert_eq!(out.is_ok(), ok, "pages = {pages}");
            if let Err(e) = out {
                assert_eq!(e.code(), "page_count_out_of_range");
            }
        }
    }

    #[tokio::test]
    async fn unparsable_document_is_unreadable() {
        let v = validator(FixedPages::unreadable());
        let c = CandidateFile::user_file("doc.pdf", "application/pdf", bytes_of(100));
        let err = v.validate(c).await.into_result().unwrap_err();
        assert_eq!(err.code(), "unreadable_document");
    }

    #[tokio::test]
    async fn accepted_document_carries_page_count() {
        let v = validator(FixedPages::ok(1));
        let c = CandidateFile::user_file("doc.pdf", "application/pdf", bytes_of(49 * MIB));
        let accepted = v.validate(c).await.into_result().unwrap();
        assert_eq!(accepted.kind(), MediaKind::Document);
        assert_eq!(accepted.page_count(), Some(1));
    }
}
