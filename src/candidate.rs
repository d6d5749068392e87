//! Candidate files: payloads waiting for validation.
//!
//! A [`CandidateFile`] is created when the user picks a file or a frame is
//! captured, and is immutable from then on. The payload is a cheaply
//! cloneable [`Bytes`] so the validator, the page counter and the upload
//! body can all share one buffer.

use bytes::Bytes;
use serde::Serialize;
use std::fmt;

/// Declared media types accepted as images.
pub const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp"];

/// Declared media types accepted as documents.
pub const DOCUMENT_TYPES: &[&str] = &["application/pdf"];

/// The media kind a declared type maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Document,
}

impl MediaKind {
    /// Map a declared MIME type onto an allowed kind, if any.
    pub fn from_declared(declared: &str) -> Option<Self> {
        let declared = normalise_mime(declared);
        if IMAGE_TYPES.contains(&declared.as_str()) {
            Some(MediaKind::Image)
        } else if DOCUMENT_TYPES.contains(&declared.as_str()) {
            Some(MediaKind::Document)
        } else {
            None
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => f.write_str("image"),
            MediaKind::Document => f.write_str("document"),
        }
    }
}

/// Where a candidate came from. Decides which endpoint receives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    /// A frame grabbed from the live camera.
    CameraFrame,
    /// A file the user picked.
    UserFile,
}

/// A file or frame buffer pending validation.
#[derive(Clone)]
pub struct CandidateFile {
    name: String,
    declared_type: String,
    payload: Bytes,
    source: CandidateSource,
}

impl CandidateFile {
    /// A user-selected file with its declared MIME type.
    pub fn user_file(
        name: impl Into<String>,
        declared_type: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            declared_type: normalise_mime(&declared_type.into()),
            payload: payload.into(),
            source: CandidateSource::UserFile,
        }
    }

    /// A JPEG frame captured from the camera.
    pub fn camera_frame(payload: impl Into<Bytes>) -> Self {
        Self {
            name: "frame.jpg".to_string(),
            declared_type: "image/jpeg".to_string(),
            payload: payload.into(),
            source: CandidateSource::CameraFrame,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared MIME type, lower-cased and without parameters.
    pub fn declared_type(&self) -> &str {
        &self.declared_type
    }

    /// The allowed kind this candidate declares, or `None` if its type is
    /// not on any allow-list.
    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::from_declared(&self.declared_type)
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }

    pub fn source(&self) -> CandidateSource {
        self.source
    }
}

impl fmt::Debug for CandidateFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateFile")
            .field("name", &self.name)
            .field("declared_type", &self.declared_type)
            .field("size", &self.payload.len())
            .field("source", &self.source)
            .finish()
    }
}

/// `"Image/JPEG; charset=x"` → `"image/jpeg"`.
fn normalise_mime(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
