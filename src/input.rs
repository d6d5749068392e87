//! Loading a user-selected local file into a [`CandidateFile`].
//!
//! The declared type comes from the file extension, the same way a file
//! picker declares it. Content is not sniffed: a `.png` that is really a
//! text file is declared `image/png`, and a file with no known extension is
//! declared `application/octet-stream` and will be rejected by validation.

use crate::candidate::CandidateFile;
use crate::error::ClientError;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

/// Declared type for files whose extension is unknown.
pub const UNKNOWN_TYPE: &str = "application/octet-stream";

/// Read `path` and declare its type from the extension.
pub async fn load_candidate(path: impl AsRef<Path>) -> Result<CandidateFile, ClientError> {
    let path = path.as_ref();
    let declared = mime_guess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| UNKNOWN_TYPE.to_string());
    load_candidate_as(path, declared).await
}

/// Read `path` with an explicit declared type.
pub async fn load_candidate_as(
    path: impl AsRef<Path>,
    declared_type: impl Into<String>,
) -> Result<CandidateFile, ClientError> {
    let path = path.as_ref();
    let payload = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => ClientError::FileNotFound {
            path: path.to_path_buf(),
        },
        ErrorKind::PermissionDenied => ClientError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ClientError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let candidate = CandidateFile::user_file(name, declared_type, payload);
    debug!(
        "Loaded {} ({}, {} bytes)",
        path.display(),
        candidate.declared_type(),
        candidate.size()
    );
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{CandidateSource, MediaKind};

    #[tokio::test]
    async fn declares_type_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.PDF");
        std::fs::write(&path, b"%PDF-1.7").unwrap();

        let c = load_candidate(&path).await.unwrap();
        assert_eq!(c.name(), "scan.PDF");
        assert_eq!(c.declared_type(), "application/pdf");
        assert_eq!(c.kind(), Some(MediaKind::Document));
        assert_eq!(c.source(), CandidateSource::UserFile);
        assert_eq!(c.size(), 8);
    }

    #[tokio::test]
    async fn unknown_extension_is_octet_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.zzz");
        std::fs::write(&path, b"x").unwrap();
        let c = load_candidate(&path).await.unwrap();
        assert_eq!(c.declared_type(), UNKNOWN_TYPE);
        assert_eq!(c.kind(), None);
    }

    #[tokio::test]
    async fn missing_file_is_file_not_found() {
        let err = load_candidate("/no/such/file.png").await.unwrap_err();
        assert!(matches!(err, ClientError::FileNotFound { .. }));
    }
}
