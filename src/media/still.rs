//! A camera that replays still images from disk.
//!
//! Points at one image file or a directory of them and hands out the files
//! in name order, looping. Useful for the `watch` CLI command on machines
//! without a webcam, and for demos against a live detection service.

use super::{CameraDevice, VideoConstraints, VideoStream};
use crate::candidate::IMAGE_TYPES;
use crate::encode;
use crate::error::AcquisitionError;
use async_trait::async_trait;
use image::DynamicImage;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Device backed by image files.
#[derive(Debug, Clone)]
pub struct StillCamera {
    source: PathBuf,
}

impl StillCamera {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

#[async_trait]
impl CameraDevice for StillCamera {
    async fn open(
        &self,
        constraints: VideoConstraints,
    ) -> Result<Arc<dyn VideoStream>, AcquisitionError> {
        let frames = list_frames(&self.source).await?;
        info!(
            "Still camera opened on {} ({} frames, requested {}x{})",
            self.source.display(),
            frames.len(),
            constraints.width,
            constraints.height
        );
        Ok(Arc::new(StillStream {
            frames,
            cursor: AtomicUsize::new(0),
            live: AtomicBool::new(true),
        }))
    }
}

struct StillStream {
    frames: Vec<PathBuf>,
    cursor: AtomicUsize,
    live: AtomicBool,
}

#[async_trait]
impl VideoStream for StillStream {
    async fn play(&self) -> Result<(), AcquisitionError> {
        if self.frames.is_empty() {
            return Err(AcquisitionError::PlaybackStartFailed {
                detail: "no image files to replay".into(),
            });
        }
        Ok(())
    }

    async fn grab_frame(&self) -> Result<DynamicImage, AcquisitionError> {
        if !self.live.load(Ordering::SeqCst) {
            return Err(AcquisitionError::DeviceUnavailable {
                detail: "stream was stopped".into(),
            });
        }
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst) % self.frames.len();
        let path = self.frames[idx].clone();
        debug!("Still camera frame {} ← {}", idx, path.display());

        let bytes = tokio::fs::read(&path).await.map_err(|e| io_error(&path, e))?;
        tokio::task::spawn_blocking(move || encode::decode_image(&bytes))
            .await
            .map_err(|e| AcquisitionError::DeviceUnavailable {
                detail: format!("frame decode task panicked: {e}"),
            })?
            .map_err(|e| AcquisitionError::DeviceUnavailable {
                detail: format!("{}: {}", path.display(), e),
            })
    }

    fn stop_tracks(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn live_tracks(&self) -> usize {
        usize::from(self.live.load(Ordering::SeqCst))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> AcquisitionError {
    match e.kind() {
        ErrorKind::PermissionDenied => AcquisitionError::PermissionDenied {
            detail: path.display().to_string(),
        },
        _ => AcquisitionError::DeviceUnavailable {
            detail: format!("{}: {}", path.display(), e),
        },
    }
}

fn is_image(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first()
        .is_some_and(|m| IMAGE_TYPES.contains(&m.essence_str()))
}

async fn list_frames(source: &Path) -> Result<Vec<PathBuf>, AcquisitionError> {
    let meta = tokio::fs::metadata(source)
        .await
        .map_err(|e| io_error(source, e))?;

    if meta.is_file() {
        return Ok(vec![source.to_path_buf()]);
    }

    let mut entries = tokio::fs::read_dir(source)
        .await
        .map_err(|e| io_error(source, e))?;
    let mut frames = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error(source, e))?
    {
        let path = entry.path();
        if is_image(&path) {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}
