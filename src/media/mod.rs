//! Camera acquisition and release.
//!
//! [`MediaSource`] owns at most one [`CaptureSession`] at a time and walks
//! it through
//!
//! ```text
//! Idle ──acquire()──▶ Acquiring ──ok──▶ Streaming ──release()──▶ Stopped
//!                        │                  │
//!                        └──fail──▶ Error ◀─┘ (frame grab failed)
//! ```
//!
//! `Stopped` and `Error` are terminal for that session; a fresh
//! `acquire()` starts a new one with a new generation number. The
//! generation lets consumers recognise results that belong to a session
//! which has since been released.
//!
//! The physical device sits behind [`CameraDevice`] / [`VideoStream`] so the
//! state machine does not care whether frames come from a webcam, a
//! capture card or [`still::StillCamera`].

pub mod still;

use crate::candidate::CandidateFile;
use crate::config::ClientConfig;
use crate::encode;
use crate::error::AcquisitionError;
use async_trait::async_trait;
use image::DynamicImage;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

pub use still::StillCamera;

/// Resolution requested from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
}

/// A camera that can be asked for a live stream.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    /// Engage the device at (or near) the requested resolution.
    async fn open(
        &self,
        constraints: VideoConstraints,
    ) -> Result<Arc<dyn VideoStream>, AcquisitionError>;
}

/// A live stream obtained from a [`CameraDevice`].
#[async_trait]
pub trait VideoStream: Send + Sync {
    /// Start delivering frames.
    async fn play(&self) -> Result<(), AcquisitionError>;

    /// Grab the current frame.
    async fn grab_frame(&self) -> Result<DynamicImage, AcquisitionError>;

    /// Stop every track of the stream. Must be idempotent.
    fn stop_tracks(&self);

    /// Number of tracks still live.
    fn live_tracks(&self) -> usize;
}

/// One camera lifecycle: the stream plus the generation it was acquired in.
#[derive(Clone)]
pub struct CaptureSession {
    generation: u64,
    stream: Arc<dyn VideoStream>,
}

impl CaptureSession {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSession")
            .field("generation", &self.generation)
            .field("live_tracks", &self.stream.live_tracks())
            .finish()
    }
}

enum MediaState {
    Idle,
    Acquiring { generation: u64 },
    Streaming(CaptureSession),
    Stopped,
    Error(AcquisitionError),
}

/// Published view of the media state, without the stream handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaStatus {
    Idle,
    Acquiring,
    Streaming { generation: u64 },
    Stopped,
    Error(AcquisitionError),
}

struct Inner {
    state: MediaState,
    last_generation: u64,
}

/// Acquires and releases the camera, and grabs frames from it.
pub struct MediaSource {
    device: Arc<dyn CameraDevice>,
    constraints: VideoConstraints,
    jpeg_quality: u8,
    inner: Mutex<Inner>,
}

impl MediaSource {
    pub fn new(device: Arc<dyn CameraDevice>, config: &ClientConfig) -> Self {
        Self {
            device,
            constraints: VideoConstraints {
                width: config.frame_width,
                height: config.frame_height,
            },
            jpeg_quality: config.jpeg_quality,
            inner: Mutex::new(Inner {
                state: MediaState::Idle,
                last_generation: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> MediaStatus {
        match &self.lock().state {
            MediaState::Idle => MediaStatus::Idle,
            MediaState::Acquiring { .. } => MediaStatus::Acquiring,
            MediaState::Streaming(s) => MediaStatus::Streaming {
                generation: s.generation,
            },
            MediaState::Stopped => MediaStatus::Stopped,
            MediaState::Error(e) => MediaStatus::Error(e.clone()),
        }
    }

    /// Generation of the live session, if streaming.
    pub fn current_generation(&self) -> Option<u64> {
        match &self.lock().state {
            MediaState::Streaming(s) => Some(s.generation),
            _ => None,
        }
    }

    /// True while `generation` is the live session.
    pub fn is_current(&self, generation: u64) -> bool {
        self.current_generation() == Some(generation)
    }

    /// Request the camera and start playback.
    ///
    /// Returns the new session's generation. Calling it while already
    /// streaming keeps the live session and returns its generation.
    pub async fn acquire(&self) -> Result<u64, AcquisitionError> {
        let generation = {
            let mut inner = self.lock();
            match &inner.state {
                MediaState::Streaming(s) => {
                    debug!("acquire() while streaming; keeping session {}", s.generation);
                    return Ok(s.generation);
                }
                MediaState::Acquiring { .. } => {
                    return Err(AcquisitionError::DeviceUnavailable {
                        detail: "camera acquisition already in progress".into(),
                    });
                }
                _ => {}
            }
            inner.last_generation += 1;
            let generation = inner.last_generation;
            inner.state = MediaState::Acquiring { generation };
            generation
        };
        info!(
            "Acquiring camera at {}x{} (session {})",
            self.constraints.width, self.constraints.height, generation
        );

        let mut pending = PendingAcquisition {
            media: self,
            generation,
            stream: None,
            settled: false,
        };

        let stream = match self.device.open(self.constraints).await {
            Ok(stream) => stream,
            Err(e) => return Err(pending.fail(e)),
        };
        pending.stream = Some(Arc::clone(&stream));

        if let Err(e) = stream.play().await {
            return Err(pending.fail(e));
        }
        pending.finish()
    }

    /// Stop every track and detach the stream. No-op without a live stream.
    pub fn release(&self) {
        let mut inner = self.lock();
        match std::mem::replace(&mut inner.state, MediaState::Stopped) {
            MediaState::Streaming(session) => {
                session.stream.stop_tracks();
                info!("Camera released (session {})", session.generation);
            }
            MediaState::Acquiring { generation } => {
                debug!("Camera released while acquiring session {}", generation);
            }
            previous @ (MediaState::Idle | MediaState::Stopped | MediaState::Error(_)) => {
                inner.state = previous;
            }
        }
    }

    /// Grab a frame from the live session and encode it as a JPEG candidate.
    ///
    /// A failed grab moves the session to `Error` and stops its tracks.
    pub async fn capture_frame(&self) -> Result<CandidateFile, AcquisitionError> {
        let session = match &self.lock().state {
            MediaState::Streaming(s) => s.clone(),
            _ => {
                return Err(AcquisitionError::DeviceUnavailable {
                    detail: "camera is not streaming".into(),
                })
            }
        };

        let frame = match session.stream.grab_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                let mut inner = self.lock();
                if matches!(&inner.state, MediaState::Streaming(s) if s.generation == session.generation)
                {
                    session.stream.stop_tracks();
                    warn!("Frame grab failed, session {} ended: {}", session.generation, e);
                    inner.state = MediaState::Error(e.clone());
                }
                return Err(e);
            }
        };

        let (width, height, quality) = (
            self.constraints.width,
            self.constraints.height,
            self.jpeg_quality,
        );
        let jpeg = tokio::task::spawn_blocking(move || {
            encode::encode_frame(&frame, width, height, quality)
        })
        .await
        .map_err(|e| AcquisitionError::DeviceUnavailable {
            detail: format!("frame encode task panicked: {e}"),
        })?
        .map_err(|e| AcquisitionError::DeviceUnavailable {
            detail: format!("frame could not be encoded: {e}"),
        })?;

        Ok(CandidateFile::camera_frame(jpeg))
    }
}

/// An `acquire()` in progress. Settles the `Acquiring` state on every exit,
/// including the acquiring future being dropped mid-way.
struct PendingAcquisition<'a> {
    media: &'a MediaSource,
    generation: u64,
    stream: Option<Arc<dyn VideoStream>>,
    settled: bool,
}

impl PendingAcquisition<'_> {
    fn is_ours(&self, state: &MediaState) -> bool {
        matches!(state, MediaState::Acquiring { generation } if *generation == self.generation)
    }

    fn fail(mut self, error: AcquisitionError) -> AcquisitionError {
        self.settled = true;
        if let Some(stream) = self.stream.take() {
            stream.stop_tracks();
        }
        let mut inner = self.media.lock();
        if self.is_ours(&inner.state) {
            warn!("Camera acquisition failed: {}", error);
            inner.state = MediaState::Error(error.clone());
        }
        error
    }

    fn finish(mut self) -> Result<u64, AcquisitionError> {
        self.settled = true;
        let Some(stream) = self.stream.take() else {
            return Err(AcquisitionError::PlaybackStartFailed {
                detail: "no stream was opened".into(),
            });
        };
        let mut inner = self.media.lock();
        if self.is_ours(&inner.state) {
            inner.state = MediaState::Streaming(CaptureSession {
                generation: self.generation,
                stream,
            });
            info!("Camera streaming (session {})", self.generation);
            Ok(self.generation)
        } else {
            // release() ran while we were waiting on the device.
            stream.stop_tracks();
            debug!("Session {} released during acquisition", self.generation);
            Err(AcquisitionError::Released)
        }
    }
}

impl Drop for PendingAcquisition<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(stream) = self.stream.take() {
            stream.stop_tracks();
        }
        let mut inner = self.media.lock();
        if self.is_ours(&inner.state) {
            debug!("Acquisition of session {} abandoned", self.generation);
            inner.state = MediaState::Idle;
        }
    }
}

impl Drop for MediaSource {
    fn drop(&mut self) {
        self.release();
    }
}
