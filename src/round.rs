//! The capture round the scheduler runs on every tick.
//!
//! capture → validate → upload → board. Validation always finishes before
//! anything is sent, and a frame whose session was released while it was
//! being grabbed is never sent at all. The outcome is applied to the board only if the camera
//! session that produced the frame is still the live one; a result for a
//! released session is logged and dropped.

use crate::board::ResultBoard;
use crate::media::MediaSource;
use crate::progress::{NoopObserver, Observer};
use crate::scheduler::CaptureRound;
use crate::upload::{UploadManager, UploadState, UploadTask};
use crate::validate::{ValidationOutcome, Validator};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// Camera-frame round wired to one upload slot and one board.
pub struct FrameRound {
    media: Arc<MediaSource>,
    validator: Validator,
    uploads: Arc<UploadManager>,
    board: Arc<ResultBoard>,
    observer: Observer,
}

impl FrameRound {
    pub fn new(
        media: Arc<MediaSource>,
        validator: Validator,
        uploads: Arc<UploadManager>,
        board: Arc<ResultBoard>,
    ) -> Self {
        Self {
            media,
            validator,
            uploads,
            board,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = observer;
        self
    }

    async fn follow(&self, task: &UploadTask) -> UploadState {
        let mut updates = task.updates();
        while let Some(state) = updates.next().await {
            match state {
                UploadState::Uploading { progress } => self.observer.on_upload_progress(progress),
                terminal => return terminal,
            }
        }
        task.outcome().await
    }
}

/// Cancels the upload if the round is dropped before it finishes.
struct CancelOnDrop<'a>(&'a UploadTask);

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[async_trait]
impl CaptureRound for FrameRound {
    async fn run(&self, generation: u64) {
        let candidate = match self.media.capture_frame().await {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!("Capture failed (session {}): {}", generation, e);
                self.observer.on_capture_error(generation, &e);
                return;
            }
        };

        let accepted = match self.validator.validate(candidate).await {
            ValidationOutcome::Accepted(file) => file,
            ValidationOutcome::Rejected(reason) => {
                debug!("Frame rejected: {}", reason);
                if self.media.is_current(generation) {
                    self.board.reject(&reason);
                }
                self.observer.on_rejected(Some(generation), &reason);
                return;
            }
        };

        if !self.media.is_current(generation) {
            debug!("Session {} ended during capture; frame not uploaded", generation);
            return;
        }

        let task = self.uploads.submit(accepted);
        let _cancel = CancelOnDrop(&task);
        let outcome = self.follow(&task).await;

        if self.media.is_current(generation) {
            self.board.apply(&outcome);
            self.observer.on_upload_outcome(Some(generation), &outcome);
        } else {
            warn!(
                "Discarding upload {} result: session {} has ended",
                task.id(),
                generation
            );
            self.observer.on_stale_result(generation);
        }
    }
}
