//! Observer trait for capture-round and upload events.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] into a
//! [`crate::round::FrameRound`] or [`crate::detect::detect_file_with`] to
//! receive events as frames are captured, validated and uploaded. The
//! library does not care where the events go: a terminal progress bar, a
//! log line, a channel.
//!
//! # Example
//!
//! ```rust
//! use formula_capture::{PipelineObserver, UploadState};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountSuccesses(AtomicUsize);
//!
//! impl PipelineObserver for CountSuccesses {
//!     fn on_upload_outcome(&self, _generation: Option<u64>, state: &UploadState) {
//!         if matches!(state, UploadState::Succeeded(_)) {
//!             self.0.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//! ```

use crate::error::{AcquisitionError, ValidationError};
use crate::upload::UploadState;
use std::sync::Arc;

/// Called as the capture/upload pipeline makes progress.
///
/// All methods have default no-op implementations. Calls may arrive from
/// any runtime worker thread. `generation` is the camera session a frame
/// belongs to, or `None` for user files.
pub trait PipelineObserver: Send + Sync {
    /// A capture round started.
    fn on_round_start(&self, generation: u64) {
        let _ = generation;
    }

    /// A tick fired while the previous round was still in flight.
    fn on_round_skipped(&self, generation: u64) {
        let _ = generation;
    }

    /// Grabbing a frame failed; the session has ended.
    fn on_capture_error(&self, generation: u64, error: &AcquisitionError) {
        let _ = (generation, error);
    }

    /// A candidate was rejected before any network traffic.
    fn on_rejected(&self, generation: Option<u64>, error: &ValidationError) {
        let _ = (generation, error);
    }

    /// Upload progress in `[0, 1]`, non-decreasing per upload.
    fn on_upload_progress(&self, progress: f32) {
        let _ = progress;
    }

    /// An upload reached a terminal state.
    fn on_upload_outcome(&self, generation: Option<u64>, state: &UploadState) {
        let _ = (generation, state);
    }

    /// A result arrived for a session that has since been released and was
    /// discarded.
    fn on_stale_result(&self, generation: u64) {
        let _ = generation;
    }
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Shared observer handle.
pub type Observer = Arc<dyn PipelineObserver>;
