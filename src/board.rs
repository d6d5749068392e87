//! The display slot results land in.
//!
//! A new success replaces what is shown. A soft failure (`NoDetection`) and
//! a hard failure both leave the previously shown results in place and only
//! set a notice next to them. Cancelled uploads change nothing.

use crate::error::ValidationError;
use crate::presenter::{DisplayEntry, ResultPresenter};
use crate::response::ProcessingResult;
use crate::upload::UploadState;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Severity of the notice shown alongside the results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    /// Something worth knowing, not a failure (e.g. nothing detected).
    Info,
    /// The action failed; the user may retry.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

/// What the slot currently shows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoardSnapshot {
    /// Last successful result, if any.
    pub result: Option<ProcessingResult>,
    pub notice: Option<Notice>,
}

impl BoardSnapshot {
    pub fn entries(&self) -> Vec<DisplayEntry> {
        self.result
            .as_ref()
            .map(ResultPresenter::present_one)
            .unwrap_or_default()
    }
}

/// Thread-safe display slot.
#[derive(Debug, Default)]
pub struct ResultBoard {
    inner: Mutex<BoardSnapshot>,
}

impl ResultBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a terminal upload outcome. Non-terminal states are ignored.
    pub fn apply(&self, state: &UploadState) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match state {
            UploadState::Succeeded(result) => {
                inner.result = Some(result.clone());
                inner.notice = result.message.clone().map(|text| Notice {
                    level: NoticeLevel::Info,
                    text,
                });
            }
            UploadState::NoDetection { message } => {
                inner.notice = Some(Notice {
                    level: NoticeLevel::Info,
                    text: message.clone(),
                });
            }
            UploadState::Failed(e) => {
                inner.notice = Some(Notice {
                    level: NoticeLevel::Error,
                    text: e.user_message(),
                });
            }
            UploadState::Cancelled | UploadState::Uploading { .. } => {
                debug!("Board ignores non-final state {:?}", state);
            }
        }
    }

    /// Show a validation rejection. Results stay.
    pub fn reject(&self, error: &ValidationError) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.notice = Some(Notice {
            level: NoticeLevel::Error,
            text: error.to_string(),
        });
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
