//! Wire types for the detection service and response classification.
//!
//! Classification is driven by the HTTP status first and the body second:
//!
//! | Status | Outcome |
//! |--------|---------|
//! | 2xx, body matches the endpoint contract | `Succeeded` |
//! | 2xx, body does not parse | `Failed(MalformedResponse)` |
//! | 404 | `NoDetection` (soft: valid input, nothing recognised) |
//! | anything else | `Failed(Server)` with the service's message if any |
//!
//! Soft-failure bodies come in two flavours: the frame endpoint answers
//! 404 with plain text, the image endpoint with `{"error": …}`. Both become
//! the `NoDetection` message.

use crate::encode;
use crate::error::UploadError;
use crate::upload::{Endpoint, UploadState};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Message used when a soft failure carries no text of its own.
pub const DEFAULT_NO_DETECTION: &str = "No formula was detected in this input.";

/// The service's answer for one submission. Entry order is the response order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingResult {
    /// Free-text status line from the service, when present.
    pub message: Option<String>,
    pub entries: Vec<FormulaEntry>,
}

/// One detected formula.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormulaEntry {
    /// LaTeX source of the formula.
    pub formula: String,
    /// Problem category assigned by the service (e.g. "algebra").
    pub kind: String,
    /// Recognition confidence, as sent by the service.
    pub confidence: Option<f64>,
    /// PNG rendering of the formula.
    #[serde(skip_serializing)]
    pub rendered_image: Option<Vec<u8>>,
}

// ── Wire DTOs ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireFormula {
    formula: String,
    #[serde(default)]
    tipo: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    latex_image: Option<String>,
}

impl From<WireFormula> for FormulaEntry {
    fn from(w: WireFormula) -> Self {
        FormulaEntry {
            formula: w.formula,
            kind: w.tipo,
            confidence: w.confidence,
            rendered_image: w
                .latex_image
                .as_deref()
                .and_then(encode::decode_rendered_image),
        }
    }
}

/// `/api/procesar_fotograma/`: the formula fields sit at the top level.
#[derive(Debug, Deserialize)]
struct FrameBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(flatten)]
    formula: WireFormula,
}

/// `/api/procesar_pdf/`
#[derive(Debug, Deserialize)]
struct DocumentBody {
    #[serde(default)]
    message: Option<String>,
    problemas: Vec<WireFormula>,
}

/// `/api/procesar_imagen/`
#[derive(Debug, Deserialize)]
struct ImageBody {
    #[serde(default)]
    message: Option<String>,
    problema: WireFormula,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

// ── Classification ────────────────────────────────────────────────────────

/// Classify a complete response into a terminal [`UploadState`].
pub fn classify(endpoint: Endpoint, status: u16, body: &[u8]) -> UploadState {
    match status {
        200..=299 => match parse_success(endpoint, body) {
            Ok(result) if result.entries.is_empty() && endpoint == Endpoint::Frame => {
                UploadState::NoDetection {
                    message: result
                        .message
                        .unwrap_or_else(|| DEFAULT_NO_DETECTION.to_string()),
                }
            }
            Ok(result) => {
                debug!("{:?}: {} formula(s) detected", endpoint, result.entries.len());
                UploadState::Succeeded(result)
            }
            Err(detail) => {
                warn!("{:?}: malformed success body: {}", endpoint, detail);
                UploadState::Failed(UploadError::MalformedResponse { detail })
            }
        },
        404 => UploadState::NoDetection {
            message: extract_message(body).unwrap_or_else(|| DEFAULT_NO_DETECTION.to_string()),
        },
        _ => UploadState::Failed(UploadError::Server {
            status,
            message: extract_message(body),
        }),
    }
}

fn parse_success(endpoint: Endpoint, body: &[u8]) -> Result<ProcessingResult, String> {
    let result = match endpoint {
        Endpoint::Frame => {
            let b: FrameBody = serde_json::from_slice(body).map_err(|e| e.to_string())?;
            let entries = if b.formula.formula.trim().is_empty() {
                Vec::new()
            } else {
                vec![b.formula.into()]
            };
            ProcessingResult {
                message: b.message,
                entries,
            }
        }
        Endpoint::Document => {
            let b: DocumentBody = serde_json::from_slice(body).map_err(|e| e.to_string())?;
            ProcessingResult {
                message: b.message,
                entries: b.problemas.into_iter().map(Into::into).collect(),
            }
        }
        Endpoint::Image => {
            let b: ImageBody = serde_json::from_slice(body).map_err(|e| e.to_string())?;
            ProcessingResult {
                message: b.message,
                entries: vec![b.problema.into()],
            }
        }
        Endpoint::Text => {
            return Err("the text endpoint does not return formula results".into());
        }
    };
    Ok(result)
}

/// Pull a human-readable message out of an error body: JSON `error` /
/// `message` / `detail`, else short plain text. HTML error pages yield `None`.
pub fn extract_message(body: &[u8]) -> Option<String> {
    if let Ok(b) = serde_json::from_slice::<MessageBody>(body) {
        return b
            .error
            .or(b.message)
            .or(b.detail)
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
    }

    let text = std::str::from_utf8(body).ok()?.trim();
    if text.is_empty() || text.starts_with('<') {
        return None;
    }
    const MAX: usize = 300;
    if text.chars().count() > MAX {
        Some(format!("{}…", text.chars().take(MAX).collect::<String>()))
    } else {
        Some(text.to_string())
    }
}
