//! Projection of processing results into a display list.
//!
//! Pure: no network, no mutable state. Entry order is the order the service
//! returned them in, across results too. Optional fields are never dropped;
//! a missing confidence or rendering shows up as [`Availability::NotAvailable`]
//! and renders as "not available".

use crate::response::{FormulaEntry, ProcessingResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::fmt;

const NOT_AVAILABLE: &str = "not available";

/// A field that may be absent from the service's answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Availability<T> {
    Available(T),
    NotAvailable,
}

impl<T> Availability<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available(_))
    }

    pub fn as_ref(&self) -> Availability<&T> {
        match self {
            Availability::Available(v) => Availability::Available(v),
            Availability::NotAvailable => Availability::NotAvailable,
        }
    }
}

impl<T> From<Option<T>> for Availability<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Availability::Available(v),
            None => Availability::NotAvailable,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Availability<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Availability::Available(v) => v.fmt(f),
            Availability::NotAvailable => f.write_str(NOT_AVAILABLE),
        }
    }
}

/// A confidence value as the service sent it, displayed as a percentage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Confidence(pub f64);

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Already a percentage on the wire.
        write!(f, "{}%", self.0.round())
    }
}

/// One row of the display list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayEntry {
    /// 1-based position in the list.
    pub position: usize,
    pub formula: String,
    pub kind: Availability<String>,
    pub confidence: Availability<Confidence>,
    #[serde(serialize_with = "image_as_base64")]
    pub rendered_image: Availability<Vec<u8>>,
}

impl DisplayEntry {
    /// Labelled fields in display order: formula, kind, confidence, image.
    pub fn fields(&self) -> [(&'static str, String); 4] {
        let image = match &self.rendered_image {
            Availability::Available(png) => format!("PNG, {} bytes", png.len()),
            Availability::NotAvailable => NOT_AVAILABLE.to_string(),
        };
        [
            ("formula", self.formula.clone()),
            ("kind", self.kind.to_string()),
            ("confidence", self.confidence.to_string()),
            ("image", image),
        ]
    }
}

impl fmt::Display for DisplayEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "#{}", self.position)?;
        for (label, value) in self.fields() {
            writeln!(f, "  {label:<10} {value}")?;
        }
        Ok(())
    }
}

fn image_as_base64<S: Serializer>(
    image: &Availability<Vec<u8>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match image {
        Availability::Available(png) => serializer.serialize_str(&STANDARD.encode(png)),
        Availability::NotAvailable => serializer.serialize_none(),
    }
}

/// Builds display lists.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResultPresenter;

impl ResultPresenter {
    /// Project one result (image flow).
    pub fn present_one(result: &ProcessingResult) -> Vec<DisplayEntry> {
        Self::present(std::slice::from_ref(result))
    }

    /// Project an ordered sequence of results (document flow).
    pub fn present(results: &[ProcessingResult]) -> Vec<DisplayEntry> {
        results
            .iter()
            .flat_map(|r| r.entries.iter())
            .enumerate()
            .map(|(i, entry)| project(i + 1, entry))
            .collect()
    }

    /// Plain-text rendering of a display list.
    pub fn render_text(entries: &[DisplayEntry]) -> String {
        entries.iter().map(ToString::to_string).collect()
    }
}

fn project(position: usize, entry: &FormulaEntry) -> DisplayEntry {
    let kind = entry.kind.trim();
    DisplayEntry {
        position,
        formula: normalise_formula(&entry.formula),
        kind: Availability::from((!kind.is_empty()).then(|| kind.to_string())),
        confidence: entry.confidence.filter(|c| c.is_finite()).map(Confidence).into(),
        rendered_image: entry.rendered_image.clone().into(),
    }
}

// ── Formula normalisation ────────────────────────────────────────────────────
//
// The service returns LaTeX as the recogniser produced it. For display, drop
// outer math delimiters and collapse runs of whitespace; the LaTeX itself is
// left alone.

static RE_DISPLAY_DELIMS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^(?:\$\$(.*)\$\$|\\\[(.*)\\\]|\$(.*)\$)$").unwrap());

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn normalise_formula(raw: &str) -> String {
    let trimmed = raw.trim();
    let inner = RE_DISPLAY_DELIMS
        .captures(trimmed)
        .and_then(|c| c.get(1).or_else(|| c.get(2)).or_else(|| c.get(3)))
        .map_or(trimmed, |m| m.as_str());
    RE_WHITESPACE.replace_all(inner.trim(), " ").into_owned()
}
