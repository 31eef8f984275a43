//! Marker-based extraction: keep only the text between configured start/end
//! tokens.
//!
//! A pair whose start and end tokens are identical (a plain `"` for quoted
//! dialogue, say) is scanned with an open/closed toggle. A pair with distinct
//! tokens is matched with a lazy, dot-matches-newline regex built from the
//! escaped tokens. Pairs are scanned one after another, and every span found
//! is pooled in that order.

use regex::Regex;
use tracing::{debug, warn};

/// Parsed start/end marker lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerPairSet {
    starts: Vec<String>,
    ends: Vec<String>,
}

/// Outcome of running extraction over filtered text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionResult {
    /// No usable markers; carries the input unchanged.
    NoMarkers(String),
    /// Every matched span, trimmed and joined with a single space.
    Extracted(String),
    /// Markers are configured but nothing matched.
    NoMatches,
}

impl MarkerPairSet {
    /// Parse the raw comma-separated settings strings.
    pub fn parse(start_markers: &str, end_markers: &str) -> Self {
        let starts = split_markers(start_markers);
        let ends = split_markers(end_markers);
        if !starts.is_empty() && !ends.is_empty() && starts.len() != ends.len() {
            debug!(
                "Marker count mismatch ({} start, {} end), using the first {} pairs",
                starts.len(),
                ends.len(),
                starts.len().min(ends.len())
            );
        }
        Self { starts, ends }
    }

    pub fn starts(&self) -> &[String] {
        &self.starts
    }

    pub fn ends(&self) -> &[String] {
        &self.ends
    }

    pub fn is_configured(&self) -> bool {
        !self.starts.is_empty() && !self.ends.is_empty()
    }

    /// The pairs actually used; extra entries on the longer side are ignored.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.starts
            .iter()
            .zip(&self.ends)
            .map(|(s, e)| (s.as_str(), e.as_str()))
    }

    pub fn extract(&self, text: &str) -> ExtractionResult {
        if !self.is_configured() {
            return ExtractionResult::NoMarkers(text.to_string());
        }

        let mut spans = Vec::new();
        for (start, end) in self.pairs() {
            if start == end {
                scan_toggle(text, start, &mut spans);
            } else {
                scan_between(text, start, end, &mut spans);
            }
        }

        if spans.is_empty() {
            ExtractionResult::NoMatches
        } else {
            ExtractionResult::Extracted(spans.join(" "))
        }
    }
}

fn split_markers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from)
        .collect()
}

fn push_span(span: &str, spans: &mut Vec<String>) {
    let span = span.trim();
    if !span.is_empty() {
        spans.push(span.to_string());
    }
}

/// The marker both opens and closes a span. An unterminated trailing span is
/// dropped.
fn scan_toggle(text: &str, marker: &str, spans: &mut Vec<String>) {
    let mut inside = false;
    let mut span_start = 0;
    let mut pos = 0;

    while let Some(offset) = text[pos..].find(marker) {
        let at = pos + offset;
        if inside {
            push_span(&text[span_start..at], spans);
        } else {
            span_start = at + marker.len();
        }
        inside = !inside;
        pos = at + marker.len();
    }
}

fn scan_between(text: &str, start: &str, end: &str, spans: &mut Vec<String>) {
    let pattern = format!("(?s){}(.*?){}", regex::escape(start), regex::escape(end));
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            warn!("Skipping marker pair {start:?}/{end:?}: {e}");
            return;
        }
    };
    for caps in re.captures_iter(text) {
        if let Some(inner) = caps.get(1) {
            push_span(inner.as_str(), spans);
        }
    }
}
