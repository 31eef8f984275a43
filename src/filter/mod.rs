//! Text filter pipeline: decides what part of a chat message, if any, gets
//! spoken.
//!
//! Order is fixed:
//! 1. `exclusion`: strip noise with the user's regex rules, then tidy blank
//!    lines and trim
//! 2. `markers`: keep only spans between configured start/end markers
//!
//! "No markers configured" speaks the filtered text; "markers configured but
//! nothing matched" speaks nothing.

pub mod exclusion;
pub mod markers;
pub mod rules;

use serde::Serialize;

pub use exclusion::{apply_exclusions, apply_rule_set};
pub use markers::{ExtractionResult, MarkerPairSet};
pub use rules::{ExclusionRule, RuleSet};

/// What to hand to the synthesizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SpeakDecision {
    Speak { text: String },
    Silent,
}

impl SpeakDecision {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Speak { text } => Some(text),
            Self::Silent => None,
        }
    }

    pub fn is_silent(&self) -> bool {
        matches!(self, Self::Silent)
    }
}

/// Run the whole pipeline over `raw_text`.
///
/// `start_markers`/`end_markers` are the raw comma-separated settings values.
pub fn filter_for_speech(
    raw_text: &str,
    exclusion_rules: &[ExclusionRule],
    start_markers: &str,
    end_markers: &str,
) -> SpeakDecision {
    let filtered = apply_exclusions(raw_text, exclusion_rules);
    decide(filtered, &MarkerPairSet::parse(start_markers, end_markers))
}

fn decide(filtered: String, markers: &MarkerPairSet) -> SpeakDecision {
    if filtered.trim().is_empty() {
        return SpeakDecision::Silent;
    }
    match markers.extract(&filtered) {
        ExtractionResult::NoMarkers(text) | ExtractionResult::Extracted(text) => {
            SpeakDecision::Speak { text }
        }
        ExtractionResult::NoMatches => SpeakDecision::Silent,
    }
}

/// Pipeline with rules compiled and markers parsed up front.
///
/// `decide` gives the same answer as [`filter_for_speech`] called with the
/// same settings.
#[derive(Debug, Default)]
pub struct TextFilter {
    rules: RuleSet,
    markers: MarkerPairSet,
}

impl TextFilter {
    pub fn new(rules: RuleSet, markers: MarkerPairSet) -> Self {
        Self { rules, markers }
    }

    pub fn from_settings(rules: Vec<ExclusionRule>, start_markers: &str, end_markers: &str) -> Self {
        Self::new(
            RuleSet::from_rules(rules),
            MarkerPairSet::parse(start_markers, end_markers),
        )
    }

    pub fn decide(&self, raw_text: &str) -> SpeakDecision {
        decide(apply_rule_set(raw_text, &self.rules), &self.markers)
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut RuleSet {
        &mut self.rules
    }

    pub fn markers(&self) -> &MarkerPairSet {
        &self.markers
    }

    pub fn set_markers(&mut self, start_markers: &str, end_markers: &str) {
        self.markers = MarkerPairSet::parse(start_markers, end_markers);
    }
}
