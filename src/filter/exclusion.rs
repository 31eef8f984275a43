//! Noise removal. Rules run in list order, each one against the output of
//! the previous one.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use super::rules::{compile_pattern, ExclusionRule, RuleSet};

static EXTRA_BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank-line pattern is valid"));

/// Apply `rules` to `text`, compiling each enabled pattern on the spot.
///
/// Patterns that fail to compile are skipped; the rest still run.
pub fn apply_exclusions(text: &str, rules: &[ExclusionRule]) -> String {
    let mut current = text.to_string();
    for rule in rules.iter().filter(|r| r.enabled) {
        match compile_pattern(&rule.pattern) {
            Ok(re) => current = strip(&rule.name, &re, &current),
            Err(e) => warn!("Skipping exclusion rule '{}': {e}", rule.name),
        }
    }
    tidy(&current)
}

/// Same as [`apply_exclusions`] with patterns compiled ahead of time.
pub fn apply_rule_set(text: &str, rules: &RuleSet) -> String {
    let mut current = text.to_string();
    for (name, re) in rules.active() {
        current = strip(name, re, &current);
    }
    tidy(&current)
}

fn strip(name: &str, re: &Regex, text: &str) -> String {
    let out = re.replace_all(text, "").into_owned();
    if out.len() != text.len() {
        debug!("Rule '{name}' removed {} bytes", text.len() - out.len());
    }
    out
}

/// Collapse 3+ newlines to a paragraph break and trim.
fn tidy(text: &str) -> String {
    EXTRA_BLANK_LINES.replace_all(text, "\n\n").trim().to_string()
}
