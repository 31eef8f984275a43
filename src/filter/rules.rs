//! Exclusion rules: named, toggleable regular expressions that strip noise
//! (think-tags, stage directions, HTML comments) before extraction.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::FilterError;

/// A user-defined noise pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRule {
    pub name: String,
    pub pattern: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ExclusionRule {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Compile a rule pattern the way it is applied: case-insensitive, all matches.
pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

struct CompiledRule {
    rule: ExclusionRule,
    // None only for rules loaded from a settings file that no longer compile.
    regex: Option<Regex>,
}

/// Ordered rule list with each pattern compiled once.
///
/// Insertion order is application order. Rules are only changed through
/// [`RuleSet::add`], [`RuleSet::set_enabled`] and [`RuleSet::remove`].
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted rules without rejecting any of them.
    ///
    /// Stored rules were validated when added; a pattern that no longer
    /// compiles is kept (so it round-trips back to disk) but never applied.
    pub fn from_rules(rules: Vec<ExclusionRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let regex = match compile_pattern(&rule.pattern) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!("Exclusion rule '{}' does not compile, skipping it: {e}", rule.name);
                        None
                    }
                };
                CompiledRule { rule, regex }
            })
            .collect();
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ExclusionRule> {
        self.rules.iter().map(|c| &c.rule).find(|r| r.name == name)
    }

    /// Snapshot of the rules in application order.
    pub fn rules(&self) -> Vec<ExclusionRule> {
        self.rules.iter().map(|c| c.rule.clone()).collect()
    }

    /// Validate and append a rule. The name is trimmed before the
    /// uniqueness check.
    pub fn add(&mut self, mut rule: ExclusionRule) -> Result<(), FilterError> {
        rule.name = rule.name.trim().to_string();
        if rule.name.is_empty() {
            return Err(FilterError::EmptyName);
        }
        if rule.pattern.is_empty() {
            return Err(FilterError::EmptyPattern(rule.name));
        }
        if self.get(&rule.name).is_some() {
            return Err(FilterError::DuplicateName(rule.name));
        }
        let regex = compile_pattern(&rule.pattern).map_err(|source| FilterError::InvalidPattern {
            name: rule.name.clone(),
            source,
        })?;

        debug!("Added exclusion rule '{}': {}", rule.name, rule.pattern);
        self.rules.push(CompiledRule {
            rule,
            regex: Some(regex),
        });
        Ok(())
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), FilterError> {
        let entry = self
            .rules
            .iter_mut()
            .find(|c| c.rule.name == name)
            .ok_or_else(|| FilterError::UnknownRule(name.to_string()))?;
        entry.rule.enabled = enabled;
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<ExclusionRule, FilterError> {
        let idx = self
            .rules
            .iter()
            .position(|c| c.rule.name == name)
            .ok_or_else(|| FilterError::UnknownRule(name.to_string()))?;
        Ok(self.rules.remove(idx).rule)
    }

    /// Enabled, compilable patterns in application order.
    pub(crate) fn active(&self) -> impl Iterator<Item = (&str, &Regex)> {
        self.rules
            .iter()
            .filter(|c| c.rule.enabled)
            .filter_map(|c| c.regex.as_ref().map(|re| (c.rule.name.as_str(), re)))
    }
}

impl std::fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.rules.iter().map(|c| &c.rule)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_rejects_duplicate_names() {
        let mut set = RuleSet::new();
        set.add(ExclusionRule::new("think", "<think>.*?</think>")).unwrap();
        let err = set.add(ExclusionRule::new("  think ", "x")).unwrap_err();
        assert!(matches!(err, FilterError::DuplicateName(name) if name == "think"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn add_rejects_invalid_pattern_with_rule_name() {
        let mut set = RuleSet::new();
        let err = set.add(ExclusionRule::new("broken", "(unclosed")).unwrap_err();
        assert!(matches!(err, FilterError::InvalidPattern { ref name, .. } if name == "broken"));
        assert!(err.to_string().contains("broken"));
        assert!(set.is_empty());
    }

    #[test]
    fn add_rejects_blank_name_and_pattern() {
        let mut set = RuleSet::new();
        assert!(matches!(
            set.add(ExclusionRule::new("   ", "x")),
            Err(FilterError::EmptyName)
        ));
        assert!(matches!(
            set.add(ExclusionRule::new("a", "")),
            Err(FilterError::EmptyPattern(_))
        ));
    }

    #[test]
    fn escaped_slash_from_browser_patterns_compiles() {
        let mut set = RuleSet::new();
        set.add(ExclusionRule::new("think", r"<think>[\s\S]*?<\/think>")).unwrap();
    }

    #[test]
    fn toggle_and_remove_keep_order() {
        let mut set = RuleSet::new();
        set.add(ExclusionRule::new("a", "a")).unwrap();
        set.add(ExclusionRule::new("b", "b")).unwrap();
        set.add(ExclusionRule::new("c", "c")).unwrap();

        set.set_enabled("b", false).unwrap();
        assert!(!set.get("b").unwrap().enabled);
        let active: Vec<&str> = set.active().map(|(name, _)| name).collect();
        assert_eq!(active, ["a", "c"]);

        let removed = set.remove("a").unwrap();
        assert_eq!(removed.name, "a");
        let names: Vec<String> = set.rules().into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["b", "c"]);
    }

    #[test]
    fn unknown_rule_operations_fail() {
        let mut set = RuleSet::new();
        assert!(matches!(
            set.set_enabled("nope", true),
            Err(FilterError::UnknownRule(_))
        ));
        assert!(matches!(set.remove("nope"), Err(FilterError::UnknownRule(_))));
    }

    #[test]
    fn from_rules_keeps_uncompilable_rule_but_never_applies_it() {
        let set = RuleSet::from_rules(vec![
            ExclusionRule::new("bad", "(oops"),
            ExclusionRule::new("good", "x"),
        ]);
        assert_eq!(set.len(), 2);
        let active: Vec<&str> = set.active().map(|(name, _)| name).collect();
        assert_eq!(active, ["good"]);
    }

    #[test]
    fn enabled_defaults_to_true_when_missing() {
        let rule: ExclusionRule = serde_json::from_str(r#"{"name":"a","pattern":"b"}"#).unwrap();
        assert!(rule.enabled);
    }
}
