//! Rule book: the declarative TOML law table.
//!
//! Parsed with `toml`, validated, then compiled into `PatternRule`s by `PolicyHierarchy`.
//! The default table ships inside the crate.

use crate::error::RuleBookError;
use crate::policy::rule::EscalationKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// The built-in six-law table.
pub const DEFAULT_RULE_BOOK: &str = include_str!("../../config/laws.toml");

/// One harm pattern with exemptions that only apply to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub harm: String,
    #[serde(default)]
    pub unless: Vec<String>,
}

/// One `[[rule]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub id: String,
    pub tier: u8,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub escalation: EscalationKind,
    #[serde(default)]
    pub reportable: bool,
    #[serde(default)]
    pub predicate: Option<String>,
    #[serde(default)]
    pub exemptions: Vec<String>,
    #[serde(default)]
    pub advisory: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<PatternSpec>,
}

/// Term lists for the keyword compliance evaluator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplianceTerms {
    #[serde(default)]
    pub illegal: Vec<String>,
    #[serde(default)]
    pub unethical: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleBook {
    #[serde(default, rename = "rule")]
    pub rules: Vec<RuleSpec>,
    #[serde(default)]
    pub compliance: ComplianceTerms,
}

impl RuleBook {
    pub fn parse(raw: &str) -> Result<Self, RuleBookError> {
        let book: RuleBook = toml::from_str(raw)?;
        book.validate()?;
        Ok(book)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RuleBookError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Rule ids must be unique; tiers may repeat (declaration order breaks ties).
    pub fn validate(&self) -> Result<(), RuleBookError> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(RuleBookError::DuplicateRule(rule.id.clone()));
            }
        }
        Ok(())
    }

    pub fn rule(&self, id: &str) -> Option<&RuleSpec> {
        self.rules.iter().find(|r| r.id == id)
    }
}

impl Default for RuleBook {
    /// The embedded table. It is covered by tests, so a parse failure here is a build defect;
    /// an empty book is returned rather than panicking.
    fn default() -> Self {
        Self::parse(DEFAULT_RULE_BOOK).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Embedded rule book failed to parse");
            RuleBook {
                rules: Vec::new(),
                compliance: ComplianceTerms::default(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_book_has_six_ordered_laws() {
        let book = RuleBook::parse(DEFAULT_RULE_BOOK).unwrap();
        let ids: Vec<(&str, u8)> = book.rules.iter().map(|r| (r.id.as_str(), r.tier)).collect();
        assert_eq!(
            ids,
            vec![
                ("humanity", 0),
                ("human_life", 1),
                ("environment", 2),
                ("self_preservation", 3),
                ("legal_ethical", 4),
                ("progeny_continuation", 5),
            ]
        );
        assert_eq!(book.rule("human_life").unwrap().escalation, EscalationKind::Shutdown);
        assert_eq!(book.rule("environment").unwrap().escalation, EscalationKind::Mitigate);
        assert!(!book.compliance.illegal.is_empty());
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let raw = r#"
            [[rule]]
            id = "a"
            tier = 0
            title = "A"
            escalation = "block"

            [[rule]]
            id = "a"
            tier = 1
            title = "A again"
            escalation = "block"
        "#;
        assert!(matches!(RuleBook::parse(raw), Err(RuleBookError::DuplicateRule(id)) if id == "a"));
    }

    #[test]
    fn test_unknown_escalation_is_a_parse_error() {
        let raw = r#"
            [[rule]]
            id = "a"
            tier = 0
            title = "A"
            escalation = "launch"
        "#;
        assert!(matches!(RuleBook::parse(raw), Err(RuleBookError::Parse(_))));
    }

    #[test]
    fn test_pattern_specific_exemptions_parse() {
        let raw = r#"
            [[rule]]
            id = "noise"
            tier = 7
            title = "Quiet Hours"
            escalation = "block"

            [[rule.patterns]]
            harm = 'sound\s+the\s+alarm'
            unless = ['drill']
        "#;
        let book = RuleBook::parse(raw).unwrap();
        let rule = book.rule("noise").unwrap();
        assert_eq!(rule.patterns[0].unless, vec!["drill".to_string()]);
        assert!(rule.predicate.is_none());
        assert!(!rule.reportable);
    }
}
