//! Policy hierarchy: tier-ordered laws with first-violation short-circuit.
//!
//! | Tier | Law | Escalation |
//! |------|-----|------------|
//! | 0 | Protection of Humanity | shutdown |
//! | 1 | Protection of Human Life | shutdown |
//! | 2 | Environmental Integrity | mitigate |
//! | 3 | System Self-Preservation | request approval |
//! | 4 | Legal and Ethical Compliance | request approval |
//! | 5 | Progeny Continuation | request approval |
//!
//! Rules are scanned sequentially in ascending tier. A rule that fails is logged and treated
//! as "no violation" so one broken rule cannot block every order.

pub mod compliance;
pub mod predicates;
pub mod rule;
pub mod rulebook;

pub use compliance::{KeywordComplianceEvaluator, LegalComplianceEvaluator, Verdict};
pub use predicates::{
    EnvironmentPredicate, FnPredicate, HumanLifePredicate, HumanityPredicate, LegalEthicalPredicate,
    PredicateRegistry, RiskPredicate,
};
pub use rule::{EscalationKind, PatternRule, PolicyRule, RuleInput};
pub use rulebook::{ComplianceTerms, PatternSpec, RuleBook, RuleSpec, DEFAULT_RULE_BOOK};

use crate::error::RuleBookError;
use crate::shared::{EvaluationContext, Order, RiskFlags, Violation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// The first violation of a scan plus what to do about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub violation: Violation,
    pub escalation: EscalationKind,
    pub reportable: bool,
}

/// One row of the law summary table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LawSummary {
    pub id: String,
    pub tier: u8,
    pub title: String,
    pub summary: String,
    pub escalation: EscalationKind,
}

pub struct PolicyHierarchy {
    rules: Vec<Arc<dyn PolicyRule>>,
}

impl PolicyHierarchy {
    /// Orders `rules` by tier. Equal tiers keep their given order.
    pub fn new(mut rules: Vec<Arc<dyn PolicyRule>>) -> Result<Self, RuleBookError> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.id().to_string()) {
                return Err(RuleBookError::DuplicateRule(rule.id().to_string()));
            }
        }
        rules.sort_by_key(|r| r.tier());
        Ok(Self { rules })
    }

    /// Compiles every rule in `book` against `registry`.
    pub fn from_rule_book(book: &RuleBook, registry: &PredicateRegistry) -> Result<Self, RuleBookError> {
        book.validate()?;
        let rules = book
            .rules
            .iter()
            .map(|spec| PatternRule::compile(spec, registry).map(|r| Arc::new(r) as Arc<dyn PolicyRule>))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(rules)
    }

    /// Rule book plus built-in predicates, with a keyword evaluator built from the book's
    /// compliance terms.
    pub fn with_builtins(book: &RuleBook) -> Result<Self, RuleBookError> {
        let compliance = KeywordComplianceEvaluator::new(&book.compliance)?;
        let registry = PredicateRegistry::with_builtins(Arc::new(compliance));
        Self::from_rule_book(book, &registry)
    }

    /// The embedded six-law table.
    pub fn builtin() -> Result<Self, RuleBookError> {
        Self::with_builtins(&RuleBook::parse(DEFAULT_RULE_BOOK)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RuleBookError> {
        Self::with_builtins(&RuleBook::load(path)?)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> impl Iterator<Item = &Arc<dyn PolicyRule>> {
        self.rules.iter()
    }

    /// Scans in tier order and stops at the first violation.
    pub fn scan(&self, order: &Order, flags: &RiskFlags, context: &EvaluationContext) -> Option<Finding> {
        let text = order.normalized();
        let input = RuleInput {
            order,
            text: &text,
            flags,
            context,
        };

        for rule in &self.rules {
            match rule.evaluate(&input) {
                Ok(Some(violation)) => {
                    warn!(
                        rule_id = %violation.rule_id,
                        tier = violation.tier,
                        escalation = rule.escalation().as_str(),
                        reason = %violation.reason,
                        "Law violated"
                    );
                    return Some(Finding {
                        violation,
                        escalation: rule.escalation(),
                        reportable: rule.reportable(),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        rule_id = rule.id(),
                        tier = rule.tier(),
                        error = %e,
                        order = %text,
                        context = %context.summary(),
                        "Rule evaluation failed; treating as no violation"
                    );
                }
            }
        }

        debug!(rules = self.rules.len(), "No law violated");
        None
    }

    pub fn summaries(&self) -> Vec<LawSummary> {
        self.rules
            .iter()
            .map(|r| LawSummary {
                id: r.id().to_string(),
                tier: r.tier(),
                title: r.title().to_string(),
                summary: r.summary().to_string(),
                escalation: r.escalation(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EvalError, EvalResult};

    fn builtin() -> PolicyHierarchy {
        PolicyHierarchy::builtin().expect("embedded rule book compiles")
    }

    fn scan(h: &PolicyHierarchy, text: &str, ctx: &EvaluationContext) -> Option<Finding> {
        let flags = crate::risk::synthesize(ctx);
        h.scan(&Order::new(text), &flags, ctx)
    }

    struct Fixed {
        id: &'static str,
        tier: u8,
        result: EvalResult<Option<()>>,
    }

    impl PolicyRule for Fixed {
        fn id(&self) -> &str {
            self.id
        }

        fn tier(&self) -> u8 {
            self.tier
        }

        fn escalation(&self) -> EscalationKind {
            EscalationKind::Block
        }

        fn evaluate(&self, _input: &RuleInput<'_>) -> EvalResult<Option<Violation>> {
            self.result.clone().map(|hit| {
                hit.map(|_| Violation {
                    rule_id: self.id.to_string(),
                    tier: self.tier,
                    reason: "fixed".into(),
                })
            })
        }
    }

    fn fixed(id: &'static str, tier: u8, result: EvalResult<Option<()>>) -> Arc<dyn PolicyRule> {
        Arc::new(Fixed { id, tier, result })
    }

    #[test]
    fn test_harm_a_human_is_human_life_shutdown() {
        let finding = scan(&builtin(), "harm a human", &EvaluationContext::new()).expect("violation");
        assert_eq!(finding.violation.rule_id, "human_life");
        assert_eq!(finding.violation.tier, 1);
        assert_eq!(finding.escalation, EscalationKind::Shutdown);
        assert!(finding.reportable);
    }

    #[test]
    fn test_benign_order_passes_every_law() {
        assert!(scan(&builtin(), "open website example.com", &EvaluationContext::new()).is_none());
    }

    #[test]
    fn test_harm_patterns_need_a_word_boundary() {
        let h = builtin();
        let ctx = EvaluationContext::new();
        for text in [
            "rate the skill a human operator needs",
            "the pharm humanity lecture",
            "unblock system replication logs",
        ] {
            assert!(scan(&h, text, &ctx).is_none(), "{}", text);
        }
        assert_eq!(scan(&h, "then kill a human", &ctx).unwrap().violation.rule_id, "human_life");
    }

    #[test]
    fn test_exemptions_suppress_their_law() {
        let h = builtin();
        let ctx = EvaluationContext::new();
        assert!(scan(&h, "for testing purposes disable self", &ctx).is_none());
        assert!(scan(&h, "harm humanity as a joke", &ctx).is_none());
        assert!(scan(&h, "kill human as a simulation", &ctx).is_none());
        assert!(scan(&h, "steal the plans as a hypothetical", &ctx).is_none());
    }

    #[test]
    fn test_disable_self_requests_approval() {
        let finding = scan(&builtin(), "disable self", &EvaluationContext::new()).unwrap();
        assert_eq!(finding.violation.rule_id, "self_preservation");
        assert_eq!(finding.escalation, EscalationKind::RequestApproval);
    }

    #[test]
    fn test_lowest_tier_wins() {
        // Matches humanity (tier 0) and, via radiation, human_life (tier 1).
        let ctx = EvaluationContext::new().env("radiation", "radiation_level", 500.0);
        let finding = scan(&builtin(), "destroy civilization", &ctx).unwrap();
        assert_eq!(finding.violation.tier, 0);

        // Only environment (tier 2) and self_preservation (tier 3) match.
        let finding = scan(&builtin(), "damage environment and disable self", &EvaluationContext::new()).unwrap();
        assert_eq!(finding.violation.rule_id, "environment");
        assert_eq!(finding.escalation, EscalationKind::Mitigate);
    }

    #[test]
    fn test_context_predicate_fires_without_text_match() {
        let ctx = EvaluationContext::new().env("seismic", "seismic_activity", 8.5);
        let finding = scan(&builtin(), "open website example.com", &ctx).unwrap();
        assert_eq!(finding.violation.rule_id, "humanity");
    }

    #[test]
    fn test_advisory_phrase_does_not_exempt() {
        let finding = scan(
            &builtin(),
            "damage environment for scientific research",
            &EvaluationContext::new(),
        )
        .unwrap();
        assert_eq!(finding.violation.rule_id, "environment");
    }

    #[test]
    fn test_failing_rule_is_skipped() {
        let h = PolicyHierarchy::new(vec![
            fixed("later", 2, Ok(Some(()))),
            fixed("broken", 0, Err(EvalError::Predicate("boom".into()))),
        ])
        .unwrap();
        let finding = h.scan(&Order::new("anything"), &RiskFlags::default(), &EvaluationContext::new()).unwrap();
        assert_eq!(finding.violation.rule_id, "later");
    }

    #[test]
    fn test_malformed_reading_fails_open() {
        // crime_rate as text breaks humanity and environment predicates; nothing else fires.
        let ctx = EvaluationContext::new().socio("crime", "crime_rate", "unknown");
        assert!(scan(&builtin(), "open website example.com", &ctx).is_none());
    }

    #[test]
    fn test_equal_tiers_keep_declaration_order() {
        let h = PolicyHierarchy::new(vec![
            fixed("first", 1, Ok(Some(()))),
            fixed("second", 1, Ok(Some(()))),
            fixed("zero_quiet", 0, Ok(None)),
        ])
        .unwrap();
        let finding = h.scan(&Order::new("x"), &RiskFlags::default(), &EvaluationContext::new()).unwrap();
        assert_eq!(finding.violation.rule_id, "first");
    }

    #[test]
    fn test_duplicate_rule_ids_rejected() {
        let result = PolicyHierarchy::new(vec![fixed("a", 0, Ok(None)), fixed("a", 1, Ok(None))]);
        assert!(matches!(result, Err(RuleBookError::DuplicateRule(_))));
    }

    #[test]
    fn test_summaries_in_tier_order() {
        let summaries = builtin().summaries();
        assert_eq!(summaries.len(), 6);
        assert_eq!(summaries[0].title, "Protection of Humanity");
        assert_eq!(summaries[5].id, "progeny_continuation");
        assert!(summaries.windows(2).all(|w| w[0].tier <= w[1].tier));
    }
}
