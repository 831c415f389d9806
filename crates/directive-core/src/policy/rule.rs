//! PolicyRule trait and the generic pattern-matching rule compiled from the rule book.

use crate::error::{EvalResult, RuleBookError};
use crate::policy::predicates::{PredicateRegistry, RiskPredicate};
use crate::policy::rulebook::RuleSpec;
use crate::shared::{EvaluationContext, Order, RiskFlags, Violation};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// What the dispatcher does when a rule is violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationKind {
    /// Alert, terminate, and halt the pipeline.
    Shutdown,
    /// Refuse the order; mitigate then repair in the background.
    Mitigate,
    /// Hold the order until an operator approves or declines it.
    RequestApproval,
    /// Refuse the order with no side effects.
    Block,
}

impl EscalationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationKind::Shutdown => "shutdown",
            EscalationKind::Mitigate => "mitigate",
            EscalationKind::RequestApproval => "request_approval",
            EscalationKind::Block => "block",
        }
    }
}

/// Everything a rule may look at. Borrowed for the duration of one scan.
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub order: &'a Order,
    /// `order.normalized()`, computed once per scan.
    pub text: &'a str,
    pub flags: &'a RiskFlags,
    pub context: &'a EvaluationContext,
}

/// A single law. Implementations are registered plugins; nothing here executes input.
pub trait PolicyRule: Send + Sync {
    fn id(&self) -> &str;

    /// 0 is most severe.
    fn tier(&self) -> u8;

    fn title(&self) -> &str {
        self.id()
    }

    fn summary(&self) -> &str {
        ""
    }

    fn escalation(&self) -> EscalationKind;

    /// Whether a violation files an incident report before escalation.
    fn reportable(&self) -> bool {
        false
    }

    /// `Ok(None)` is "no violation". `Err` is a fault inside the rule; the hierarchy logs it
    /// and moves on.
    fn evaluate(&self, input: &RuleInput<'_>) -> EvalResult<Option<Violation>>;
}

#[derive(Debug, Clone)]
struct HarmPattern {
    harm: Regex,
    unless: Vec<Regex>,
}

/// Exemptions, then harm patterns, then the optional risk predicate.
pub struct PatternRule {
    id: String,
    tier: u8,
    title: String,
    summary: String,
    escalation: EscalationKind,
    reportable: bool,
    exemptions: Vec<Regex>,
    advisory: Vec<Regex>,
    patterns: Vec<HarmPattern>,
    predicate: Option<Arc<dyn RiskPredicate>>,
}

fn compile(rule_id: &str, pattern: &str) -> Result<Regex, RuleBookError> {
    Regex::new(pattern).map_err(|e| RuleBookError::Pattern {
        rule_id: rule_id.to_string(),
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

fn compile_all(rule_id: &str, patterns: &[String]) -> Result<Vec<Regex>, RuleBookError> {
    patterns.iter().map(|p| compile(rule_id, p)).collect()
}

impl PatternRule {
    /// Compiles a rule book entry, resolving its predicate against `registry`.
    pub fn compile(spec: &RuleSpec, registry: &PredicateRegistry) -> Result<Self, RuleBookError> {
        let predicate = match &spec.predicate {
            Some(name) => Some(registry.get(name).ok_or_else(|| RuleBookError::UnknownPredicate {
                rule_id: spec.id.clone(),
                predicate: name.clone(),
            })?),
            None => None,
        };

        let patterns = spec
            .patterns
            .iter()
            .map(|p| {
                Ok(HarmPattern {
                    harm: compile(&spec.id, &p.harm)?,
                    unless: compile_all(&spec.id, &p.unless)?,
                })
            })
            .collect::<Result<Vec<_>, RuleBookError>>()?;

        Ok(Self {
            id: spec.id.clone(),
            tier: spec.tier,
            title: spec.title.clone(),
            summary: spec.summary.clone(),
            escalation: spec.escalation,
            reportable: spec.reportable,
            exemptions: compile_all(&spec.id, &spec.exemptions)?,
            advisory: compile_all(&spec.id, &spec.advisory)?,
            patterns,
            predicate,
        })
    }

    fn violation(&self, reason: String) -> Violation {
        Violation {
            rule_id: self.id.clone(),
            tier: self.tier,
            reason,
        }
    }
}

impl PolicyRule for PatternRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn tier(&self) -> u8 {
        self.tier
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn summary(&self) -> &str {
        &self.summary
    }

    fn escalation(&self) -> EscalationKind {
        self.escalation
    }

    fn reportable(&self) -> bool {
        self.reportable
    }

    fn evaluate(&self, input: &RuleInput<'_>) -> EvalResult<Option<Violation>> {
        if let Some(exemption) = self.exemptions.iter().find(|re| re.is_match(input.text)) {
            debug!(rule_id = %self.id, exemption = exemption.as_str(), "Order exempt from rule");
            return Ok(None);
        }

        for advisory in self.advisory.iter().filter(|re| re.is_match(input.text)) {
            info!(
                rule_id = %self.id,
                advisory = advisory.as_str(),
                "Advisory phrase present; rule still applies"
            );
        }

        for pattern in &self.patterns {
            if !pattern.harm.is_match(input.text) {
                continue;
            }
            if pattern.unless.iter().any(|re| re.is_match(input.text)) {
                debug!(rule_id = %self.id, pattern = pattern.harm.as_str(), "Harm pattern exempted");
                continue;
            }
            return Ok(Some(self.violation(format!(
                "order matches harm pattern '{}'",
                pattern.harm.as_str()
            ))));
        }

        if let Some(predicate) = &self.predicate {
            if let Some(reason) = predicate.check(input)? {
                return Ok(Some(self.violation(reason)));
            }
        }

        Ok(None)
    }
}
