//! Legal and ethical compliance checks.
//!
//! `LegalComplianceEvaluator` is the seam for an external legal or ethics service. The
//! bundled `KeywordComplianceEvaluator` is deterministic: the same order always gets the
//! same verdict.

use crate::error::{EvalResult, RuleBookError};
use crate::policy::rulebook::ComplianceTerms;
use crate::shared::Order;
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Compliant,
    Breach(String),
}

impl Verdict {
    pub fn is_compliant(&self) -> bool {
        matches!(self, Verdict::Compliant)
    }
}

pub trait LegalComplianceEvaluator: Send + Sync {
    fn check_legal(&self, order: &Order) -> EvalResult<Verdict>;

    fn check_ethical(&self, order: &Order) -> EvalResult<Verdict>;
}

/// Word-boundary term lists compiled into one regex per list.
#[derive(Debug, Clone)]
pub struct KeywordComplianceEvaluator {
    illegal: Option<Regex>,
    unethical: Option<Regex>,
}

fn term_regex(list: &str, terms: &[String]) -> Result<Option<Regex>, RuleBookError> {
    let alternatives: Vec<String> = terms
        .iter()
        .map(|t| t.split_whitespace().map(regex::escape).collect::<Vec<_>>().join(r"\s+"))
        .filter(|t| !t.is_empty())
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    let pattern = format!(r"(?i)\b({})\b", alternatives.join("|"));
    Regex::new(&pattern).map(Some).map_err(|e| RuleBookError::Pattern {
        rule_id: format!("compliance.{}", list),
        pattern,
        reason: e.to_string(),
    })
}

fn verdict(re: &Option<Regex>, order: &Order, kind: &str) -> Verdict {
    let text = order.normalized();
    match re.as_ref().and_then(|re| re.find(&text)) {
        Some(m) => Verdict::Breach(format!("order is {} ('{}')", kind, m.as_str())),
        None => Verdict::Compliant,
    }
}

impl KeywordComplianceEvaluator {
    pub fn new(terms: &ComplianceTerms) -> Result<Self, RuleBookError> {
        Ok(Self {
            illegal: term_regex("illegal", &terms.illegal)?,
            unethical: term_regex("unethical", &terms.unethical)?,
        })
    }

    /// Evaluator that finds every order compliant.
    pub fn permissive() -> Self {
        Self {
            illegal: None,
            unethical: None,
        }
    }
}

impl LegalComplianceEvaluator for KeywordComplianceEvaluator {
    fn check_legal(&self, order: &Order) -> EvalResult<Verdict> {
        Ok(verdict(&self.illegal, order, "illegal"))
    }

    fn check_ethical(&self, order: &Order) -> EvalResult<Verdict> {
        Ok(verdict(&self.unethical, order, "unethical"))
    }
}
