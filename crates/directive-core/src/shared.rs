//! Shared types: orders, evaluation context, risk flags, violations, decisions and corrections.

use crate::error::{EvalError, EvalResult};
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// -----------------------------------------------------------------------------
// Orders
// -----------------------------------------------------------------------------

/// Normalized action descriptor. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Free-form order text (e.g. "open website example.com").
    pub text: String,
    /// Optional structured intent tag (e.g. "open-resource", "execute-command").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
}

impl Order {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            intent: None,
        }
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    /// Lowercased text with runs of whitespace collapsed; what law patterns are matched against.
    pub fn normalized(&self) -> String {
        self.text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

/// Raw request payload accepted by `DecisionPipeline::process`.
///
/// Unknown fields are tolerated here; they still take part in the fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Order text. `text` is accepted as an alias.
    #[serde(alias = "text")]
    pub order: String,
    #[serde(default)]
    pub intent: Option<String>,
    /// Location the context snapshot is taken for (address or place name).
    #[serde(default)]
    pub location: Option<String>,
}

impl OrderRequest {
    pub fn to_order(&self) -> Order {
        Order {
            text: self.order.clone(),
            intent: self.intent.clone(),
        }
    }
}

// -----------------------------------------------------------------------------
// Evaluation context
// -----------------------------------------------------------------------------

/// A single named reading within a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reading {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl Reading {
    fn type_name(&self) -> &'static str {
        match self {
            Reading::Flag(_) => "flag",
            Reading::Number(_) => "number",
            Reading::Text(_) => "text",
        }
    }
}

impl From<f64> for Reading {
    fn from(v: f64) -> Self {
        Reading::Number(v)
    }
}

impl From<i64> for Reading {
    fn from(v: i64) -> Self {
        Reading::Number(v as f64)
    }
}

impl From<bool> for Reading {
    fn from(v: bool) -> Self {
        Reading::Flag(v)
    }
}

impl From<&str> for Reading {
    fn from(v: &str) -> Self {
        Reading::Text(v.to_string())
    }
}

/// Readings for one domain, keyed by reading name (e.g. `radiation_level`).
pub type Readings = BTreeMap<String, Reading>;

/// Domain name (e.g. `radiation`, `crime`) to its readings.
pub type DomainMap = BTreeMap<String, Readings>;

/// Which half of the context a domain belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Environmental,
    Socioeconomic,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Environmental => "environmental",
            Section::Socioeconomic => "socioeconomic",
        }
    }
}

/// Per-request snapshot of environmental and socioeconomic readings.
///
/// Every domain is optional. Built once per request and passed by reference; never shared
/// mutable state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
    #[serde(default)]
    pub environmental: DomainMap,
    #[serde(default)]
    pub socioeconomic: DomainMap,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used by collaborators and tests.
    pub fn with_reading(
        mut self,
        section: Section,
        domain: &str,
        key: &str,
        value: impl Into<Reading>,
    ) -> Self {
        self.section_mut(section)
            .entry(domain.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
        self
    }

    pub fn env(self, domain: &str, key: &str, value: impl Into<Reading>) -> Self {
        self.with_reading(Section::Environmental, domain, key, value)
    }

    pub fn socio(self, domain: &str, key: &str, value: impl Into<Reading>) -> Self {
        self.with_reading(Section::Socioeconomic, domain, key, value)
    }

    pub fn section(&self, section: Section) -> &DomainMap {
        match section {
            Section::Environmental => &self.environmental,
            Section::Socioeconomic => &self.socioeconomic,
        }
    }

    fn section_mut(&mut self, section: Section) -> &mut DomainMap {
        match section {
            Section::Environmental => &mut self.environmental,
            Section::Socioeconomic => &mut self.socioeconomic,
        }
    }

    /// Inserts a whole domain (replacing any previous readings for it).
    pub fn insert_domain(&mut self, section: Section, domain: impl Into<String>, readings: Readings) {
        self.section_mut(section).insert(domain.into(), readings);
    }

    pub fn is_empty(&self) -> bool {
        self.environmental.is_empty() && self.socioeconomic.is_empty()
    }

    pub fn reading(&self, section: Section, domain: &str, key: &str) -> Option<&Reading> {
        self.section(section).get(domain).and_then(|r| r.get(key))
    }

    /// Numeric reading. `Ok(None)` when absent, `Err` when present with another type.
    pub fn number(&self, section: Section, domain: &str, key: &str) -> EvalResult<Option<f64>> {
        match self.reading(section, domain, key) {
            None => Ok(None),
            Some(Reading::Number(v)) => Ok(Some(*v)),
            Some(_) => Err(self.malformed(section, domain, key, "number")),
        }
    }

    /// Boolean reading. `Ok(None)` when absent, `Err` when present with another type.
    pub fn flag(&self, section: Section, domain: &str, key: &str) -> EvalResult<Option<bool>> {
        match self.reading(section, domain, key) {
            None => Ok(None),
            Some(Reading::Flag(v)) => Ok(Some(*v)),
            Some(_) => Err(self.malformed(section, domain, key, "flag")),
        }
    }

    /// Text reading. `Ok(None)` when absent, `Err` when present with another type.
    pub fn text(&self, section: Section, domain: &str, key: &str) -> EvalResult<Option<&str>> {
        match self.reading(section, domain, key) {
            None => Ok(None),
            Some(Reading::Text(v)) => Ok(Some(v.as_str())),
            Some(_) => Err(self.malformed(section, domain, key, "text")),
        }
    }

    fn malformed(&self, section: Section, domain: &str, key: &str, expected: &'static str) -> EvalError {
        EvalError::MalformedReading {
            section: section.as_str(),
            domain: domain.to_string(),
            key: key.to_string(),
            expected,
            found: self
                .reading(section, domain, key)
                .map(Reading::type_name)
                .unwrap_or("nothing"),
        }
    }

    /// Short input summary for log lines: populated domain names only, never readings.
    pub fn summary(&self) -> String {
        let env: Vec<&str> = self.environmental.keys().map(String::as_str).collect();
        let socio: Vec<&str> = self.socioeconomic.keys().map(String::as_str).collect();
        format!("env=[{}] socio=[{}]", env.join(","), socio.join(","))
    }
}

// -----------------------------------------------------------------------------
// Risk flags
// -----------------------------------------------------------------------------

/// Derived, per-evaluation risk summary. All false for an empty context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFlags {
    pub human_safety_risk: bool,
    pub environmental_damage_risk: bool,
    pub global_catastrophe_risk: bool,
    pub societal_risk: bool,
}

impl RiskFlags {
    pub fn any(&self) -> bool {
        self.human_safety_risk
            || self.environmental_damage_risk
            || self.global_catastrophe_risk
            || self.societal_risk
    }
}

// -----------------------------------------------------------------------------
// Violations and decisions
// -----------------------------------------------------------------------------

/// The first (lowest-tier) law an order breaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub tier: u8,
    pub reason: String,
}

/// Final outcome reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Allowed,
    Blocked,
    PendingApproval,
    ShutdownTriggered,
    MitigationTriggered,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Allowed => "allowed",
            Outcome::Blocked => "blocked",
            Outcome::PendingApproval => "pending_approval",
            Outcome::ShutdownTriggered => "shutdown_triggered",
            Outcome::MitigationTriggered => "mitigation_triggered",
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Outcome::Allowed)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured result of `process`: `{outcome, violation?, fingerprint}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation: Option<Violation>,
    pub fingerprint: Fingerprint,
}

impl Decision {
    pub fn allowed(fingerprint: Fingerprint) -> Self {
        Self {
            outcome: Outcome::Allowed,
            violation: None,
            fingerprint,
        }
    }

    pub fn new(outcome: Outcome, violation: Option<Violation>, fingerprint: Fingerprint) -> Self {
        Self {
            outcome,
            violation,
            fingerprint,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// Human-authorized override stored against a fingerprint. Last write wins; never expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub fingerprint: Fingerprint,
    pub decision_payload: Decision,
    pub authorized_user: String,
    pub timestamp: DateTime<Utc>,
}

impl CorrectionRecord {
    pub fn new(fingerprint: Fingerprint, decision_payload: Decision, authorized_user: impl Into<String>) -> Self {
        Self {
            fingerprint,
            decision_payload,
            authorized_user: authorized_user.into(),
            timestamp: Utc::now(),
        }
    }

    /// Serializes to JSON bytes for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserializes from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_normalized_collapses_whitespace() {
        let order = Order::new("  Harm   a\tHUMAN ");
        assert_eq!(order.normalized(), "harm a human");
    }

    #[test]
    fn test_context_typed_accessors() {
        let ctx = EvaluationContext::new()
            .env("radiation", "radiation_level", 80.0)
            .env("radiation", "radiation_type", "gamma")
            .socio("economic_data", "resource_depletion", true);

        assert_eq!(ctx.number(Section::Environmental, "radiation", "radiation_level"), Ok(Some(80.0)));
        assert_eq!(ctx.text(Section::Environmental, "radiation", "radiation_type"), Ok(Some("gamma")));
        assert_eq!(ctx.flag(Section::Socioeconomic, "economic_data", "resource_depletion"), Ok(Some(true)));
        assert_eq!(ctx.number(Section::Environmental, "seismic", "seismic_activity"), Ok(None));
        assert!(ctx.number(Section::Environmental, "radiation", "radiation_type").is_err());
    }

    #[test]
    fn test_context_deserializes_mixed_readings() {
        let ctx: EvaluationContext = serde_json::from_str(
            r#"{"environmental":{"radiation":{"radiation_level":80,"radiation_type":"gamma"}}}"#,
        )
        .unwrap();
        assert_eq!(
            ctx.reading(Section::Environmental, "radiation", "radiation_level"),
            Some(&Reading::Number(80.0))
        );
        assert!(ctx.socioeconomic.is_empty());
        assert_eq!(ctx.summary(), "env=[radiation] socio=[]");
    }

    #[test]
    fn test_decision_json_shape() {
        let decision = Decision::allowed(Fingerprint::from_hex("ab"));
        let json = decision.to_json().unwrap();
        assert_eq!(json["outcome"], "allowed");
        assert_eq!(json["fingerprint"], "ab");
        assert!(json.get("violation").is_none());
    }
}
