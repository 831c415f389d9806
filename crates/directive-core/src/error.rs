//! Error types for the directive decision core.

use thiserror::Error;

/// Result type alias for a single law's evaluation.
pub type EvalResult<T> = Result<T, EvalError>;

/// Result type alias for pipeline entry points.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Fault inside one law's predicate. Caught at the rule boundary and treated as "no violation".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("reading {section}.{domain}.{key} is a {found}, expected a {expected}")]
    MalformedReading {
        section: &'static str,
        domain: String,
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("compliance evaluator failed: {0}")]
    Compliance(String),

    #[error("predicate failed: {0}")]
    Predicate(String),
}

/// Correction store failures (CacheUnavailable).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("correction store open failed: {0}")]
    Open(String),

    #[error("correction store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt correction record for {fingerprint}: {reason}")]
    Corrupt { fingerprint: String, reason: String },

    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Context aggregation failures. A failed domain is DataUnavailable; `Unreachable` is fatal.
#[derive(Error, Debug, Clone)]
pub enum ContextError {
    #[error("domain {domain} unavailable: {reason}")]
    DataUnavailable { domain: String, reason: String },

    #[error("domain {domain} timed out after {timeout_ms}ms")]
    Timeout { domain: String, timeout_ms: u64 },

    #[error("context aggregator unreachable: {0}")]
    Unreachable(String),
}

/// Side-channel delivery failures (alert, incident report). Never fatal to a decision.
#[derive(Error, Debug)]
pub enum EscalationError {
    #[error("alert delivery failed: {0}")]
    Alert(String),

    #[error("incident report failed: {0}")]
    Report(String),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
}

/// Rule book loading failures.
#[derive(Error, Debug)]
pub enum RuleBookError {
    #[error("rule book parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("rule {rule_id}: invalid pattern {pattern:?}: {reason}")]
    Pattern {
        rule_id: String,
        pattern: String,
        reason: String,
    },

    #[error("rule {rule_id}: unknown predicate {predicate:?}")]
    UnknownPredicate { rule_id: String, predicate: String },

    #[error("duplicate rule id {0}")]
    DuplicateRule(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced to callers of the pipeline. Policy outcomes are never errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("context unavailable: {0}")]
    Context(#[from] ContextError),

    #[error("correction store: {0}")]
    Store(#[from] StoreError),

    #[error("pipeline halted after shutdown: {0}")]
    Halted(String),

    #[error("rule book: {0}")]
    Rules(#[from] RuleBookError),

    #[error("escalation setup: {0}")]
    Escalation(#[from] EscalationError),

    #[error("config: {0}")]
    Config(#[from] config::ConfigError),

    #[error("evaluation task failed: {0}")]
    Task(String),
}
