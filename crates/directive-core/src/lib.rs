//! directive-core: tiered law evaluation for requested actions ("orders").
//!
//! A request is fingerprinted, checked against human-issued corrections, evaluated against a
//! tier-ordered law table with a per-request context snapshot, and escalated on the first
//! violation (shutdown, mitigation, approval, or block).

mod config;
mod context;
mod corrections;
mod error;
mod fingerprint;
mod pipeline;
mod risk;
mod shared;
pub mod escalation;
pub mod policy;

// Shared types
pub use shared::{
    CorrectionRecord, Decision, DomainMap, EvaluationContext, Order, OrderRequest, Outcome, Reading, Readings,
    RiskFlags, Section, Violation,
};

// Errors
pub use error::{
    ContextError, EscalationError, EvalError, EvalResult, PipelineError, PipelineResult, RuleBookError,
    StoreError,
};

// Configuration
pub use config::{ApprovalMode, DirectiveConfig, CONFIG_PATH_ENV};

// Fingerprinting + correction store
pub use corrections::{CorrectionStore, MemoryCorrectionStore, SledCorrectionStore};
pub use fingerprint::{canonical_json, fingerprint, Fingerprint};

// Context + risk synthesis
pub use context::{
    ContextAggregator, DomainSource, SourceAggregator, StaticAggregator, StaticSource, DEFAULT_DOMAIN_TIMEOUT,
};
pub use risk::{synthesize, Check, Clause, RiskKind, RiskSynthesizer, Threshold};

// Laws
pub use policy::{
    EscalationKind, Finding, LawSummary, LegalComplianceEvaluator, PolicyHierarchy, PolicyRule, RuleBook,
};

// Escalation
pub use escalation::{ApprovalBridge, ApprovalRequest, EscalationDispatcher};

// Pipeline
pub use pipeline::DecisionPipeline;
