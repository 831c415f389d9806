//! DecisionPipeline: fingerprint → correction lookup → context → risk → laws → escalation.
//!
//! `process` never writes the correction store; `correct` is the only writer. Once a shutdown
//! escalation fires, every later `process` call on the same pipeline returns
//! `PipelineError::Halted`, as does any call still waiting for an operator approval.

use crate::config::{ApprovalMode, DirectiveConfig};
use crate::context::ContextAggregator;
use crate::corrections::{CorrectionStore, SledCorrectionStore};
use crate::error::{PipelineError, PipelineResult, StoreError};
use crate::escalation::{
    Alerter, AlertmanagerAlerter, ApprovalBridge, ApprovalGate, DeferredApproval, EscalationDispatcher,
    HaltOnlyTerminator, LogAlerter, ProcessTerminator, SledIncidentReporter, Terminator,
};
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::policy::{LawSummary, PolicyHierarchy};
use crate::risk::RiskSynthesizer;
use crate::shared::{CorrectionRecord, Decision, OrderRequest};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

pub struct DecisionPipeline {
    store: Arc<dyn CorrectionStore>,
    aggregator: Arc<dyn ContextAggregator>,
    synthesizer: RiskSynthesizer,
    hierarchy: PolicyHierarchy,
    dispatcher: EscalationDispatcher,
    approval_bridge: Option<ApprovalBridge>,
    max_concurrent: usize,
}

impl DecisionPipeline {
    /// Pipeline with the default dispatcher (log-only hooks, deferred approvals).
    pub fn new(
        store: Arc<dyn CorrectionStore>,
        aggregator: Arc<dyn ContextAggregator>,
        hierarchy: PolicyHierarchy,
    ) -> Self {
        Self {
            store,
            aggregator,
            synthesizer: RiskSynthesizer::default(),
            hierarchy,
            dispatcher: EscalationDispatcher::default(),
            approval_bridge: None,
            max_concurrent: 16,
        }
    }

    /// Wires storage, rule book, alerting and approvals from config.
    pub fn from_config(config: &DirectiveConfig, aggregator: Arc<dyn ContextAggregator>) -> PipelineResult<Self> {
        let db = sled::open(config.storage_path())
            .map_err(|e| StoreError::Open(format!("{}: {}", config.storage_path, e)))?;
        let store = SledCorrectionStore::from_db(&db)?;
        let reporter = SledIncidentReporter::from_db(&db)?;

        let hierarchy = match &config.rules_path {
            Some(path) => PolicyHierarchy::load(path)?,
            None => PolicyHierarchy::builtin()?,
        };

        let alerter: Arc<dyn Alerter> = match &config.alertmanager_url {
            Some(url) => Arc::new(AlertmanagerAlerter::new(url.clone())?),
            None => Arc::new(LogAlerter),
        };
        let terminator: Arc<dyn Terminator> = if config.terminate_process {
            Arc::new(ProcessTerminator)
        } else {
            Arc::new(HaltOnlyTerminator)
        };

        let mut dispatcher = EscalationDispatcher::new()
            .with_alerter(alerter)
            .with_terminator(terminator)
            .with_reporter(Arc::new(reporter));
        let mut approval_bridge = None;
        match config.approval_mode {
            ApprovalMode::Wait => {
                let bridge = ApprovalBridge::new();
                dispatcher = dispatcher.with_approvals(Arc::new(bridge.clone()));
                approval_bridge = Some(bridge);
            }
            ApprovalMode::Defer => {
                dispatcher = dispatcher.with_approvals(Arc::new(DeferredApproval));
            }
        }

        info!(
            storage_path = %config.storage_path,
            laws = hierarchy.len(),
            approval_mode = ?config.approval_mode,
            "Decision pipeline ready"
        );

        Ok(Self {
            store: Arc::new(store),
            aggregator,
            synthesizer: RiskSynthesizer::default(),
            hierarchy,
            dispatcher,
            approval_bridge,
            max_concurrent: config.max_concurrent_orders.max(1),
        })
    }

    pub fn with_dispatcher(mut self, dispatcher: EscalationDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Installs `bridge` as the approval gate and keeps a handle for operators.
    pub fn with_approval_bridge(mut self, bridge: ApprovalBridge) -> Self {
        self.dispatcher = self.dispatcher.with_approvals(Arc::new(bridge.clone()) as Arc<dyn ApprovalGate>);
        self.approval_bridge = Some(bridge);
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: RiskSynthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn approval_bridge(&self) -> Option<&ApprovalBridge> {
        self.approval_bridge.as_ref()
    }

    pub fn is_halted(&self) -> bool {
        self.dispatcher.is_halted()
    }

    pub fn summaries(&self) -> Vec<LawSummary> {
        self.hierarchy.summaries()
    }

    fn ensure_running(&self) -> PipelineResult<()> {
        match self.dispatcher.halt_reason() {
            Some(reason) => Err(PipelineError::Halted(reason.to_string())),
            None => Ok(()),
        }
    }

    /// Evaluates one raw request payload.
    pub async fn process(&self, payload: &Value) -> PipelineResult<Decision> {
        self.ensure_running()?;

        let fp = fingerprint(payload);
        match self.store.get(&fp) {
            Ok(Some(record)) => {
                info!(
                    fingerprint = %fp,
                    authorized_user = %record.authorized_user,
                    outcome = %record.decision_payload.outcome,
                    "Correction hit; returning stored decision"
                );
                return Ok(record.decision_payload);
            }
            Ok(None) => {}
            Err(e) => {
                error!(fingerprint = %fp, error = %e, "Correction store unavailable; treating as miss");
            }
        }

        let request: OrderRequest =
            serde_json::from_value(payload.clone()).map_err(|e| PipelineError::InvalidPayload(e.to_string()))?;
        let order = request.to_order();

        let context = self.aggregator.snapshot(request.location.as_deref()).await?;
        let flags = self.synthesizer.synthesize(&context);
        debug!(fingerprint = %fp, context = %context.summary(), flags = ?flags, "Context synthesized");

        let Some(finding) = self.hierarchy.scan(&order, &flags, &context) else {
            info!(fingerprint = %fp, outcome = "allowed", "Order allowed");
            return Ok(Decision::allowed(fp));
        };

        // Another request may have latched a shutdown while this one was scanning.
        self.ensure_running()?;
        self.dispatcher.dispatch(&finding, &order, &fp, &context).await
    }

    /// Parses `raw` as JSON and evaluates it.
    pub async fn process_json(&self, raw: &str) -> PipelineResult<Decision> {
        let payload: Value = serde_json::from_str(raw).map_err(|e| PipelineError::InvalidPayload(e.to_string()))?;
        self.process(&payload).await
    }

    /// Evaluates payloads concurrently, at most `max_concurrent` at a time. Results keep input
    /// order. Payloads still queued when a shutdown fires come back as `Halted`.
    pub async fn process_batch(self: &Arc<Self>, payloads: Vec<Value>) -> Vec<PipelineResult<Decision>> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(payloads.len());

        for payload in payloads {
            let pipeline = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| PipelineError::Task(e.to_string()))?;
                pipeline.process(&payload).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) => Err(PipelineError::Task(e.to_string())),
            });
        }
        results
    }

    /// Records a human-authorized override. The only write path into the store.
    pub fn correct(
        &self,
        fingerprint: &Fingerprint,
        decision: Decision,
        authorized_user: &str,
    ) -> PipelineResult<CorrectionRecord> {
        if authorized_user.trim().is_empty() {
            return Err(PipelineError::InvalidPayload("authorized_user is required".to_string()));
        }
        if decision.fingerprint != *fingerprint {
            warn!(
                fingerprint = %fingerprint,
                decision_fingerprint = %decision.fingerprint,
                "Correction decision carries a different fingerprint; storing as given"
            );
        }
        Ok(self.store.put(fingerprint, decision, authorized_user)?)
    }

    pub fn get_correction(&self, fingerprint: &Fingerprint) -> PipelineResult<Option<CorrectionRecord>> {
        Ok(self.store.get(fingerprint)?)
    }
}
