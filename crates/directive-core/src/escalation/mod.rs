//! Escalation dispatch: turns the first violation of a scan into exactly one action.
//!
//! - `Shutdown`: latch the halt, alert, terminate. Later requests on the same dispatcher are
//!   refused with `PipelineError::Halted`, and requests still waiting on an approval are
//!   abandoned with the same error.
//! - `Mitigate`: refuse the order and run mitigate-then-repair in the background.
//! - `RequestApproval`: wait on the approval gate.
//! - `Block`: refuse.
//!
//! Reportable violations file an incident report first. Side-channel failures (alert, report,
//! remediation) are logged and never change the outcome.

pub mod approval;
pub mod hooks;

pub use approval::{
    ApprovalBridge, ApprovalGate, ApprovalRequest, ApprovalResolution, DeferredApproval, PendingApproval,
};
pub use hooks::{
    repair_suggestions, AlertSeverity, Alerter, AlertmanagerAlerter, HaltOnlyTerminator, IncidentReport,
    IncidentReporter, LogAlerter, LogIncidentReporter, LoggingRemediator, ProcessTerminator, Remediator,
    SledIncidentReporter, Terminator,
};

use crate::error::{PipelineError, PipelineResult};
use crate::fingerprint::Fingerprint;
use crate::policy::{EscalationKind, Finding};
use crate::shared::{Decision, EvaluationContext, Order, Outcome};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct EscalationDispatcher {
    alerter: Arc<dyn Alerter>,
    terminator: Arc<dyn Terminator>,
    remediator: Arc<dyn Remediator>,
    reporter: Arc<dyn IncidentReporter>,
    approvals: Arc<dyn ApprovalGate>,
    halted: OnceLock<String>,
    /// Flips to true when `halted` latches; wakes approval waiters.
    halt_signal: watch::Sender<bool>,
}

impl Default for EscalationDispatcher {
    /// Log-only hooks, no process exit, deferred approvals.
    fn default() -> Self {
        Self {
            alerter: Arc::new(LogAlerter),
            terminator: Arc::new(HaltOnlyTerminator),
            remediator: Arc::new(LoggingRemediator),
            reporter: Arc::new(LogIncidentReporter),
            approvals: Arc::new(DeferredApproval),
            halted: OnceLock::new(),
            halt_signal: watch::channel(false).0,
        }
    }
}

impl EscalationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alerter(mut self, alerter: Arc<dyn Alerter>) -> Self {
        self.alerter = alerter;
        self
    }

    pub fn with_terminator(mut self, terminator: Arc<dyn Terminator>) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn with_remediator(mut self, remediator: Arc<dyn Remediator>) -> Self {
        self.remediator = remediator;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn IncidentReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_approvals(mut self, approvals: Arc<dyn ApprovalGate>) -> Self {
        self.approvals = approvals;
        self
    }

    pub fn is_halted(&self) -> bool {
        self.halted.get().is_some()
    }

    /// Why the dispatcher halted, if it has.
    pub fn halt_reason(&self) -> Option<&str> {
        self.halted.get().map(String::as_str)
    }

    fn ensure_running(&self) -> PipelineResult<()> {
        match self.halt_reason() {
            Some(reason) => Err(PipelineError::Halted(reason.to_string())),
            None => Ok(()),
        }
    }

    /// Performs the finding's escalation and returns the resulting decision.
    ///
    /// Fails with `Halted` only when a shutdown latches while this call waits for an approval.
    pub async fn dispatch(
        &self,
        finding: &Finding,
        order: &Order,
        fingerprint: &Fingerprint,
        context: &EvaluationContext,
    ) -> PipelineResult<Decision> {
        let violation = &finding.violation;
        let message = format!(
            "law {} (tier {}) violated by order '{}': {}",
            violation.rule_id, violation.tier, order.text, violation.reason
        );

        if finding.reportable {
            match self.reporter.report(&message, context).await {
                Ok(report_id) => info!(report_id = %report_id, rule_id = %violation.rule_id, "Incident reported"),
                Err(e) => error!(rule_id = %violation.rule_id, error = %e, "Incident report failed"),
            }
        }

        let outcome = match finding.escalation {
            EscalationKind::Shutdown => {
                if self.halted.set(message.clone()).is_err() {
                    warn!(rule_id = %violation.rule_id, "Shutdown already latched; hooks not fired again");
                } else {
                    self.halt_signal.send_replace(true);
                    if let Err(e) = self
                        .alerter
                        .alert(&message, AlertSeverity::Critical, &violation.rule_id)
                        .await
                    {
                        error!(rule_id = %violation.rule_id, error = %e, "Shutdown alert delivery failed");
                    }
                    self.terminator.terminate(&message);
                }
                Outcome::ShutdownTriggered
            }
            EscalationKind::Mitigate => {
                let remediator = Arc::clone(&self.remediator);
                let context = context.clone();
                let rule_id = violation.rule_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = remediator.mitigate(&context).await {
                        error!(rule_id = %rule_id, error = %e, "Mitigation failed");
                    }
                    if let Err(e) = remediator.repair(&context).await {
                        error!(rule_id = %rule_id, error = %e, "Repair failed");
                    }
                });
                Outcome::MitigationTriggered
            }
            EscalationKind::RequestApproval => {
                let request = ApprovalRequest::new(fingerprint.clone(), order.text.clone(), violation.clone());
                let resolution = tokio::select! {
                    resolution = self.approvals.request(request) => resolution,
                    _ = wait_for_halt(self.halt_signal.subscribe()) => {
                        warn!(fingerprint = %fingerprint, rule_id = %violation.rule_id, "Shutdown while awaiting approval; request abandoned");
                        return Err(PipelineError::Halted(self.halt_reason().unwrap_or("shutdown").to_string()));
                    }
                };
                // An answer can land in the same instant a shutdown latches.
                self.ensure_running()?;
                match resolution {
                    ApprovalResolution::Approved => Outcome::Allowed,
                    ApprovalResolution::Declined => Outcome::Blocked,
                    ApprovalResolution::Deferred => Outcome::PendingApproval,
                }
            }
            EscalationKind::Block => Outcome::Blocked,
        };

        info!(
            fingerprint = %fingerprint,
            rule_id = %violation.rule_id,
            outcome = %outcome,
            "Escalation dispatched"
        );
        Ok(Decision::new(outcome, Some(violation.clone()), fingerprint.clone()))
    }
}

async fn wait_for_halt(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|halted| *halted).await.is_err() {
        std::future::pending::<()>().await;
    }
}
