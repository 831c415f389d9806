//! Side-effect hooks invoked by the dispatcher: alerting, termination, remediation and
//! incident reporting. All of them are external collaborators behind traits.

use crate::error::EscalationError;
use crate::shared::{EvaluationContext, Section};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, warn};

/// Alertmanager POST timeout.
pub const ALERT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Critical => "critical",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Info => "info",
        }
    }
}

// ---------------------------------------------------------------------------
// Alerting
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Alerter: Send + Sync {
    async fn alert(
        &self,
        message: &str,
        severity: AlertSeverity,
        grouping_key: &str,
    ) -> Result<(), EscalationError>;
}

/// Posts to an Alertmanager `/api/v2/alerts` style endpoint.
pub struct AlertmanagerAlerter {
    client: reqwest::Client,
    url: String,
}

impl AlertmanagerAlerter {
    pub fn new(url: impl Into<String>) -> Result<Self, EscalationError> {
        let client = reqwest::Client::builder().timeout(ALERT_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Request body for one alert.
    pub fn payload(message: &str, severity: AlertSeverity, grouping_key: &str) -> serde_json::Value {
        json!({
            "alerts": [{
                "annotations": {
                    "description": message,
                    "summary": "Directive shutdown",
                },
                "labels": {
                    "severity": severity.as_str(),
                    "grouping_key": grouping_key,
                },
            }]
        })
    }
}

#[async_trait]
impl Alerter for AlertmanagerAlerter {
    async fn alert(
        &self,
        message: &str,
        severity: AlertSeverity,
        grouping_key: &str,
    ) -> Result<(), EscalationError> {
        let body = Self::payload(message, severity, grouping_key);
        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EscalationError::Alert(format!(
                "{} returned {}",
                self.url, status
            )));
        }
        info!(url = %self.url, grouping_key, severity = severity.as_str(), "Alert delivered");
        Ok(())
    }
}

/// Writes the alert to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    async fn alert(
        &self,
        message: &str,
        severity: AlertSeverity,
        grouping_key: &str,
    ) -> Result<(), EscalationError> {
        error!(severity = severity.as_str(), grouping_key, "ALERT: {}", message);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Termination
// ---------------------------------------------------------------------------

pub trait Terminator: Send + Sync {
    fn terminate(&self, reason: &str);
}

/// Exits the process with status 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessTerminator;

impl Terminator for ProcessTerminator {
    fn terminate(&self, reason: &str) {
        error!(reason, "Terminating process");
        std::process::exit(1);
    }
}

/// Leaves the process running; the pipeline's halt latch still applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct HaltOnlyTerminator;

impl Terminator for HaltOnlyTerminator {
    fn terminate(&self, reason: &str) {
        warn!(reason, "Shutdown requested; pipeline halted, process left running");
    }
}

// ---------------------------------------------------------------------------
// Remediation
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Remediator: Send + Sync {
    async fn mitigate(&self, context: &EvaluationContext) -> Result<(), EscalationError>;

    async fn repair(&self, context: &EvaluationContext) -> Result<(), EscalationError>;
}

/// Repair suggestions for the environmental domains present in `context`.
pub fn repair_suggestions(context: &EvaluationContext) -> Vec<&'static str> {
    const BY_DOMAIN: &[(&str, &str)] = &[
        ("deforestation", "Replant native trees in cleared area"),
        ("vegetation", "Replant native trees in cleared area"),
        ("fauna", "Create wildlife corridor around affected site"),
        ("biodiversity", "Create wildlife corridor around affected site"),
        ("erosion", "Install erosion control barriers"),
        ("soil_quality", "Install erosion control barriers"),
        ("water_quality", "Contain runoff and schedule water treatment"),
        ("industrial_pollution", "Contain runoff and schedule water treatment"),
        ("air_quality", "Reduce emissions at nearby sources"),
    ];

    let env = context.section(Section::Environmental);
    let mut out: Vec<&'static str> = Vec::new();
    for (domain, suggestion) in BY_DOMAIN {
        if env.contains_key(*domain) && !out.contains(suggestion) {
            out.push(*suggestion);
        }
    }
    out.push("Monitor biodiversity recovery annually");
    out
}

/// Logs mitigation and the repair plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingRemediator;

#[async_trait]
impl Remediator for LoggingRemediator {
    async fn mitigate(&self, context: &EvaluationContext) -> Result<(), EscalationError> {
        info!(context = %context.summary(), "Initiating environmental damage mitigation");
        Ok(())
    }

    async fn repair(&self, context: &EvaluationContext) -> Result<(), EscalationError> {
        let suggestions = repair_suggestions(context);
        info!(suggestions = ?suggestions, "Initiating environmental damage repair");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Incident reporting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentReport {
    pub report_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_details: String,
    pub context: EvaluationContext,
}

impl IncidentReport {
    pub fn new(event_details: impl Into<String>, context: &EvaluationContext) -> Self {
        Self {
            report_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_details: event_details.into(),
            context: context.clone(),
        }
    }
}

#[async_trait]
pub trait IncidentReporter: Send + Sync {
    /// Files a report and returns its id.
    async fn report(
        &self,
        event_details: &str,
        context: &EvaluationContext,
    ) -> Result<String, EscalationError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogIncidentReporter;

#[async_trait]
impl IncidentReporter for LogIncidentReporter {
    async fn report(
        &self,
        event_details: &str,
        context: &EvaluationContext,
    ) -> Result<String, EscalationError> {
        let report = IncidentReport::new(event_details, context);
        warn!(
            report_id = %report.report_id,
            timestamp = %report.timestamp.to_rfc3339(),
            context = %context.summary(),
            "Incident: {}",
            event_details
        );
        Ok(report.report_id)
    }
}

/// Persists reports in the `incidents` tree, keyed by report id.
pub struct SledIncidentReporter {
    tree: sled::Tree,
}

impl SledIncidentReporter {
    pub fn from_db(db: &sled::Db) -> Result<Self, EscalationError> {
        let tree = db
            .open_tree("incidents")
            .map_err(|e| EscalationError::Report(e.to_string()))?;
        Ok(Self { tree })
    }

    pub fn get(&self, report_id: &str) -> Result<Option<IncidentReport>, EscalationError> {
        let Some(bytes) = self
            .tree
            .get(report_id.as_bytes())
            .map_err(|e| EscalationError::Report(e.to_string()))?
        else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| EscalationError::Report(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

#[async_trait]
impl IncidentReporter for SledIncidentReporter {
    async fn report(
        &self,
        event_details: &str,
        context: &EvaluationContext,
    ) -> Result<String, EscalationError> {
        let report = IncidentReport::new(event_details, context);
        let bytes = serde_json::to_vec(&report).map_err(|e| EscalationError::Report(e.to_string()))?;
        self.tree
            .insert(report.report_id.as_bytes(), bytes)
            .map_err(|e| EscalationError::Report(e.to_string()))?;
        self.tree
            .flush_async()
            .await
            .map_err(|e| EscalationError::Report(e.to_string()))?;
        info!(report_id = %report.report_id, "Incident report filed");
        Ok(report.report_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alertmanager_payload_shape() {
        let body = AlertmanagerAlerter::payload("law human_life violated", AlertSeverity::Critical, "human_life");
        let alert = &body["alerts"][0];
        assert_eq!(alert["annotations"]["description"], "law human_life violated");
        assert_eq!(alert["labels"]["severity"], "critical");
        assert_eq!(alert["labels"]["grouping_key"], "human_life");
    }

    #[tokio::test]
    async fn test_unreachable_alertmanager_is_an_error() {
        let alerter = AlertmanagerAlerter::new("http://127.0.0.1:9/api/v2/alerts").unwrap();
        let result = alerter.alert("x", AlertSeverity::Warning, "k").await;
        assert!(result.is_err());
    }

    #[test]
    fn test_repair_suggestions_follow_present_domains() {
        let ctx = EvaluationContext::new()
            .env("deforestation", "level", 90.0)
            .env("vegetation", "cover", 0.1)
            .env("erosion", "level", 8.0);
        let suggestions = repair_suggestions(&ctx);
        assert_eq!(
            suggestions,
            vec![
                "Replant native trees in cleared area",
                "Install erosion control barriers",
                "Monitor biodiversity recovery annually",
            ]
        );
        assert_eq!(repair_suggestions(&EvaluationContext::new()).len(), 1);
    }

    #[tokio::test]
    async fn test_sled_reporter_persists_reports() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let reporter = SledIncidentReporter::from_db(&db).unwrap();
        let ctx = EvaluationContext::new().env("radiation", "radiation_level", 300.0);

        let id = reporter.report("law human_life violated", &ctx).await.unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());

        let report = reporter.get(&id).unwrap().expect("stored");
        assert_eq!(report.event_details, "law human_life violated");
        assert_eq!(report.context, ctx);
        assert_eq!(reporter.len(), 1);
    }
}
