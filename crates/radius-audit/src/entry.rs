//! Audit entry construction.

use chrono::{SecondsFormat, Utc};
use radius_core::{CanonicalEvent, Decision, PipelineResult};
use serde::Serialize;
use serde_json::Value;

/// Tool-result summary recorded instead of the full text.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    /// Whether the orchestrator flagged an error.
    pub is_error: bool,
    /// Length of the result text in bytes.
    pub text_length: usize,
}

/// Provenance fields recorded for artifact events.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSummary {
    /// Artifact kind.
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Source URI.
    pub source_uri: Option<String>,
    /// Whether a signature was verified.
    pub signature_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Signer identity.
    pub signer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// SBOM location.
    pub sbom_uri: Option<String>,
    /// Whether the source reference is pinned.
    pub version_pinned: bool,
}

/// One line of the audit log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// ISO-8601 timestamp with millisecond precision.
    pub timestamp: String,
    /// Event phase.
    pub phase: String,
    /// Originating framework.
    pub framework: String,
    /// Session id.
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// End-user id.
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Agent name.
    pub agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Tool name.
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Tool arguments, included only when configured.
    pub tool_arguments: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Tool result summary, included only when configured.
    pub tool_result: Option<ResultSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Artifact provenance fields.
    pub artifact: Option<ArtifactSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Decision chain of a completed pipeline run.
    pub decisions: Option<Vec<DecisionSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Final action of a completed pipeline run.
    pub final_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Alert lines of a completed pipeline run.
    pub alerts: Option<Vec<String>>,
}

/// Decision chain element.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionSummary {
    /// Verdict.
    pub action: String,
    /// Module that produced it.
    pub module: String,
    /// Reason text.
    pub reason: String,
    /// Severity.
    pub severity: String,
}

impl From<&Decision> for DecisionSummary {
    fn from(decision: &Decision) -> Self {
        Self {
            action: decision.action.as_str().to_owned(),
            module: decision.module.clone(),
            reason: decision.reason.clone(),
            severity: decision.severity.as_str().to_owned(),
        }
    }
}

impl AuditEntry {
    /// Entry for an event as it enters the pipeline.
    #[must_use]
    pub fn for_event(
        event: &CanonicalEvent,
        include_arguments: bool,
        include_results: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            phase: event.phase.as_str().to_owned(),
            framework: event.framework.as_str().to_owned(),
            session_id: event.session_id.clone(),
            user_id: event.user_id.clone(),
            agent_name: event.agent_name.clone(),
            tool_name: event.tool_name().map(str::to_owned),
            tool_arguments: if include_arguments {
                event
                    .tool_call
                    .as_ref()
                    .map(|c| Value::Object(c.arguments.clone()))
            } else {
                None
            },
            tool_result: if include_results {
                event.tool_result.as_ref().map(|r| ResultSummary {
                    is_error: r.is_error,
                    text_length: r.text.len(),
                })
            } else {
                None
            },
            artifact: event.artifact.as_ref().map(|a| ArtifactSummary {
                kind: a.kind.as_str().to_owned(),
                source_uri: a.source_uri.clone(),
                signature_verified: a.signature_verified,
                signer: a.signer.clone(),
                sbom_uri: a.sbom_uri.clone(),
                version_pinned: a.version_pinned,
            }),
            decisions: None,
            final_action: None,
            alerts: None,
        }
    }

    /// Entry for a completed pipeline result.
    #[must_use]
    pub fn for_result(
        event: &CanonicalEvent,
        result: &PipelineResult,
        include_arguments: bool,
        include_results: bool,
    ) -> Self {
        let mut entry = Self::for_event(event, include_arguments, include_results);
        entry.decisions = Some(result.decisions.iter().map(DecisionSummary::from).collect());
        entry.final_action = Some(result.final_action.as_str().to_owned());
        if !result.alerts.is_empty() {
            entry.alerts = Some(result.alerts.clone());
        }
        entry
    }

    /// Serialize to one JSONL line (no trailing newline).
    #[must_use]
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_owned())
    }

    /// Wrap the entry in OTLP-JSON log-record form.
    #[must_use]
    pub fn to_otlp(&self) -> Value {
        serde_json::json!({
            "resourceLogs": [{
                "resource": {
                    "attributes": [{
                        "key": "service.name",
                        "value": {"stringValue": "radius"}
                    }]
                },
                "scopeLogs": [{
                    "scope": {"name": "radius-audit"},
                    "logRecords": [{
                        "timeUnixNano": Utc::now()
                            .timestamp_nanos_opt()
                            .unwrap_or_default()
                            .to_string(),
                        "body": {"stringValue": self.to_line()},
                    }]
                }]
            }]
        })
    }
}
