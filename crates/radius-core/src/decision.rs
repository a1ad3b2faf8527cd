//! Decision variants produced by policy modules.
//!
//! A module produces exactly one [`Decision`] per event. "Error" is not a
//! decision a module returns — the pipeline wrapper synthesizes a
//! fail-closed deny when an enforce-mode module raises.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::merge::deep_merge_maps;

/// Module verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Let the event proceed.
    Allow,
    /// Block the event.
    Deny,
    /// Let the event proceed with a transform applied.
    Modify,
    /// Block pending human approval.
    Challenge,
    /// Let the event proceed but surface a warning.
    Alert,
}

impl Action {
    /// The snake_case wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Modify => "modify",
            Self::Challenge => "challenge",
            Self::Alert => "alert",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How serious a decision is.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational.
    Info,
    /// Worth noticing.
    Medium,
    /// A policy boundary was crossed.
    High,
    /// A compromise signal or destructive action.
    Critical,
}

impl Severity {
    /// The snake_case wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Channel through which a challenge is put to a human.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalChannel {
    /// Return the challenge to the orchestrator and let it prompt.
    Orchestrator,
    /// Telegram inline-keyboard approval.
    #[default]
    Telegram,
    /// Discord approval.
    Discord,
    /// External HTTP approval bridge.
    Http,
}

impl ApprovalChannel {
    /// The snake_case wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::Telegram => "telegram",
            Self::Discord => "discord",
            Self::Http => "http",
        }
    }

    /// Parse a wire name. Unknown names return `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "orchestrator" => Some(Self::Orchestrator),
            "telegram" => Some(Self::Telegram),
            "discord" => Some(Self::Discord),
            "http" => Some(Self::Http),
            _ => None,
        }
    }
}

impl fmt::Display for ApprovalChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request for human approval carried by a challenge decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    /// Where to ask.
    pub channel: ApprovalChannel,
    /// What to show the human.
    pub prompt: String,
    /// How long to wait for an answer.
    pub timeout_seconds: u64,
}

/// Transform a modify decision applies to the event.
///
/// Scalar slots compose last-writer-wins across the pipeline;
/// `tool_arguments` composes by recursive deep merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Patch {
    /// Replacement request text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_text: Option<String>,
    /// Tool-argument overlay, deep-merged onto the current arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_arguments: Option<Map<String, Value>>,
    /// Replacement tool-result text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result_text: Option<String>,
    /// Replacement response text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
}

impl Patch {
    /// Whether the patch carries no transform at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.request_text.is_none()
            && self.tool_arguments.is_none()
            && self.tool_result_text.is_none()
            && self.response_text.is_none()
    }

    /// Compose `other` onto this patch.
    ///
    /// Scalar slots take `other`'s value when present (last writer wins);
    /// `tool_arguments` deep-merges, with `other`'s keys overriding
    /// recursively on nested mappings and replacing everything else.
    pub fn compose(&mut self, other: &Patch) {
        if let Some(text) = &other.request_text {
            self.request_text = Some(text.clone());
        }
        if let Some(text) = &other.tool_result_text {
            self.tool_result_text = Some(text.clone());
        }
        if let Some(text) = &other.response_text {
            self.response_text = Some(text.clone());
        }
        if let Some(overlay) = &other.tool_arguments {
            match &mut self.tool_arguments {
                Some(base) => deep_merge_maps(base, overlay),
                None => self.tool_arguments = Some(overlay.clone()),
            }
        }
    }
}

/// The single output a policy module produces per event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// The verdict.
    pub action: Action,
    /// Name of the module that produced it.
    pub module: String,
    /// Human-readable reason.
    pub reason: String,
    /// How serious it is.
    pub severity: Severity,
    /// Transform to apply (modify decisions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<Patch>,
    /// Approval request (challenge decisions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<ChallengeRequest>,
}

impl Decision {
    /// An allow decision.
    #[must_use]
    pub fn allow(module: impl Into<String>) -> Self {
        Self {
            action: Action::Allow,
            module: module.into(),
            reason: "ok".to_owned(),
            severity: Severity::Info,
            patch: None,
            challenge: None,
        }
    }

    /// An allow decision with an explicit reason.
    #[must_use]
    pub fn allow_with_reason(module: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..Self::allow(module)
        }
    }

    /// A deny decision.
    #[must_use]
    pub fn deny(
        module: impl Into<String>,
        reason: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            action: Action::Deny,
            module: module.into(),
            reason: reason.into(),
            severity,
            patch: None,
            challenge: None,
        }
    }

    /// A modify decision carrying a patch.
    #[must_use]
    pub fn modify(
        module: impl Into<String>,
        reason: impl Into<String>,
        patch: Patch,
    ) -> Self {
        Self {
            action: Action::Modify,
            module: module.into(),
            reason: reason.into(),
            severity: Severity::Info,
            patch: Some(patch),
            challenge: None,
        }
    }

    /// A challenge decision carrying an approval request.
    #[must_use]
    pub fn challenge(
        module: impl Into<String>,
        reason: impl Into<String>,
        request: ChallengeRequest,
    ) -> Self {
        Self {
            action: Action::Challenge,
            module: module.into(),
            reason: reason.into(),
            severity: Severity::Medium,
            patch: None,
            challenge: Some(request),
        }
    }

    /// An alert decision.
    #[must_use]
    pub fn alert(
        module: impl Into<String>,
        reason: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            action: Action::Alert,
            module: module.into(),
            reason: reason.into(),
            severity,
            patch: None,
            challenge: None,
        }
    }
}
