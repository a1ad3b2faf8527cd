//! Verdict provider bridge: external HTTP classifiers with hard timeouts.
//!
//! Each configured provider is POSTed the phase's content and returns a
//! verdict in one of three accepted shapes. The bridge itself stays
//! deterministic: verdicts are pattern-matched and thresholded, never
//! interpreted.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use radius_config::ConfigResult;
use radius_core::{
    CanonicalEvent, CoreResult, Decision, ModuleMode, Phase, PolicyModule, Severity,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::parse_config;

const PHASES: [Phase; 3] = [Phase::PreRequest, Phase::PreTool, Phase::PreResponse];

/// What a provider error does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnProviderError {
    /// Surface a warning and continue.
    #[default]
    Alert,
    /// Fail closed.
    Deny,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ProviderConfig {
    name: String,
    url: String,
    headers: BTreeMap<String, String>,
    timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            headers: BTreeMap::new(),
            timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct VerdictProviderConfig {
    providers: Vec<ProviderConfig>,
    min_confidence: f64,
    on_provider_error: OnProviderError,
    mode: ModuleMode,
}

impl Default for VerdictProviderConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            min_confidence: 0.7,
            on_provider_error: OnProviderError::Alert,
            mode: ModuleMode::Enforce,
        }
    }
}

/// A normalized provider verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// `allow`, `deny`, or `alert`.
    pub action: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Provider-assigned category, when present.
    pub category: Option<String>,
    /// Which provider produced it.
    pub provider: String,
}

/// Normalize any accepted response shape into a [`Verdict`].
///
/// Accepted forms: `{action, confidence, category}`, `{blocked,
/// confidence}`, or either of those nested under `verdict`.
#[must_use]
pub fn normalize_verdict(provider: &str, body: &Value) -> Option<Verdict> {
    let body = body.get("verdict").unwrap_or(body);
    let confidence = body
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(1.0)
        .clamp(0.0, 1.0);
    let category = body
        .get("category")
        .and_then(Value::as_str)
        .map(str::to_owned);

    if let Some(action) = body.get("action").and_then(Value::as_str) {
        let action = match action {
            "allow" | "deny" | "alert" => action.to_owned(),
            _ => return None,
        };
        return Some(Verdict {
            action,
            confidence,
            category,
            provider: provider.to_owned(),
        });
    }
    if let Some(blocked) = body.get("blocked").and_then(Value::as_bool) {
        return Some(Verdict {
            action: if blocked { "deny" } else { "allow" }.to_owned(),
            confidence,
            category,
            provider: provider.to_owned(),
        });
    }
    None
}

/// External verdict bridge.
pub struct VerdictProviderModule {
    config: VerdictProviderConfig,
    client: reqwest::Client,
}

impl VerdictProviderModule {
    /// Module name in decision chains.
    pub const NAME: &'static str = "verdict_provider";

    /// Build from the module's configuration mapping.
    pub fn from_config(value: &Value) -> ConfigResult<Self> {
        Ok(Self {
            config: parse_config(value)?,
            client: reqwest::Client::new(),
        })
    }

    /// The content POSTed for this phase.
    fn content_for(event: &CanonicalEvent) -> Option<Value> {
        match event.phase {
            Phase::PreRequest => event.request_text.as_ref().map(|t| json!(t)),
            Phase::PreResponse => event.response_text.as_ref().map(|t| json!(t)),
            Phase::PreTool => event.tool_call.as_ref().map(|call| {
                json!({"tool": call.name, "arguments": Value::Object(call.arguments.clone())})
            }),
            _ => None,
        }
    }

    async fn query(&self, provider: &ProviderConfig, content: &Value) -> Result<Verdict, String> {
        let mut request = self
            .client
            .post(&provider.url)
            .timeout(Duration::from_millis(provider.timeout_ms))
            .json(&json!({"content": content}));
        for (key, value) in &provider.headers {
            request = request.header(key, value);
        }
        let response = request.send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("status {}", response.status()));
        }
        let body: Value = response.json().await.map_err(|e| e.to_string())?;
        normalize_verdict(&provider.name, &body)
            .ok_or_else(|| "unrecognized verdict shape".to_owned())
    }
}

impl std::fmt::Debug for VerdictProviderModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerdictProviderModule")
            .field("providers", &self.config.providers.len())
            .field("min_confidence", &self.config.min_confidence)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PolicyModule for VerdictProviderModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn phases(&self) -> &[Phase] {
        &PHASES
    }

    fn mode(&self) -> ModuleMode {
        self.config.mode
    }

    async fn evaluate(&self, event: &CanonicalEvent) -> CoreResult<Decision> {
        if self.config.providers.is_empty() {
            return Ok(Decision::allow(Self::NAME));
        }
        let Some(content) = Self::content_for(event) else {
            return Ok(Decision::allow(Self::NAME));
        };

        let mut findings: Vec<String> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        for provider in &self.config.providers {
            match self.query(provider, &content).await {
                Ok(verdict) => {
                    if verdict.action == "deny" && verdict.confidence >= self.config.min_confidence
                    {
                        return Ok(Decision::deny(
                            Self::NAME,
                            format!(
                                "provider {} flagged {} (confidence {:.2})",
                                verdict.provider,
                                verdict.category.as_deref().unwrap_or("content"),
                                verdict.confidence
                            ),
                            Severity::High,
                        ));
                    }
                    if verdict.action != "allow" {
                        findings.push(format!(
                            "{}: {} ({:.2})",
                            verdict.provider, verdict.action, verdict.confidence
                        ));
                    }
                },
                Err(reason) => {
                    warn!(provider = %provider.name, reason = %reason, "verdict provider failed");
                    errors.push(format!("{}: {reason}", provider.name));
                },
            }
        }

        if !errors.is_empty() && self.config.on_provider_error == OnProviderError::Deny {
            return Ok(Decision::deny(
                Self::NAME,
                format!("provider errors: {}", errors.join("; ")),
                Severity::High,
            ));
        }
        if !findings.is_empty() || !errors.is_empty() {
            let mut parts = findings;
            parts.extend(errors);
            return Ok(Decision::alert(
                Self::NAME,
                format!("provider findings: {}", parts.join("; ")),
                Severity::Medium,
            ));
        }
        Ok(Decision::allow(Self::NAME))
    }
}
