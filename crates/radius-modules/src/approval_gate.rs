//! Approval gate: turns configured tool calls into human challenges.

use std::collections::BTreeMap;

use async_trait::async_trait;
use radius_config::ConfigResult;
use radius_core::{
    ApprovalChannel, CanonicalEvent, ChallengeRequest, CoreResult, Decision, ModuleMode, Phase,
    PolicyModule,
};
use serde::Deserialize;
use serde_json::Value;

use crate::parse_config;

const PHASES: [Phase; 1] = [Phase::PreTool];

/// Metadata keys probed for a channel hint, in order.
pub const DEFAULT_METADATA_KEYS: [&str; 3] = ["channel", "transportChannel", "messenger"];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GateRule {
    tool: String,
    prompt: Option<String>,
    /// `"auto"` resolves through metadata and framework defaults.
    channel: String,
    timeout_seconds: u64,
}

impl Default for GateRule {
    fn default() -> Self {
        Self {
            tool: "*".to_owned(),
            prompt: None,
            channel: "auto".to_owned(),
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApprovalGateConfig {
    rules: Vec<GateRule>,
    metadata_keys: Vec<String>,
    /// Per-framework default channels, injected by the registry from the
    /// approval configuration.
    framework_channels: BTreeMap<String, String>,
    default_channel: String,
    mode: ModuleMode,
}

impl Default for ApprovalGateConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            metadata_keys: DEFAULT_METADATA_KEYS.into_iter().map(str::to_owned).collect(),
            framework_channels: BTreeMap::new(),
            default_channel: "telegram".to_owned(),
            mode: ModuleMode::Enforce,
        }
    }
}

/// Emits a challenge for tools matching a gate rule.
#[derive(Debug)]
pub struct ApprovalGateModule {
    config: ApprovalGateConfig,
}

impl ApprovalGateModule {
    /// Module name in decision chains.
    pub const NAME: &'static str = "approval_gate";

    /// Build from the module's configuration mapping.
    pub fn from_config(value: &Value) -> ConfigResult<Self> {
        Ok(Self {
            config: parse_config(value)?,
        })
    }

    /// Channel resolution: explicit rule channel, event metadata hint,
    /// framework default, global default, telegram.
    fn resolve_channel(&self, rule: &GateRule, event: &CanonicalEvent) -> ApprovalChannel {
        if rule.channel != "auto" {
            if let Some(channel) = ApprovalChannel::parse(&rule.channel) {
                return channel;
            }
        }
        for key in &self.config.metadata_keys {
            if let Some(hint) = event.metadata.get(key) {
                if let Some(channel) = ApprovalChannel::parse(hint) {
                    return channel;
                }
            }
        }
        if let Some(name) = self
            .config
            .framework_channels
            .get(event.framework.as_str())
        {
            if let Some(channel) = ApprovalChannel::parse(name) {
                return channel;
            }
        }
        ApprovalChannel::parse(&self.config.default_channel).unwrap_or_default()
    }
}

#[async_trait]
impl PolicyModule for ApprovalGateModule {
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
        let Some(tool) = event.tool_name() else {
            return Ok(Decision::allow(Self::NAME));
        };
        let Some(rule) = self
            .config
            .rules
            .iter()
            .find(|rule| rule.tool == "*" || rule.tool == tool)
        else {
            return Ok(Decision::allow(Self::NAME));
        };

        let channel = self.resolve_channel(rule, event);
        let prompt = rule
            .prompt
            .clone()
            .unwrap_or_else(|| format!("Approve execution of \"{tool}\"?"));
        Ok(Decision::challenge(
            Self::NAME,
            format!("human approval required for {tool}"),
            ChallengeRequest {
                channel,
                prompt,
                timeout_seconds: rule.timeout_seconds,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radius_core::{Action, Framework, ToolCall};
    use serde_json::json;

    fn event(tool: &str) -> CanonicalEvent {
        CanonicalEvent::new(Phase::PreTool, Framework::Openclaw)
            .with_tool_call(ToolCall::new(tool, serde_json::Map::new()))
    }

    #[tokio::test]
    async fn test_no_rule_allows() {
        let module = ApprovalGateModule::from_config(&json!({
            "rules": [{"tool": "Bash"}],
        }))
        .unwrap();
        assert_eq!(
            module.evaluate(&event("Read")).await.unwrap().action,
            Action::Allow
        );
    }

    #[tokio::test]
    async fn test_explicit_channel_kept() {
        let module = ApprovalGateModule::from_config(&json!({
            "rules": [{"tool": "Bash", "channel": "http"}],
        }))
        .unwrap();
        let decision = module
            .evaluate(&event("Bash").with_metadata("channel", "discord"))
            .await
            .unwrap();
        assert_eq!(
            decision.challenge.unwrap().channel,
            ApprovalChannel::Http
        );
    }

    #[tokio::test]
    async fn test_auto_channel_takes_metadata_hint() {
        let module = ApprovalGateModule::from_config(&json!({
            "rules": [{"tool": "Bash"}],
        }))
        .unwrap();
        let decision = module
            .evaluate(&event("Bash").with_metadata("channel", "discord"))
            .await
            .unwrap();
        assert_eq!(decision.action, Action::Challenge);
        assert_eq!(
            decision.challenge.unwrap().channel,
            ApprovalChannel::Discord
        );
    }

    #[tokio::test]
    async fn test_alternate_metadata_keys_probed() {
        let module = ApprovalGateModule::from_config(&json!({
            "rules": [{"tool": "*"}],
        }))
        .unwrap();
        let decision = module
            .evaluate(&event("Bash").with_metadata("messenger", "orchestrator"))
            .await
            .unwrap();
        assert_eq!(
            decision.challenge.unwrap().channel,
            ApprovalChannel::Orchestrator
        );
    }

    #[tokio::test]
    async fn test_framework_default_channel() {
        let module = ApprovalGateModule::from_config(&json!({
            "rules": [{"tool": "Bash"}],
            "frameworkChannels": {"openclaw": "http"},
        }))
        .unwrap();
        let decision = module.evaluate(&event("Bash")).await.unwrap();
        assert_eq!(decision.challenge.unwrap().channel, ApprovalChannel::Http);
    }

    #[tokio::test]
    async fn test_global_default_is_telegram() {
        let module = ApprovalGateModule::from_config(&json!({
            "rules": [{"tool": "Bash"}],
        }))
        .unwrap();
        let decision = module.evaluate(&event("Bash")).await.unwrap();
        assert_eq!(
            decision.challenge.unwrap().channel,
            ApprovalChannel::Telegram
        );
    }

    #[tokio::test]
    async fn test_default_prompt_names_tool() {
        let module = ApprovalGateModule::from_config(&json!({
            "rules": [{"tool": "Bash", "timeoutSeconds": 45}],
        }))
        .unwrap();
        let challenge = module
            .evaluate(&event("Bash"))
            .await
            .unwrap()
            .challenge
            .unwrap();
        assert_eq!(challenge.prompt, "Approve execution of \"Bash\"?");
        assert_eq!(challenge.timeout_seconds, 45);
    }
}
