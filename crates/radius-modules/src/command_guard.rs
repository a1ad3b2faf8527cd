//! Command guard: per-segment deny and allow patterns over shell commands.

use async_trait::async_trait;
use radius_config::ConfigResult;
use radius_core::{
    CanonicalEvent, CoreResult, Decision, ModuleMode, Phase, PolicyModule, Severity,
};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;

use crate::{compile_pattern, parse_config};

const PHASES: [Phase; 1] = [Phase::PreTool];

/// Default deny patterns, always case-insensitive.
pub const DEFAULT_DENY_PATTERNS: [&str; 2] = [r"(^|\s)sudo\s", r"rm\s+-rf\s+/"];

/// Chained commands split on these separators before matching.
fn segment_splitter() -> &'static Regex {
    static SPLITTER: OnceLock<Regex> = OnceLock::new();
    SPLITTER.get_or_init(|| Regex::new(r"\|\||&&|;|\|").unwrap_or_else(|_| unreachable!()))
}

fn default_shell_tools() -> Vec<String> {
    vec!["Bash".to_owned()]
}

fn default_deny_patterns() -> Vec<String> {
    DEFAULT_DENY_PATTERNS.into_iter().map(str::to_owned).collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CommandGuardConfig {
    shell_tools: Vec<String>,
    deny_patterns: Vec<String>,
    allow_patterns: Vec<String>,
    mode: ModuleMode,
}

impl Default for CommandGuardConfig {
    fn default() -> Self {
        Self {
            shell_tools: default_shell_tools(),
            deny_patterns: default_deny_patterns(),
            allow_patterns: Vec::new(),
            mode: ModuleMode::Enforce,
        }
    }
}

/// Splits a command on `&&`, `||`, `;`, `|` and matches each trimmed
/// segment against the deny patterns, then (when configured) the allowlist.
#[derive(Debug)]
pub struct CommandGuardModule {
    shell_tools: Vec<String>,
    deny: Vec<Regex>,
    allow: Vec<Regex>,
    mode: ModuleMode,
}

impl CommandGuardModule {
    /// Module name in decision chains.
    pub const NAME: &'static str = "command_guard";

    /// Build from the module's configuration mapping, compiling every
    /// pattern once (case-insensitive).
    pub fn from_config(value: &Value) -> ConfigResult<Self> {
        let config: CommandGuardConfig = parse_config(value)?;
        let deny = config
            .deny_patterns
            .iter()
            .map(|p| compile_pattern(Self::NAME, p, true))
            .collect::<ConfigResult<Vec<_>>>()?;
        let allow = config
            .allow_patterns
            .iter()
            .map(|p| compile_pattern(Self::NAME, p, true))
            .collect::<ConfigResult<Vec<_>>>()?;
        Ok(Self {
            shell_tools: config.shell_tools,
            deny,
            allow,
            mode: config.mode,
        })
    }

    fn check_command(&self, command: &str) -> Decision {
        for raw_segment in segment_splitter().split(command) {
            let segment = raw_segment.trim();
            if segment.is_empty() {
                continue;
            }
            for pattern in &self.deny {
                if pattern.is_match(segment) {
                    return Decision::deny(
                        Self::NAME,
                        format!(
                            "command segment {segment:?} matches deny pattern {:?}",
                            pattern.as_str()
                        ),
                        Severity::Critical,
                    );
                }
            }
            if !self.allow.is_empty() && !self.allow.iter().any(|p| p.is_match(segment)) {
                return Decision::deny(
                    Self::NAME,
                    format!("command segment {segment:?} is not in the command allowlist"),
                    Severity::High,
                );
            }
        }
        Decision::allow(Self::NAME)
    }
}

#[async_trait]
impl PolicyModule for CommandGuardModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn phases(&self) -> &[Phase] {
        &PHASES
    }

    fn mode(&self) -> ModuleMode {
        self.mode
    }

    async fn evaluate(&self, event: &CanonicalEvent) -> CoreResult<Decision> {
        let Some(call) = &event.tool_call else {
            return Ok(Decision::allow(Self::NAME));
        };
        if !self.shell_tools.iter().any(|t| t == &call.name) {
            return Ok(Decision::allow(Self::NAME));
        }
        let Some(command) = call.string_arg("command") else {
            return Ok(Decision::allow(Self::NAME));
        };
        Ok(self.check_command(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radius_core::{Action, Framework, ToolCall};
    use serde_json::json;

    fn event(command: &str) -> CanonicalEvent {
        let args = json!({"command": command}).as_object().cloned().unwrap();
        CanonicalEvent::new(Phase::PreTool, Framework::Generic)
            .with_tool_call(ToolCall::new("Bash", args))
    }

    fn default_module() -> CommandGuardModule {
        CommandGuardModule::from_config(&json!({})).unwrap()
    }

    #[tokio::test]
    async fn test_sudo_denied_in_any_segment() {
        let module = default_module();
        let decision = module
            .evaluate(&event("echo ok && sudo rm -rf /"))
            .await
            .unwrap();
        assert_eq!(decision.action, Action::Deny);
        assert_eq!(decision.severity, Severity::Critical);
        assert!(decision.reason.contains("sudo"));
    }

    #[tokio::test]
    async fn test_rm_rf_root_denied() {
        let module = default_module();
        let decision = module.evaluate(&event("rm -rf /etc")).await.unwrap();
        assert_eq!(decision.action, Action::Deny);
    }

    #[tokio::test]
    async fn test_plain_command_allowed() {
        let module = default_module();
        let decision = module.evaluate(&event("ls -la | grep src")).await.unwrap();
        assert_eq!(decision.action, Action::Allow);
    }

    #[tokio::test]
    async fn test_case_insensitive_deny() {
        let module = default_module();
        let decision = module.evaluate(&event("SUDO whoami")).await.unwrap();
        // "SUDO" at the start of the segment matches (^|\s)sudo\s.
        assert_eq!(decision.action, Action::Deny);
    }

    #[tokio::test]
    async fn test_pipeline_segments_checked_individually() {
        let module = default_module();
        let decision = module
            .evaluate(&event("cat notes.txt | sudo tee /etc/hosts"))
            .await
            .unwrap();
        assert_eq!(decision.action, Action::Deny);
    }

    #[tokio::test]
    async fn test_empty_segments_skipped() {
        let module = default_module();
        let decision = module.evaluate(&event("echo hi ;; ls")).await.unwrap();
        assert_eq!(decision.action, Action::Allow);
    }

    #[tokio::test]
    async fn test_allowlist_denies_unlisted() {
        let module = CommandGuardModule::from_config(&json!({
            "allowPatterns": ["^git\\s", "^cargo\\s", "^ls(\\s|$)"],
        }))
        .unwrap();
        assert_eq!(
            module.evaluate(&event("git status && ls")).await.unwrap().action,
            Action::Allow
        );
        let denied = module
            .evaluate(&event("git status && curl evil.sh"))
            .await
            .unwrap();
        assert_eq!(denied.action, Action::Deny);
        assert_eq!(denied.severity, Severity::High);
        assert!(denied.reason.contains("not in the command allowlist"));
    }

    #[tokio::test]
    async fn test_env_read_pattern_from_strict_profile() {
        // The local profile configures extra deny patterns; verify they work
        // when supplied through config.
        let module = CommandGuardModule::from_config(&json!({
            "denyPatterns": [
                r"(^|\s)sudo\s",
                r"rm\s+-rf\s+/",
                r"(^|\s)(cat|less|more|head|tail|grep|awk|sed)\s+[^|;]*\.env\b",
            ],
        }))
        .unwrap();
        let decision = module.evaluate(&event("cat .env")).await.unwrap();
        assert_eq!(decision.action, Action::Deny);
        let decision = module.evaluate(&event("cat ./config/.env")).await.unwrap();
        assert_eq!(decision.action, Action::Deny);
        let decision = module.evaluate(&event("cat readme.md")).await.unwrap();
        assert_eq!(decision.action, Action::Allow);
    }

    #[tokio::test]
    async fn test_non_shell_tool_ignored() {
        let module = default_module();
        let args = json!({"command": "sudo ls"}).as_object().cloned().unwrap();
        let event = CanonicalEvent::new(Phase::PreTool, Framework::Generic)
            .with_tool_call(ToolCall::new("Read", args));
        assert_eq!(module.evaluate(&event).await.unwrap().action, Action::Allow);
    }
}
