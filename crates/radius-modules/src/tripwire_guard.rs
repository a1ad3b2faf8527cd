//! Tripwires: honeytoken files and environment names whose touch is a
//! deterministic compromise signal.

use std::path::PathBuf;

use async_trait::async_trait;
use radius_config::ConfigResult;
use radius_core::paths::{canonicalize_with_ancestors, path_within};
use radius_core::{
    CanonicalEvent, CoreResult, Decision, ModuleMode, Phase, PolicyModule, Severity, ToolCall,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::error;

use crate::kill_switch::DEFAULT_FILE_PATH;
use crate::parse_config;

const PHASES: [Phase; 1] = [Phase::PreTool];

/// What a tripped wire does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripwireAction {
    /// Surface a warning only.
    Alert,
    /// Block the call.
    #[default]
    Deny,
    /// Block the call and write the kill-switch marker file.
    KillSwitch,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TripwireConfig {
    /// Exact paths, or prefixes written with a trailing `/**`.
    files: Vec<String>,
    /// Environment variable names that must never appear in arguments.
    env_tokens: Vec<String>,
    action: TripwireAction,
    kill_switch_path: String,
    path_keys: Vec<String>,
    mode: ModuleMode,
}

impl Default for TripwireConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            env_tokens: Vec::new(),
            action: TripwireAction::Deny,
            kill_switch_path: DEFAULT_FILE_PATH.to_owned(),
            path_keys: crate::fs_guard::DEFAULT_PATH_KEYS
                .into_iter()
                .map(str::to_owned)
                .collect(),
            mode: ModuleMode::Enforce,
        }
    }
}

#[derive(Debug)]
enum FileRule {
    Exact(PathBuf),
    Prefix(PathBuf),
}

impl FileRule {
    fn matches(&self, candidate: &std::path::Path) -> bool {
        match self {
            Self::Exact(path) => candidate == path,
            Self::Prefix(base) => path_within(base, candidate),
        }
    }

    fn display(&self) -> String {
        match self {
            Self::Exact(path) => path.display().to_string(),
            Self::Prefix(base) => format!("{}/**", base.display()),
        }
    }
}

/// Watches for touches of configured honeytokens.
#[derive(Debug)]
pub struct TripwireGuardModule {
    rules: Vec<FileRule>,
    env_tokens: Vec<String>,
    action: TripwireAction,
    kill_switch_path: PathBuf,
    path_keys: Vec<String>,
    mode: ModuleMode,
}

impl TripwireGuardModule {
    /// Module name in decision chains.
    pub const NAME: &'static str = "tripwire_guard";

    /// Build from the module's configuration mapping, canonicalizing every
    /// file rule once.
    pub fn from_config(value: &Value) -> ConfigResult<Self> {
        let config: TripwireConfig = parse_config(value)?;
        let rules = config
            .files
            .iter()
            .map(|raw| match raw.strip_suffix("/**") {
                Some(prefix) => FileRule::Prefix(canonicalize_with_ancestors(prefix)),
                None => FileRule::Exact(canonicalize_with_ancestors(raw)),
            })
            .collect();
        Ok(Self {
            rules,
            env_tokens: config.env_tokens,
            action: config.action,
            kill_switch_path: PathBuf::from(config.kill_switch_path),
            path_keys: config.path_keys,
            mode: config.mode,
        })
    }

    /// Candidate paths: values at the known path keys, plus path-like
    /// tokens inside `command` strings.
    fn candidate_paths(&self, call: &ToolCall) -> Vec<String> {
        let mut candidates = Vec::new();
        for key in &self.path_keys {
            if let Some(path) = call.string_arg(key) {
                candidates.push(path.to_owned());
            }
        }
        if let Some(command) = call.string_arg("command") {
            for token in command.split_whitespace() {
                let trimmed = token.trim_matches(|c| matches!(c, '\'' | '"' | ';' | ','));
                if trimmed.contains('/') && !trimmed.starts_with('-') {
                    candidates.push(trimmed.to_owned());
                }
            }
        }
        candidates
    }

    fn trip(&self, what: &str) -> Decision {
        match self.action {
            TripwireAction::Alert => Decision::alert(
                Self::NAME,
                format!("tripwire touched: {what}"),
                Severity::High,
            ),
            TripwireAction::Deny => Decision::deny(
                Self::NAME,
                format!("tripwire touched: {what}"),
                Severity::Critical,
            ),
            TripwireAction::KillSwitch => {
                if let Some(parent) = self.kill_switch_path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(err) =
                    std::fs::write(&self.kill_switch_path, format!("tripwire: {what}\n"))
                {
                    error!(
                        path = %self.kill_switch_path.display(),
                        error = %err,
                        "failed to write kill-switch marker"
                    );
                }
                Decision::deny(
                    Self::NAME,
                    format!("tripwire touched: {what} (kill switch engaged)"),
                    Severity::Critical,
                )
            },
        }
    }
}

#[async_trait]
impl PolicyModule for TripwireGuardModule {
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

        for raw in self.candidate_paths(call) {
            let canonical = canonicalize_with_ancestors(&raw);
            for rule in &self.rules {
                if rule.matches(&canonical) {
                    return Ok(self.trip(&rule.display()));
                }
            }
        }

        if !self.env_tokens.is_empty() {
            let serialized =
                serde_json::to_string(&Value::Object(call.arguments.clone()))?;
            for token in &self.env_tokens {
                if !token.is_empty() && serialized.contains(token.as_str()) {
                    return Ok(Decision::deny(
                        Self::NAME,
                        format!("environment tripwire {token:?} referenced in arguments"),
                        Severity::Critical,
                    ));
                }
            }
        }

        Ok(Decision::allow(Self::NAME))
    }
}
