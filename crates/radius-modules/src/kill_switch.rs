//! Kill switch: an environment variable or marker file that halts the agent.

use async_trait::async_trait;
use radius_config::ConfigResult;
use radius_core::{
    CanonicalEvent, CoreResult, Decision, ModuleMode, Phase, PolicyModule, Severity,
};
use serde::Deserialize;
use serde_json::Value;

use crate::parse_config;

/// Default environment variable checked for activation.
pub const DEFAULT_ENV_VAR: &str = "RADIUS_KILL_SWITCH";

/// Default marker file path.
pub const DEFAULT_FILE_PATH: &str = "./.radius/kill-switch";

/// Values that activate the switch (case-insensitive, trimmed).
const TRUTHY: [&str; 5] = ["1", "true", "on", "yes", "enabled"];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct KillSwitchConfig {
    enabled: bool,
    env_var: String,
    file_path: String,
    deny_phases: Vec<Phase>,
    mode: ModuleMode,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            env_var: DEFAULT_ENV_VAR.to_owned(),
            file_path: DEFAULT_FILE_PATH.to_owned(),
            deny_phases: vec![Phase::PreRequest, Phase::PreTool],
            mode: ModuleMode::Enforce,
        }
    }
}

/// Halts the agent when an operator flips the switch.
///
/// Active when the configured environment variable holds a truthy value or
/// the marker file exists. Active and the phase is in the deny set → deny
/// critical; active outside the deny set → alert, so in-flight results
/// still surface. Disabled configuration short-circuits to allow.
#[derive(Debug)]
pub struct KillSwitchModule {
    config: KillSwitchConfig,
}

impl KillSwitchModule {
    /// Module name in decision chains.
    pub const NAME: &'static str = "kill_switch";

    /// Build from the module's configuration mapping.
    pub fn from_config(value: &Value) -> ConfigResult<Self> {
        Ok(Self {
            config: parse_config(value)?,
        })
    }

    /// The marker file path this module watches.
    #[must_use]
    pub fn file_path(&self) -> &str {
        &self.config.file_path
    }

    fn is_active(&self) -> bool {
        if let Ok(value) = std::env::var(&self.config.env_var) {
            if TRUTHY.contains(&value.trim().to_ascii_lowercase().as_str()) {
                return true;
            }
        }
        std::path::Path::new(&self.config.file_path).exists()
    }
}

#[async_trait]
impl PolicyModule for KillSwitchModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn phases(&self) -> &[Phase] {
        &Phase::ALL
    }

    fn mode(&self) -> ModuleMode {
        self.config.mode
    }

    async fn evaluate(&self, event: &CanonicalEvent) -> CoreResult<Decision> {
        if !self.config.enabled || !self.is_active() {
            return Ok(Decision::allow(Self::NAME));
        }
        if self.config.deny_phases.contains(&event.phase) {
            return Ok(Decision::deny(
                Self::NAME,
                "kill switch is active",
                Severity::Critical,
            ));
        }
        Ok(Decision::alert(
            Self::NAME,
            format!("kill switch is active ({} phase passes through)", event.phase),
            Severity::Critical,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radius_core::{Action, Framework};
    use serde_json::json;

    fn event(phase: Phase) -> CanonicalEvent {
        CanonicalEvent::new(phase, Framework::Generic)
    }

    #[tokio::test]
    async fn test_inactive_allows() {
        let module = KillSwitchModule::from_config(&json!({
            "envVar": "RADIUS_TEST_KS_OFF",
            "filePath": "/nonexistent/kill-switch",
        }))
        .unwrap();
        let decision = module.evaluate(&event(Phase::PreTool)).await.unwrap();
        assert_eq!(decision.action, Action::Allow);
    }

    #[tokio::test]
    async fn test_env_var_truthy_values() {
        let module = KillSwitchModule::from_config(&json!({
            "envVar": "RADIUS_TEST_KS_ENV",
            "filePath": "/nonexistent/kill-switch",
        }))
        .unwrap();

        for value in ["1", "true", " ON ", "Yes", "enabled"] {
            std::env::set_var("RADIUS_TEST_KS_ENV", value);
            let decision = module.evaluate(&event(Phase::PreTool)).await.unwrap();
            assert_eq!(decision.action, Action::Deny, "value {value:?}");
            assert_eq!(decision.severity, Severity::Critical);
        }

        std::env::set_var("RADIUS_TEST_KS_ENV", "0");
        let decision = module.evaluate(&event(Phase::PreTool)).await.unwrap();
        assert_eq!(decision.action, Action::Allow);
        std::env::remove_var("RADIUS_TEST_KS_ENV");
    }

    #[tokio::test]
    async fn test_marker_file_activates() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("kill-switch");
        let module = KillSwitchModule::from_config(&json!({
            "envVar": "RADIUS_TEST_KS_FILE",
            "filePath": marker.display().to_string(),
        }))
        .unwrap();

        assert_eq!(
            module.evaluate(&event(Phase::PreTool)).await.unwrap().action,
            Action::Allow
        );

        std::fs::write(&marker, "halt").unwrap();
        assert_eq!(
            module.evaluate(&event(Phase::PreTool)).await.unwrap().action,
            Action::Deny
        );
    }

    #[tokio::test]
    async fn test_phase_outside_deny_set_alerts() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("kill-switch");
        std::fs::write(&marker, "halt").unwrap();
        let module = KillSwitchModule::from_config(&json!({
            "envVar": "RADIUS_TEST_KS_PHASE",
            "filePath": marker.display().to_string(),
        }))
        .unwrap();

        let decision = module.evaluate(&event(Phase::PostTool)).await.unwrap();
        assert_eq!(decision.action, Action::Alert);
    }

    #[tokio::test]
    async fn test_disabled_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("kill-switch");
        std::fs::write(&marker, "halt").unwrap();
        let module = KillSwitchModule::from_config(&json!({
            "enabled": false,
            "envVar": "RADIUS_TEST_KS_DISABLED",
            "filePath": marker.display().to_string(),
        }))
        .unwrap();

        let decision = module.evaluate(&event(Phase::PreTool)).await.unwrap();
        assert_eq!(decision.action, Action::Allow);
    }
}
