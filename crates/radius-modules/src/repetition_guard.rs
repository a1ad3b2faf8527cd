//! Repetition guard: breaks identical-call loops.

use std::sync::Arc;

use async_trait::async_trait;
use radius_config::ConfigResult;
use radius_core::fingerprint::call_fingerprint;
use radius_core::{
    CanonicalEvent, CoreError, CoreResult, Decision, ModuleMode, Phase, PolicyModule, Severity,
};
use radius_state::StateStore;
use serde::Deserialize;
use serde_json::Value;

use crate::parse_config;

const PHASES: [Phase; 1] = [Phase::PreTool];

/// What to do when the streak reaches the threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnRepeat {
    /// Block the call.
    #[default]
    Deny,
    /// Surface a warning only.
    Alert,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RepetitionConfig {
    threshold: u32,
    cooldown_sec: u64,
    on_repeat: OnRepeat,
    mode: ModuleMode,
}

impl Default for RepetitionConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown_sec: 60,
            on_repeat: OnRepeat::Deny,
            mode: ModuleMode::Enforce,
        }
    }
}

/// Fingerprints each tool call and counts consecutive repeats per bucket.
///
/// The fingerprint is a SHA-256 over `tool:stable-json(arguments)`, so key
/// order in the arguments does not defeat it. The bucket is
/// `framework|session|agent|user`; the streak itself lives in the shared
/// state store and is advanced atomically per bucket.
pub struct RepetitionGuardModule {
    config: RepetitionConfig,
    store: Arc<dyn StateStore>,
}

impl RepetitionGuardModule {
    /// Module name in decision chains.
    pub const NAME: &'static str = "repetition_guard";

    /// Build from the module's configuration mapping and the shared store.
    pub fn from_config(value: &Value, store: Arc<dyn StateStore>) -> ConfigResult<Self> {
        Ok(Self {
            config: parse_config(value)?,
            store,
        })
    }

    fn bucket(event: &CanonicalEvent) -> String {
        format!(
            "{}|{}|{}|{}",
            event.framework,
            event.session_id,
            event.agent_name.as_deref().unwrap_or(""),
            event.user_id.as_deref().unwrap_or("")
        )
    }
}

impl std::fmt::Debug for RepetitionGuardModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepetitionGuardModule")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PolicyModule for RepetitionGuardModule {
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
        let Some(call) = &event.tool_call else {
            return Ok(Decision::allow(Self::NAME));
        };
        let fingerprint = call_fingerprint(&call.name, &call.arguments);
        let cooldown_ms = i64::try_from(self.config.cooldown_sec.saturating_mul(1_000))
            .unwrap_or(i64::MAX);
        let count = self
            .store
            .consume_repetition(
                &Self::bucket(event),
                &fingerprint,
                cooldown_ms,
                radius_state::now_ms(),
            )
            .await
            .map_err(|e| CoreError::Evaluation(e.to_string()))?;

        if count < self.config.threshold {
            return Ok(Decision::allow(Self::NAME));
        }
        let reason = format!(
            "tool {:?} repeated {count} times with identical arguments",
            call.name
        );
        Ok(match self.config.on_repeat {
            OnRepeat::Deny => Decision::deny(Self::NAME, reason, Severity::High),
            OnRepeat::Alert => Decision::alert(Self::NAME, reason, Severity::High),
        })
    }
}
