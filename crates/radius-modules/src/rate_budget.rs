//! Rate budget: sliding-window call limits per session.

use std::sync::Arc;

use async_trait::async_trait;
use radius_config::ConfigResult;
use radius_core::{
    CanonicalEvent, CoreError, CoreResult, Decision, ModuleMode, Phase, PolicyModule, Severity,
};
use radius_state::StateStore;
use serde::Deserialize;
use serde_json::Value;

use crate::parse_config;

const PHASES: [Phase; 2] = [Phase::PreTool, Phase::PreRequest];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RateBudgetConfig {
    window_sec: u64,
    max_calls_per_window: u32,
    mode: ModuleMode,
}

impl Default for RateBudgetConfig {
    fn default() -> Self {
        Self {
            window_sec: 60,
            max_calls_per_window: 60,
            mode: ModuleMode::Enforce,
        }
    }
}

/// Counts calls per session inside a sliding window.
///
/// The window lives in the shared state store, so the limit holds across
/// processes when the store is SQLite-backed.
pub struct RateBudgetModule {
    config: RateBudgetConfig,
    store: Arc<dyn StateStore>,
}

impl RateBudgetModule {
    /// Module name in decision chains.
    pub const NAME: &'static str = "rate_budget";

    /// Build from the module's configuration mapping and the shared store.
    pub fn from_config(value: &Value, store: Arc<dyn StateStore>) -> ConfigResult<Self> {
        Ok(Self {
            config: parse_config(value)?,
            store,
        })
    }
}

impl std::fmt::Debug for RateBudgetModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateBudgetModule")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PolicyModule for RateBudgetModule {
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
        let window_ms = i64::try_from(self.config.window_sec.saturating_mul(1_000))
            .unwrap_or(i64::MAX);
        let outcome = self
            .store
            .consume_rate_budget(
                &event.session_id,
                window_ms,
                self.config.max_calls_per_window,
                radius_state::now_ms(),
            )
            .await
            .map_err(|e| CoreError::Evaluation(e.to_string()))?;

        if outcome.allowed {
            Ok(Decision::allow(Self::NAME))
        } else {
            Ok(Decision::deny(
                Self::NAME,
                format!(
                    "rate limit exceeded: {}/{}",
                    outcome.count, self.config.max_calls_per_window
                ),
                Severity::High,
            ))
        }
    }
}
