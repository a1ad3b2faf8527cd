//! Runtime facade for the Radius policy kernel.
//!
//! Wires configuration → state store → modules → pipeline → adapters →
//! approval resolver → audit recorder, and exposes two entry points:
//! [`Runtime::evaluate`] for canonical events and [`Runtime::handle`] for
//! raw orchestrator payloads.

use std::path::Path;
use std::sync::Arc;

use radius_adapters::adapter_for;
use radius_approval::{ApprovalOutcome, ApprovalResolver, Resolution};
use radius_audit::AuditRecorder;
use radius_config::{
    load_config, ApprovalConfig, ConfigError, FailurePolicy, RadiusConfig,
};
use radius_core::{
    Action, ApprovalChannel, CanonicalEvent, ChallengeRequest, Decision, Framework, Pipeline,
    PipelineResult, Severity,
};
use radius_state::{
    Lease, MemoryStateStore, SqliteStateStore, StateError, StateStore, DEFAULT_DB_PATH,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised while constructing the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration failed to load or resolve.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A required persistent store could not be opened.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Result alias for runtime construction.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// The assembled policy kernel.
pub struct Runtime {
    config: RadiusConfig,
    pipeline: Pipeline,
    store: Arc<dyn StateStore>,
    recorder: Arc<AuditRecorder>,
    resolver: ApprovalResolver,
}

impl Runtime {
    /// Build a runtime from resolved configuration.
    ///
    /// # Errors
    ///
    /// Unknown module names, invalid patterns, or a required-but-unopenable
    /// state database abort construction.
    pub fn new(config: RadiusConfig) -> RuntimeResult<Self> {
        let store = build_store(&config)?;
        let recorder = Arc::new(AuditRecorder::new(config.audit.clone()));
        let modules =
            radius_modules::build_modules(&config, Arc::clone(&store), Arc::clone(&recorder))?;
        let pipeline = Pipeline::new(modules, config.global.default_action);
        let resolver = ApprovalResolver::from_config(&config.approval);
        info!(
            profile = %config.global.profile,
            modules = config.modules.len(),
            "radius runtime ready"
        );
        Ok(Self {
            config,
            pipeline,
            store,
            recorder,
            resolver,
        })
    }

    /// Load configuration (optionally from an explicit path) and build.
    ///
    /// # Errors
    ///
    /// See [`Runtime::new`] plus configuration load errors.
    pub fn from_path(path: Option<&Path>) -> RuntimeResult<Self> {
        Ok(Self::new(load_config(path)?)?)
    }

    /// The frozen configuration this runtime was built from.
    #[must_use]
    pub fn config(&self) -> &RadiusConfig {
        &self.config
    }

    /// The shared state store (leases, windows, streaks).
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Evaluate one canonical event end to end.
    ///
    /// Runs the pipeline, resolves a terminal challenge through the
    /// approval subsystem when enabled, and records the completed result.
    pub async fn evaluate(&self, event: &CanonicalEvent) -> PipelineResult {
        let mut result = self.pipeline.run(event).await;
        if result.final_action == Action::Challenge {
            result = self.resolve_challenge(event, result).await;
        }
        self.recorder.record_result(event, &result);
        result
    }

    /// Normalize a raw orchestrator payload, evaluate, and render the
    /// response in the orchestrator's dialect.
    pub async fn handle(&self, framework: Framework, raw: &Value) -> Value {
        let adapter = adapter_for(framework);
        let event = adapter.to_event(raw);
        let result = self.evaluate(&event).await;
        adapter.to_response(&result, raw)
    }

    /// Fold a challenge into a terminal allow/deny/alert through leases
    /// and the approval subsystem.
    async fn resolve_challenge(
        &self,
        event: &CanonicalEvent,
        mut result: PipelineResult,
    ) -> PipelineResult {
        let Some(challenge) = result.challenge().cloned() else {
            return result;
        };
        let tool = event.tool_name().unwrap_or("*");

        // An active lease suppresses the challenge without touching any
        // connector.
        match self
            .store
            .find_active_lease(
                &event.session_id,
                event.agent_name.as_deref(),
                tool,
                radius_state::now_ms(),
            )
            .await
        {
            Ok(Some(lease)) => {
                debug!(lease = %lease.id, "approval lease active, suppressing challenge");
                push_allow(
                    &mut result,
                    format!("approval lease active until {}", lease.expires_at_ms),
                );
                return result;
            },
            Ok(None) => {},
            Err(err) => warn!(error = %err, "lease lookup failed"),
        }

        // Orchestrator-channel challenges (and a disabled approval
        // subsystem) pass through for the caller to resolve.
        if !self.config.approval.enabled || challenge.channel == ApprovalChannel::Orchestrator {
            return result;
        }

        let resolution = self.resolver.resolve(&challenge, event).await;
        self.fold_resolution(event, &challenge, resolution, result)
            .await
    }

    async fn fold_resolution(
        &self,
        event: &CanonicalEvent,
        challenge: &ChallengeRequest,
        resolution: Resolution,
        mut result: PipelineResult,
    ) -> PipelineResult {
        let approval = &self.config.approval;
        match resolution.outcome {
            ApprovalOutcome::Approved => {
                push_allow(
                    &mut result,
                    format!("approved via {}", resolution.channel),
                );
            },
            ApprovalOutcome::ApprovedTemporary { ttl_sec } => {
                let ttl = effective_ttl(approval, ttl_sec);
                let expires_at_ms = radius_state::now_ms()
                    .saturating_add(i64::try_from(ttl.saturating_mul(1_000)).unwrap_or(i64::MAX));
                let lease = Lease::wildcard(
                    event.session_id.clone(),
                    event.agent_name.clone(),
                    expires_at_ms,
                    Some(format!("temporary approval via {}", resolution.channel)),
                );
                if let Err(err) = self.store.insert_lease(lease).await {
                    warn!(error = %err, "failed to persist approval lease");
                }
                push_allow(
                    &mut result,
                    format!("approved via {} for {ttl}s", resolution.channel),
                );
            },
            ApprovalOutcome::Denied => {
                let reason = format!(
                    "{}: {}",
                    resolution.channel,
                    resolution.reason.as_deref().unwrap_or("denied by approver")
                );
                push_deny(&mut result, reason);
            },
            ApprovalOutcome::Timeout => {
                self.apply_failure_policy(
                    approval.on_timeout,
                    &mut result,
                    format!(
                        "approval timed out after {}s on {}",
                        challenge.timeout_seconds, resolution.channel
                    ),
                );
            },
            ApprovalOutcome::Error => {
                self.apply_failure_policy(
                    approval.on_connector_error,
                    &mut result,
                    format!(
                        "approval connector failed on {}: {}",
                        resolution.channel,
                        resolution.reason.as_deref().unwrap_or("unknown error")
                    ),
                );
            },
        }
        result
    }

    fn apply_failure_policy(
        &self,
        policy: FailurePolicy,
        result: &mut PipelineResult,
        reason: String,
    ) {
        match policy {
            FailurePolicy::Deny => push_deny(result, reason),
            FailurePolicy::Alert => {
                result.alerts.push(format!("[approval] {reason}"));
                result.final_action = Action::Allow;
                result.final_reason = "allow after module evaluation".to_owned();
            },
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("profile", &self.config.global.profile)
            .field("modules", &self.config.modules)
            .finish_non_exhaustive()
    }
}

fn push_allow(result: &mut PipelineResult, reason: String) {
    result
        .decisions
        .push(Decision::allow_with_reason("approval", reason));
    result.final_action = Action::Allow;
    result.final_reason = "allow after module evaluation".to_owned();
}

fn push_deny(result: &mut PipelineResult, reason: String) {
    result
        .decisions
        .push(Decision::deny("approval", reason.clone(), Severity::High));
    result.final_action = Action::Deny;
    result.final_reason = reason;
}

/// Effective TTL: requested (or configured default) clamped by the
/// configured maximum and to at least one second.
fn effective_ttl(approval: &ApprovalConfig, requested: Option<u64>) -> u64 {
    requested
        .unwrap_or(approval.default_ttl_sec)
        .min(approval.max_ttl_sec)
        .max(1)
}

/// Build the shared state store.
///
/// Any module config carrying `store.backend = "sqlite"` or
/// `store.required = true` switches to SQLite; `required` makes an open
/// failure fatal, otherwise the runtime degrades to memory with identical
/// semantics.
fn build_store(config: &RadiusConfig) -> RuntimeResult<Arc<dyn StateStore>> {
    let mut wants_sqlite = false;
    let mut required = false;
    let mut path = DEFAULT_DB_PATH.to_owned();
    for module_config in config.module_config.values() {
        let Some(store) = module_config.get("store") else {
            continue;
        };
        if store.get("backend").and_then(Value::as_str) == Some("sqlite") {
            wants_sqlite = true;
        }
        if store.get("required").and_then(Value::as_bool) == Some(true) {
            wants_sqlite = true;
            required = true;
        }
        if let Some(configured) = store.get("path").and_then(Value::as_str) {
            path = configured.to_owned();
        }
    }

    if wants_sqlite {
        match SqliteStateStore::open(&path) {
            Ok(store) => return Ok(Arc::new(store)),
            Err(err) if required => return Err(err.into()),
            Err(err) => {
                warn!(error = %err, "state database unavailable, using in-memory store");
            },
        }
    }
    Ok(Arc::new(MemoryStateStore::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use radius_config::resolve_config;
    use serde_json::json;

    #[test]
    fn test_effective_ttl_clamping() {
        let approval = ApprovalConfig {
            default_ttl_sec: 300,
            max_ttl_sec: 600,
            ..ApprovalConfig::default()
        };
        assert_eq!(effective_ttl(&approval, Some(120)), 120);
        assert_eq!(effective_ttl(&approval, None), 300);
        assert_eq!(effective_ttl(&approval, Some(10_000)), 600);
        assert_eq!(effective_ttl(&approval, Some(0)), 1);
    }

    #[test]
    fn test_store_defaults_to_memory() {
        let config = resolve_config(json!({"modules": ["kill_switch", "audit"]})).unwrap();
        assert!(build_store(&config).is_ok());
    }

    #[test]
    fn test_required_sqlite_unopenable_is_fatal() {
        let config = resolve_config(json!({
            "modules": ["rate_budget", "audit"],
            "moduleConfig": {
                "rate_budget": {
                    "store": {"backend": "sqlite", "required": true, "path": "/dev/null/impossible/state.db"},
                },
            },
        }))
        .unwrap();
        assert!(matches!(
            build_store(&config),
            Err(RuntimeError::State(_))
        ));
    }

    #[test]
    fn test_optional_sqlite_degrades_to_memory() {
        let config = resolve_config(json!({
            "modules": ["rate_budget", "audit"],
            "moduleConfig": {
                "rate_budget": {
                    "store": {"backend": "sqlite", "path": "/dev/null/impossible/state.db"},
                },
            },
        }))
        .unwrap();
        assert!(build_store(&config).is_ok());
    }

    #[tokio::test]
    async fn test_runtime_builds_from_default_profile() {
        let config = resolve_config(json!({
            "audit": {"file": null},
        }))
        .unwrap();
        let runtime = Runtime::new(config).unwrap();
        assert_eq!(runtime.config().global.profile, "standard");
    }
}
