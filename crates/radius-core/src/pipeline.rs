//! The phased evaluation pipeline.
//!
//! Modules run in configured order, filtered by the event phase. The first
//! enforced deny or challenge short-circuits; modify patches compose in
//! invocation order; alerts accumulate. An error inside an enforce-mode
//! module fails closed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::decision::{Action, Decision, Patch, Severity};
use crate::event::CanonicalEvent;
use crate::module::{ModuleMode, PolicyModule};

/// Outcome of running one event through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    /// The verdict the runtime acts on.
    pub final_action: Action,
    /// Reason attached to the final verdict.
    pub final_reason: String,
    /// Accumulated transforms from enforced modify decisions.
    pub transforms: Patch,
    /// Alert lines, in chronological order.
    pub alerts: Vec<String>,
    /// Full decision chain, in module invocation order.
    pub decisions: Vec<Decision>,
}

impl PipelineResult {
    /// Whether the final action blocks the event.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self.final_action, Action::Deny | Action::Challenge)
    }

    /// The challenge carried by the terminating decision, if any.
    #[must_use]
    pub fn challenge(&self) -> Option<&crate::decision::ChallengeRequest> {
        self.decisions.last().and_then(|d| d.challenge.as_ref())
    }
}

/// Ordered module executor.
///
/// Given identical event, module ordering, and stored state, the pipeline
/// produces identical output; concurrent runs on disjoint events do not
/// affect each other (modules share state only through the stores).
pub struct Pipeline {
    modules: Vec<Arc<dyn PolicyModule>>,
    default_action: Action,
}

impl Pipeline {
    /// Build a pipeline over an ordered module list.
    ///
    /// `default_action` applies only when no module participates in the
    /// event's phase.
    #[must_use]
    pub fn new(modules: Vec<Arc<dyn PolicyModule>>, default_action: Action) -> Self {
        Self {
            modules,
            default_action,
        }
    }

    /// Modules registered with this pipeline, in order.
    #[must_use]
    pub fn modules(&self) -> &[Arc<dyn PolicyModule>] {
        &self.modules
    }

    /// Run one event through every applicable module.
    pub async fn run(&self, event: &CanonicalEvent) -> PipelineResult {
        let mut transforms = Patch::default();
        let mut alerts: Vec<String> = Vec::new();
        let mut decisions: Vec<Decision> = Vec::new();

        for module in &self.modules {
            if !module.phases().contains(&event.phase) {
                continue;
            }

            let decision = match module.evaluate(event).await {
                Ok(decision) => decision,
                Err(err) => {
                    if module.mode() == ModuleMode::Observe {
                        warn!(
                            module = module.name(),
                            error = %err,
                            "observe-mode module error"
                        );
                        alerts.push(format!(
                            "[{}] observe-mode error: {err}",
                            module.name()
                        ));
                        continue;
                    }
                    error!(
                        module = module.name(),
                        error = %err,
                        "module error, failing closed"
                    );
                    let deny = Decision::deny(
                        module.name(),
                        format!("module error (fail-closed): {err}"),
                        Severity::Critical,
                    );
                    let reason = deny.reason.clone();
                    decisions.push(deny);
                    return PipelineResult {
                        final_action: Action::Deny,
                        final_reason: reason,
                        transforms,
                        alerts,
                        decisions,
                    };
                },
            };

            debug!(
                module = module.name(),
                action = decision.action.as_str(),
                phase = event.phase.as_str(),
                "module decision"
            );

            if module.mode() == ModuleMode::Observe
                && matches!(
                    decision.action,
                    Action::Deny | Action::Challenge | Action::Modify
                )
            {
                alerts.push(format!(
                    "[{}] observe-mode would {}: {}",
                    module.name(),
                    decision.action,
                    decision.reason
                ));
                decisions.push(decision);
                continue;
            }

            match decision.action {
                Action::Deny | Action::Challenge => {
                    let final_action = decision.action;
                    let final_reason = decision.reason.clone();
                    decisions.push(decision);
                    return PipelineResult {
                        final_action,
                        final_reason,
                        transforms,
                        alerts,
                        decisions,
                    };
                },
                Action::Modify => {
                    if let Some(patch) = &decision.patch {
                        transforms.compose(patch);
                    }
                    decisions.push(decision);
                },
                Action::Alert => {
                    alerts.push(format!("[{}] {}", module.name(), decision.reason));
                    decisions.push(decision);
                },
                Action::Allow => {
                    decisions.push(decision);
                },
            }
        }

        if decisions.is_empty() && alerts.is_empty() {
            return PipelineResult {
                final_action: self.default_action,
                final_reason: "no applicable modules".to_owned(),
                transforms,
                alerts,
                decisions,
            };
        }

        PipelineResult {
            final_action: Action::Allow,
            final_reason: "allow after module evaluation".to_owned(),
            transforms,
            alerts,
            decisions,
        }
    }
}
