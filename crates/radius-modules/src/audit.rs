//! Audit module: records every event, decides nothing.

use std::sync::Arc;

use async_trait::async_trait;
use radius_audit::AuditRecorder;
use radius_core::{CanonicalEvent, CoreResult, Decision, ModuleMode, Phase, PolicyModule};

/// Pipeline-resident recorder hook.
///
/// Always returns allow; the per-event entry is emitted here, and the
/// runtime emits the per-result entry after the pipeline terminates so the
/// decision chain is complete.
pub struct AuditModule {
    recorder: Arc<AuditRecorder>,
}

impl AuditModule {
    /// Module name in decision chains.
    pub const NAME: &'static str = "audit";

    /// Wrap the shared recorder.
    #[must_use]
    pub fn new(recorder: Arc<AuditRecorder>) -> Self {
        Self { recorder }
    }
}

impl std::fmt::Debug for AuditModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditModule").finish_non_exhaustive()
    }
}

#[async_trait]
impl PolicyModule for AuditModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn phases(&self) -> &[Phase] {
        &Phase::ALL
    }

    fn mode(&self) -> ModuleMode {
        ModuleMode::Enforce
    }

    async fn evaluate(&self, event: &CanonicalEvent) -> CoreResult<Decision> {
        self.recorder.record_event(event);
        Ok(Decision::allow(Self::NAME))
    }
}
