//! The policy module trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::decision::Decision;
use crate::error::CoreResult;
use crate::event::{CanonicalEvent, Phase};

/// Whether a module's verdicts are enforced or only reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleMode {
    /// Deny, challenge, and modify decisions take effect; evaluation errors
    /// fail closed.
    #[default]
    Enforce,
    /// Blocking decisions are downgraded to alert lines; evaluation errors
    /// alert instead of denying.
    Observe,
}

/// A self-contained policy predicate.
///
/// A module carries a stable name, the set of phases it participates in,
/// and its mode as plain data. It receives an untyped configuration mapping
/// at construction (see the module registry) and produces exactly one
/// [`Decision`] per event.
#[async_trait]
pub trait PolicyModule: Send + Sync {
    /// Stable module name, used in decision chains and audit entries.
    fn name(&self) -> &str;

    /// Phases this module participates in.
    fn phases(&self) -> &[Phase];

    /// Enforce or observe.
    fn mode(&self) -> ModuleMode;

    /// Evaluate one event.
    ///
    /// # Errors
    ///
    /// An error here never crosses the pipeline boundary: enforce-mode
    /// modules fail closed, observe-mode modules produce an alert line.
    async fn evaluate(&self, event: &CanonicalEvent) -> CoreResult<Decision>;
}
