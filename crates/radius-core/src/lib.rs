//! Core model for the Radius policy kernel.
//!
//! This crate defines the framework-independent building blocks every other
//! Radius crate works with:
//!
//! - [`CanonicalEvent`] — the projection of an orchestrator payload that all
//!   policy modules evaluate against, tagged with a [`Phase`].
//! - [`Decision`] — the single verdict a module produces per event
//!   (allow, deny, modify, challenge, or alert).
//! - [`PolicyModule`] — the trait a policy module implements. Phase set and
//!   mode are plain data; the pipeline performs a pure data filter.
//! - [`Pipeline`] — the ordered, short-circuiting, fail-closed executor that
//!   folds module decisions into a [`PipelineResult`].
//!
//! No model is in the decision path: everything here reduces to pattern
//! matching, path canonicalization, numeric thresholds, and persisted
//! counters owned by the sibling crates.

pub mod decision;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod merge;
pub mod module;
pub mod paths;
pub mod pipeline;

pub use decision::{Action, ApprovalChannel, ChallengeRequest, Decision, Patch, Severity};
pub use error::{CoreError, CoreResult};
pub use event::{
    Artifact, ArtifactKind, CanonicalEvent, Framework, Phase, ToolCall, ToolResult,
};
pub use module::{ModuleMode, PolicyModule};
pub use pipeline::{Pipeline, PipelineResult};
