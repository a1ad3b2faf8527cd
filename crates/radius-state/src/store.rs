//! The durable state abstraction.

use async_trait::async_trait;

use crate::error::StateResult;
use crate::lease::Lease;

/// Outcome of a rate-budget consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateOutcome {
    /// Whether the call fit inside the window.
    pub allowed: bool,
    /// Calls already observed in the window before this one.
    pub count: u32,
}

/// Four operations over shared state.
///
/// Implementations must be safe under concurrent events without global
/// locking: mutations serialize per key (lock table or SQL transaction
/// scope), never across unrelated keys.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Install a lease, replacing any expired entries for its scope.
    async fn insert_lease(&self, lease: Lease) -> StateResult<()>;

    /// Find the active lease covering a request, if any.
    ///
    /// Returns the most-recently-expiring match.
    async fn find_active_lease(
        &self,
        session: &str,
        agent: Option<&str>,
        tool: &str,
        now_ms: i64,
    ) -> StateResult<Option<Lease>>;

    /// Consume one slot of a sliding rate window.
    ///
    /// Expired events for the key are pruned, the remainder counted and
    /// compared against `max_calls`; the call is recorded only when it is
    /// allowed, so a denied call never extends the window.
    async fn consume_rate_budget(
        &self,
        key: &str,
        window_ms: i64,
        max_calls: u32,
        now_ms: i64,
    ) -> StateResult<RateOutcome>;

    /// Advance a repetition streak.
    ///
    /// When the bucket's previous fingerprint matches and its last-seen
    /// time is within `cooldown_ms`, the streak increments; otherwise it
    /// resets to 1. Returns the streak count after this call.
    async fn consume_repetition(
        &self,
        bucket: &str,
        fingerprint: &str,
        cooldown_ms: i64,
        now_ms: i64,
    ) -> StateResult<u32>;
}
