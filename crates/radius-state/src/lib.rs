//! Shared, durable state for the Radius policy kernel.
//!
//! Three kinds of state outlive a single event: approval leases, rate
//! windows, and repetition streaks. The [`StateStore`] trait exposes them
//! through four operations; the in-memory and SQLite implementations have
//! identical observable behaviour, so modules never care which one is
//! underneath. The persistent variant is the only one reachable when a
//! module declares `store.required = true`.

pub mod error;
pub mod lease;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use error::{StateError, StateResult};
pub use lease::Lease;
pub use memory::MemoryStateStore;
pub use sqlite::{SqliteStateStore, DEFAULT_DB_PATH};
pub use store::{RateOutcome, StateStore};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
