//! In-memory state store.
//!
//! Mutations serialize per key through a lock table: the outer map lock is
//! held only long enough to fetch or create the per-key entry, so unrelated
//! sessions never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StateResult;
use crate::lease::Lease;
use crate::store::{RateOutcome, StateStore};

#[derive(Debug, Default)]
struct Streak {
    fingerprint: String,
    count: u32,
    last_seen_ms: i64,
}

/// Lock table keyed by an owned string.
#[derive(Debug, Default)]
struct KeyedLocks<T> {
    inner: StdMutex<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T: Default> KeyedLocks<T> {
    fn entry(&self, key: &str) -> Arc<Mutex<T>> {
        let mut map = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(
            map.entry(key.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(T::default()))),
        )
    }
}

/// Volatile state store with the same observable behaviour as the SQLite
/// backend. State dies with the process.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    leases: RwLock<Vec<Lease>>,
    rate_windows: KeyedLocks<Vec<i64>>,
    streaks: KeyedLocks<Streak>,
}

impl MemoryStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired leases (test support).
    #[must_use]
    pub fn lease_count(&self, now_ms: i64) -> usize {
        self.leases
            .read()
            .map(|leases| leases.iter().filter(|l| l.expires_at_ms > now_ms).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn insert_lease(&self, lease: Lease) -> StateResult<()> {
        let mut leases = self
            .leases
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let now_ms = crate::now_ms();
        leases.retain(|l| l.expires_at_ms > now_ms);
        leases.push(lease);
        Ok(())
    }

    async fn find_active_lease(
        &self,
        session: &str,
        agent: Option<&str>,
        tool: &str,
        now_ms: i64,
    ) -> StateResult<Option<Lease>> {
        let leases = self
            .leases
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(leases
            .iter()
            .filter(|l| l.covers(session, agent, tool, now_ms))
            .max_by_key(|l| l.expires_at_ms)
            .cloned())
    }

    async fn consume_rate_budget(
        &self,
        key: &str,
        window_ms: i64,
        max_calls: u32,
        now_ms: i64,
    ) -> StateResult<RateOutcome> {
        let window = self.rate_windows.entry(key);
        let mut events = window.lock().await;
        let cutoff = now_ms.saturating_sub(window_ms);
        events.retain(|ts| *ts > cutoff);
        let count = u32::try_from(events.len()).unwrap_or(u32::MAX);
        if count >= max_calls {
            return Ok(RateOutcome {
                allowed: false,
                count,
            });
        }
        events.push(now_ms);
        Ok(RateOutcome {
            allowed: true,
            count,
        })
    }

    async fn consume_repetition(
        &self,
        bucket: &str,
        fingerprint: &str,
        cooldown_ms: i64,
        now_ms: i64,
    ) -> StateResult<u32> {
        let entry = self.streaks.entry(bucket);
        let mut streak = entry.lock().await;
        if streak.fingerprint == fingerprint
            && now_ms.saturating_sub(streak.last_seen_ms) <= cooldown_ms
        {
            streak.count = streak.count.saturating_add(1);
        } else {
            streak.fingerprint = fingerprint.to_owned();
            streak.count = 1;
        }
        streak.last_seen_ms = now_ms;
        Ok(streak.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(id: &str, expires_at_ms: i64) -> Lease {
        Lease {
            id: id.to_owned(),
            session_id: "s-1".to_owned(),
            agent_name: None,
            tool: "*".to_owned(),
            expires_at_ms,
            reason: None,
        }
    }

    #[tokio::test]
    async fn test_lease_roundtrip() {
        let store = MemoryStateStore::new();
        let far = crate::now_ms() + 60_000;
        store.insert_lease(lease("l-1", far)).await.unwrap();

        let found = store
            .find_active_lease("s-1", None, "Bash", far - 1_000)
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, "l-1");
    }

    #[tokio::test]
    async fn test_most_recently_expiring_match_wins() {
        let store = MemoryStateStore::new();
        let base = crate::now_ms() + 60_000;
        store.insert_lease(lease("short", base)).await.unwrap();
        store.insert_lease(lease("long", base + 60_000)).await.unwrap();

        let found = store
            .find_active_lease("s-1", None, "Bash", base - 1_000)
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, "long");
    }

    #[tokio::test]
    async fn test_expired_lease_not_returned() {
        let store = MemoryStateStore::new();
        let now = crate::now_ms();
        store.insert_lease(lease("old", now + 10)).await.unwrap();
        let found = store
            .find_active_lease("s-1", None, "Bash", now + 100)
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_rate_window_denies_at_max() {
        let store = MemoryStateStore::new();
        let now = 1_000_000;
        for i in 0..3 {
            let outcome = store
                .consume_rate_budget("s-1", 60_000, 3, now + i)
                .await
                .unwrap();
            assert!(outcome.allowed, "call {i}");
        }
        let denied = store
            .consume_rate_budget("s-1", 60_000, 3, now + 10)
            .await
            .unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.count, 3);
    }

    #[tokio::test]
    async fn test_rate_window_slides() {
        let store = MemoryStateStore::new();
        let now = 1_000_000;
        for i in 0..3 {
            store
                .consume_rate_budget("s-1", 1_000, 3, now + i)
                .await
                .unwrap();
        }
        // Past the window the old events evict and calls flow again.
        let outcome = store
            .consume_rate_budget("s-1", 1_000, 3, now + 2_000)
            .await
            .unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.count, 0);
    }

    #[tokio::test]
    async fn test_denied_call_does_not_extend_window() {
        let store = MemoryStateStore::new();
        let now = 1_000_000;
        for _ in 0..2 {
            store.consume_rate_budget("k", 1_000, 2, now).await.unwrap();
        }
        // Denied attempts inside the window.
        for i in 0..5 {
            let outcome = store
                .consume_rate_budget("k", 1_000, 2, now + 100 + i)
                .await
                .unwrap();
            assert!(!outcome.allowed);
        }
        // Window still clears exactly when the two allowed calls expire.
        let outcome = store
            .consume_rate_budget("k", 1_000, 2, now + 1_001)
            .await
            .unwrap();
        assert!(outcome.allowed);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryStateStore::new();
        let now = 1_000_000;
        for _ in 0..3 {
            store.consume_rate_budget("a", 60_000, 3, now).await.unwrap();
        }
        assert!(!store
            .consume_rate_budget("a", 60_000, 3, now)
            .await
            .unwrap()
            .allowed);
        assert!(store
            .consume_rate_budget("b", 60_000, 3, now)
            .await
            .unwrap()
            .allowed);
    }

    #[tokio::test]
    async fn test_repetition_streak_increments_and_resets() {
        let store = MemoryStateStore::new();
        let now = 1_000_000;
        assert_eq!(
            store.consume_repetition("b", "fp-1", 5_000, now).await.unwrap(),
            1
        );
        assert_eq!(
            store
                .consume_repetition("b", "fp-1", 5_000, now + 100)
                .await
                .unwrap(),
            2
        );
        // Different fingerprint resets.
        assert_eq!(
            store
                .consume_repetition("b", "fp-2", 5_000, now + 200)
                .await
                .unwrap(),
            1
        );
        // Cooldown elapsed resets.
        assert_eq!(
            store
                .consume_repetition("b", "fp-2", 5_000, now + 10_000)
                .await
                .unwrap(),
            1
        );
    }
}
