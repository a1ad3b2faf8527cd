//! SQLite-backed state store.
//!
//! One database file (default `./.radius/state.db`) hosts the lease, rate,
//! and repetition tables; the same file may be shared across modules. Every
//! mutating operation runs inside a `BEGIN IMMEDIATE` transaction with a
//! five-second busy timeout, and the journal is WAL so concurrent processes
//! interleave safely.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::lease::Lease;
use crate::store::{RateOutcome, StateStore};

/// Default database location, relative to the working directory.
pub const DEFAULT_DB_PATH: &str = "./.radius/state.db";

/// Rate events older than this are swept regardless of any window.
const RATE_RETENTION_MS: i64 = 24 * 60 * 60 * 1_000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS approval_leases (
    id            TEXT PRIMARY KEY,
    session_id    TEXT NOT NULL,
    agent_name    TEXT,
    tool          TEXT NOT NULL,
    expires_at_ms INTEGER NOT NULL,
    reason        TEXT
);
CREATE INDEX IF NOT EXISTS idx_approval_leases_scope
    ON approval_leases (session_id, agent_name, tool, expires_at_ms);

CREATE TABLE IF NOT EXISTS rate_budget_events (
    key   TEXT NOT NULL,
    ts_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rate_budget_events_key_ts
    ON rate_budget_events (key, ts_ms);

CREATE TABLE IF NOT EXISTS repetition_streaks (
    bucket       TEXT PRIMARY KEY,
    fingerprint  TEXT NOT NULL,
    count        INTEGER NOT NULL,
    last_seen_ms INTEGER NOT NULL
);
";

/// Durable state store over a single SQLite file.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStateStore {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Unavailable`] when the parent directory cannot
    /// be created or the database cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> StateResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StateError::Unavailable {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            }
        }
        let conn = Connection::open(&path).map_err(|e| StateError::Unavailable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "opened state database");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// An in-memory database with identical schema (test support).
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn in_memory() -> StateResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    /// The database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for SqliteStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStateStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn insert_lease(&self, lease: Lease) -> StateResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM approval_leases WHERE expires_at_ms <= ?1",
            params![crate::now_ms()],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO approval_leases
                 (id, session_id, agent_name, tool, expires_at_ms, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                lease.id,
                lease.session_id,
                lease.agent_name,
                lease.tool,
                lease.expires_at_ms,
                lease.reason,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn find_active_lease(
        &self,
        session: &str,
        agent: Option<&str>,
        tool: &str,
        now_ms: i64,
    ) -> StateResult<Option<Lease>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        // Expiry sweep on every read keeps the table bounded.
        tx.execute(
            "DELETE FROM approval_leases WHERE expires_at_ms <= ?1",
            params![now_ms],
        )?;
        let lease = tx
            .query_row(
                "SELECT id, session_id, agent_name, tool, expires_at_ms, reason
                   FROM approval_leases
                  WHERE session_id = ?1
                    AND (agent_name IS NULL OR agent_name = ?2)
                    AND (tool = '*' OR tool = ?3)
                    AND expires_at_ms > ?4
                  ORDER BY expires_at_ms DESC
                  LIMIT 1",
                params![session, agent, tool, now_ms],
                |row| {
                    Ok(Lease {
                        id: row.get(0)?,
                        session_id: row.get(1)?,
                        agent_name: row.get(2)?,
                        tool: row.get(3)?,
                        expires_at_ms: row.get(4)?,
                        reason: row.get(5)?,
                    })
                },
            )
            .optional()?;
        tx.commit()?;
        Ok(lease)
    }

    async fn consume_rate_budget(
        &self,
        key: &str,
        window_ms: i64,
        max_calls: u32,
        now_ms: i64,
    ) -> StateResult<RateOutcome> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM rate_budget_events WHERE key = ?1 AND ts_ms <= ?2",
            params![key, now_ms.saturating_sub(window_ms)],
        )?;
        // Retention prune across all keys; no background task needed.
        tx.execute(
            "DELETE FROM rate_budget_events WHERE ts_ms <= ?1",
            params![now_ms.saturating_sub(RATE_RETENTION_MS)],
        )?;
        let count: u32 = tx.query_row(
            "SELECT COUNT(*) FROM rate_budget_events WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        let allowed = count < max_calls;
        if allowed {
            tx.execute(
                "INSERT INTO rate_budget_events (key, ts_ms) VALUES (?1, ?2)",
                params![key, now_ms],
            )?;
        }
        tx.commit()?;
        Ok(RateOutcome { allowed, count })
    }

    async fn consume_repetition(
        &self,
        bucket: &str,
        fingerprint: &str,
        cooldown_ms: i64,
        now_ms: i64,
    ) -> StateResult<u32> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let previous: Option<(String, u32, i64)> = tx
            .query_row(
                "SELECT fingerprint, count, last_seen_ms
                   FROM repetition_streaks WHERE bucket = ?1",
                params![bucket],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let count = match previous {
            Some((prev_fp, prev_count, last_seen))
                if prev_fp == fingerprint
                    && now_ms.saturating_sub(last_seen) <= cooldown_ms =>
            {
                prev_count.saturating_add(1)
            },
            _ => 1,
        };
        tx.execute(
            "INSERT INTO repetition_streaks (bucket, fingerprint, count, last_seen_ms)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(bucket) DO UPDATE SET
                 fingerprint = excluded.fingerprint,
                 count = excluded.count,
                 last_seen_ms = excluded.last_seen_ms",
            params![bucket, fingerprint, count, now_ms],
        )?;
        tx.commit()?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_applies_to_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStateStore::open(dir.path().join("state.db")).unwrap();
        assert!(store.path().ends_with("state.db"));
    }

    #[tokio::test]
    async fn test_lease_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let far = crate::now_ms() + 60_000;

        {
            let store = SqliteStateStore::open(&path).unwrap();
            store
                .insert_lease(Lease::wildcard("s-1", Some("agent".to_owned()), far, None))
                .await
                .unwrap();
        }

        // A second handle over the same file sees the lease.
        let store = SqliteStateStore::open(&path).unwrap();
        let found = store
            .find_active_lease("s-1", Some("agent"), "Bash", far - 1_000)
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_lease_scope_predicate() {
        let store = SqliteStateStore::in_memory().unwrap();
        let far = crate::now_ms() + 60_000;
        store
            .insert_lease(Lease {
                id: "l-1".to_owned(),
                session_id: "s-1".to_owned(),
                agent_name: Some("researcher".to_owned()),
                tool: "Bash".to_owned(),
                expires_at_ms: far,
                reason: None,
            })
            .await
            .unwrap();

        let now = far - 1_000;
        assert!(store
            .find_active_lease("s-1", Some("researcher"), "Bash", now)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_active_lease("s-1", Some("writer"), "Bash", now)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_active_lease("s-1", Some("researcher"), "Read", now)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_active_lease("s-2", Some("researcher"), "Bash", now)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_expiry_sweep_on_read() {
        let store = SqliteStateStore::in_memory().unwrap();
        let now = crate::now_ms();
        store
            .insert_lease(Lease::wildcard("s-1", None, now + 50, None))
            .await
            .unwrap();
        let found = store
            .find_active_lease("s-1", None, "Bash", now + 100)
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_rate_budget_transactional_semantics() {
        let store = SqliteStateStore::in_memory().unwrap();
        let now = 1_000_000;
        for i in 0..3 {
            let outcome = store
                .consume_rate_budget("s-1", 60_000, 3, now + i)
                .await
                .unwrap();
            assert!(outcome.allowed);
            assert_eq!(outcome.count, u32::try_from(i).unwrap());
        }
        let denied = store
            .consume_rate_budget("s-1", 60_000, 3, now + 10)
            .await
            .unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.count, 3);
    }

    #[tokio::test]
    async fn test_rate_retention_prune() {
        let store = SqliteStateStore::in_memory().unwrap();
        let day = 24 * 60 * 60 * 1_000;
        store
            .consume_rate_budget("old", 10 * day, 100, 1_000)
            .await
            .unwrap();
        // A much later call on any key sweeps events beyond retention.
        store
            .consume_rate_budget("new", 60_000, 100, 1_000 + 2 * day)
            .await
            .unwrap();
        let outcome = store
            .consume_rate_budget("old", 10 * day, 1, 1_000 + 2 * day)
            .await
            .unwrap();
        // The old event is gone, so the single slot is free again.
        assert!(outcome.allowed);
    }

    #[tokio::test]
    async fn test_repetition_matches_memory_semantics() {
        let store = SqliteStateStore::in_memory().unwrap();
        let now = 1_000_000;
        assert_eq!(
            store.consume_repetition("b", "fp", 5_000, now).await.unwrap(),
            1
        );
        assert_eq!(
            store
                .consume_repetition("b", "fp", 5_000, now + 100)
                .await
                .unwrap(),
            2
        );
        assert_eq!(
            store
                .consume_repetition("b", "other", 5_000, now + 200)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .consume_repetition("b", "other", 5_000, now + 20_000)
                .await
                .unwrap(),
            1
        );
    }
}
