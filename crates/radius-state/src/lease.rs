//! Approval leases.
//!
//! A lease grants temporary bypass of approval challenges for a scope
//! (session, optional agent, tool or `"*"`). Leases are created exclusively
//! by the approval resolver on an `approved_temporary` verdict — never by
//! modules or users directly.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A time-bounded approval grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    /// Unique lease id.
    pub id: String,
    /// Session the lease is scoped to.
    pub session_id: String,
    /// Agent the lease is scoped to; `None` matches any agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// Tool the lease covers, or `"*"` for all tools.
    pub tool: String,
    /// Expiry, milliseconds since the Unix epoch.
    pub expires_at_ms: i64,
    /// Why the lease was granted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Lease {
    /// Create a wildcard-tool lease for a session/agent scope.
    #[must_use]
    pub fn wildcard(
        session_id: impl Into<String>,
        agent_name: Option<String>,
        expires_at_ms: i64,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            agent_name,
            tool: "*".to_owned(),
            expires_at_ms,
            reason,
        }
    }

    /// Whether this lease covers a request at `now_ms`.
    ///
    /// Scope predicate: session matches, the lease either carries no agent
    /// or the same agent, the tool is `"*"` or an exact match, and the
    /// lease has not expired.
    #[must_use]
    pub fn covers(&self, session: &str, agent: Option<&str>, tool: &str, now_ms: i64) -> bool {
        self.session_id == session
            && match &self.agent_name {
                None => true,
                Some(lease_agent) => agent == Some(lease_agent.as_str()),
            }
            && (self.tool == "*" || self.tool == tool)
            && self.expires_at_ms > now_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(agent: Option<&str>, tool: &str) -> Lease {
        Lease {
            id: "l-1".to_owned(),
            session_id: "s-1".to_owned(),
            agent_name: agent.map(str::to_owned),
            tool: tool.to_owned(),
            expires_at_ms: 10_000,
            reason: None,
        }
    }

    #[test]
    fn test_wildcard_tool_covers_any_tool() {
        let lease = lease(None, "*");
        assert!(lease.covers("s-1", None, "Bash", 5_000));
        assert!(lease.covers("s-1", Some("agent"), "Read", 5_000));
    }

    #[test]
    fn test_exact_tool_match() {
        let lease = lease(None, "Bash");
        assert!(lease.covers("s-1", None, "Bash", 5_000));
        assert!(!lease.covers("s-1", None, "Read", 5_000));
    }

    #[test]
    fn test_agent_scoping() {
        let lease = lease(Some("researcher"), "*");
        assert!(lease.covers("s-1", Some("researcher"), "Bash", 5_000));
        assert!(!lease.covers("s-1", Some("writer"), "Bash", 5_000));
        assert!(!lease.covers("s-1", None, "Bash", 5_000));
    }

    #[test]
    fn test_expiry() {
        let lease = lease(None, "*");
        assert!(lease.covers("s-1", None, "Bash", 9_999));
        assert!(!lease.covers("s-1", None, "Bash", 10_000));
    }

    #[test]
    fn test_session_mismatch() {
        let lease = lease(None, "*");
        assert!(!lease.covers("s-other", None, "Bash", 5_000));
    }
}
