//! HTTP bridge connector: approval through a custom endpoint.
//!
//! The bridge receives `{approvalId, prompt, timeoutSec, event}` and
//! answers with `{status, reason?, ttlSec?}`. A `pending` status switches
//! to a polling branch against the supplied `pollUrl` until the remaining
//! time budget runs out.

use std::time::Duration;

use radius_config::HttpConnectorConfig;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::debug;

use crate::resolver::{ApprovalOutcome, ApprovalRequest, Resolution};

const CHANNEL: &str = "http";

/// Default 30-minute grant for temporary-approval aliases without a TTL.
const DEFAULT_TEMPORARY_TTL_SEC: u64 = 30 * 60;

/// Default poll interval when the bridge names none.
const DEFAULT_RETRY_AFTER_MS: u64 = 1_000;

/// A normalized bridge answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeStatus {
    /// Permanently approved (for this call).
    Approved,
    /// Approved with a temporary lease.
    ApprovedTemporary {
        /// TTL in seconds.
        ttl_sec: u64,
    },
    /// The bridge wants us to poll `pollUrl`.
    Pending {
        /// Where to poll.
        poll_url: Option<String>,
        /// How long to wait between polls.
        retry_after_ms: u64,
    },
    /// Denied.
    Denied,
    /// The bridge reports a timeout.
    Timeout,
    /// The bridge reports a failure (or the shape was unrecognized).
    Error,
}

/// Normalize a bridge response body.
#[must_use]
pub fn normalize_status(body: &Value) -> BridgeStatus {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_lowercase();
    match status.as_str() {
        "approved" | "allow" | "allowed" | "approve" => BridgeStatus::Approved,
        "approved_temporary" | "approve_temporary" | "approve_30m" | "allow_temporary"
        | "allow_30m" | "temporary" => BridgeStatus::ApprovedTemporary {
            ttl_sec: body
                .get("ttlSec")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_TEMPORARY_TTL_SEC),
        },
        "pending" | "wait" => BridgeStatus::Pending {
            poll_url: body
                .get("pollUrl")
                .and_then(Value::as_str)
                .map(str::to_owned),
            retry_after_ms: body
                .get("retryAfterMs")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_RETRY_AFTER_MS),
        },
        "denied" | "deny" | "block" | "blocked" => BridgeStatus::Denied,
        "timeout" | "timed_out" => BridgeStatus::Timeout,
        _ => BridgeStatus::Error,
    }
}

/// HTTP approval bridge.
pub struct HttpConnector {
    config: HttpConnectorConfig,
    client: reqwest::Client,
}

impl HttpConnector {
    /// Build from connector configuration.
    #[must_use]
    pub fn new(config: &HttpConnectorConfig) -> Self {
        Self {
            config: config.clone(),
            client: reqwest::Client::new(),
        }
    }

    /// The effective per-call timeout: the smaller of the connector's and
    /// the challenge's limits.
    #[must_use]
    pub fn effective_timeout(&self, challenge_timeout: Duration) -> Duration {
        Duration::from_millis(self.config.timeout_ms).min(challenge_timeout)
    }

    fn reason_of(body: &Value) -> Option<String> {
        body.get("reason").and_then(Value::as_str).map(str::to_owned)
    }

    fn finish(body: &Value, status: BridgeStatus) -> Resolution {
        let reason = Self::reason_of(body);
        let outcome = match status {
            BridgeStatus::Approved => ApprovalOutcome::Approved,
            BridgeStatus::ApprovedTemporary { ttl_sec } => ApprovalOutcome::ApprovedTemporary {
                ttl_sec: Some(ttl_sec),
            },
            BridgeStatus::Denied => ApprovalOutcome::Denied,
            BridgeStatus::Timeout => ApprovalOutcome::Timeout,
            BridgeStatus::Error | BridgeStatus::Pending { .. } => ApprovalOutcome::Error,
        };
        Resolution::new(outcome, CHANNEL, reason)
    }

    /// Run one approval round trip.
    pub async fn resolve(&self, request: &ApprovalRequest) -> Resolution {
        let deadline = Instant::now() + request.timeout;
        let call_timeout = self.effective_timeout(request.timeout);

        let body = json!({
            "approvalId": request.approval_id,
            "prompt": request.prompt,
            "timeoutSec": request.timeout.as_secs(),
            "event": request.event,
        });
        let mut http_request = self
            .client
            .post(&self.config.url)
            .timeout(call_timeout)
            .json(&body);
        for (key, value) in &self.config.headers {
            http_request = http_request.header(key, value);
        }

        let response = match http_request.send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return Resolution::new(ApprovalOutcome::Timeout, CHANNEL, None);
            },
            Err(err) => {
                return Resolution::new(ApprovalOutcome::Error, CHANNEL, Some(err.to_string()));
            },
        };
        if !response.status().is_success() {
            return Resolution::new(
                ApprovalOutcome::Error,
                CHANNEL,
                Some(format!("bridge returned {}", response.status())),
            );
        }
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                return Resolution::new(ApprovalOutcome::Error, CHANNEL, Some(err.to_string()));
            },
        };

        match normalize_status(&body) {
            BridgeStatus::Pending {
                poll_url: Some(poll_url),
                retry_after_ms,
            } => self.poll(&poll_url, retry_after_ms, deadline).await,
            BridgeStatus::Pending { poll_url: None, .. } => Resolution::new(
                ApprovalOutcome::Error,
                CHANNEL,
                Some("pending response without pollUrl".to_owned()),
            ),
            status => Self::finish(&body, status),
        }
    }

    /// Poll the bridge until it answers or the time budget runs out.
    async fn poll(&self, poll_url: &str, retry_after_ms: u64, deadline: Instant) -> Resolution {
        let mut wait = Duration::from_millis(retry_after_ms.max(50));
        loop {
            let now = Instant::now();
            if now + wait >= deadline {
                return Resolution::new(ApprovalOutcome::Timeout, CHANNEL, None);
            }
            tokio::time::sleep(wait).await;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Resolution::new(ApprovalOutcome::Timeout, CHANNEL, None);
            }
            debug!(poll_url, "polling approval bridge");
            let response = match self
                .client
                .get(poll_url)
                .timeout(remaining.min(Duration::from_millis(self.config.timeout_ms)))
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) if err.is_timeout() => {
                    return Resolution::new(ApprovalOutcome::Timeout, CHANNEL, None);
                },
                Err(err) => {
                    return Resolution::new(
                        ApprovalOutcome::Error,
                        CHANNEL,
                        Some(err.to_string()),
                    );
                },
            };
            let body: Value = match response.json().await {
                Ok(body) => body,
                Err(err) => {
                    return Resolution::new(
                        ApprovalOutcome::Error,
                        CHANNEL,
                        Some(err.to_string()),
                    );
                },
            };
            match normalize_status(&body) {
                BridgeStatus::Pending { retry_after_ms, .. } => {
                    wait = Duration::from_millis(retry_after_ms.max(50));
                },
                status => return Self::finish(&body, status),
            }
        }
    }
}

impl std::fmt::Debug for HttpConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnector")
            .field("url", &self.config.url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radius_core::{CanonicalEvent, Framework, Phase};

    #[test]
    fn test_status_normalization_approved_aliases() {
        for status in ["approved", "allow", "allowed", "approve"] {
            assert_eq!(
                normalize_status(&json!({"status": status})),
                BridgeStatus::Approved,
                "{status}"
            );
        }
    }

    #[test]
    fn test_status_normalization_temporary_aliases() {
        for status in ["approved_temporary", "approve_30m", "allow_temporary"] {
            assert_eq!(
                normalize_status(&json!({"status": status})),
                BridgeStatus::ApprovedTemporary {
                    ttl_sec: DEFAULT_TEMPORARY_TTL_SEC
                },
                "{status}"
            );
        }
        assert_eq!(
            normalize_status(&json!({"status": "approved_temporary", "ttlSec": 120})),
            BridgeStatus::ApprovedTemporary { ttl_sec: 120 }
        );
    }

    #[test]
    fn test_status_normalization_denied_and_terminal() {
        for status in ["denied", "deny", "block", "blocked"] {
            assert_eq!(normalize_status(&json!({"status": status})), BridgeStatus::Denied);
        }
        assert_eq!(
            normalize_status(&json!({"status": "timed_out"})),
            BridgeStatus::Timeout
        );
        assert_eq!(
            normalize_status(&json!({"status": "failed"})),
            BridgeStatus::Error
        );
        assert_eq!(normalize_status(&json!({})), BridgeStatus::Error);
    }

    #[test]
    fn test_status_normalization_pending() {
        assert_eq!(
            normalize_status(&json!({
                "status": "pending",
                "pollUrl": "http://bridge/poll/1",
                "retryAfterMs": 250,
            })),
            BridgeStatus::Pending {
                poll_url: Some("http://bridge/poll/1".to_owned()),
                retry_after_ms: 250,
            }
        );
        assert_eq!(
            normalize_status(&json!({"status": "wait"})),
            BridgeStatus::Pending {
                poll_url: None,
                retry_after_ms: DEFAULT_RETRY_AFTER_MS,
            }
        );
    }

    #[test]
    fn test_effective_timeout_is_min() {
        let connector = HttpConnector::new(&HttpConnectorConfig {
            url: "http://bridge".to_owned(),
            timeout_ms: 30_000,
            ..HttpConnectorConfig::default()
        });
        assert_eq!(
            connector.effective_timeout(Duration::from_secs(5)),
            Duration::from_secs(5)
        );
        assert_eq!(
            connector.effective_timeout(Duration::from_secs(120)),
            Duration::from_secs(30)
        );
    }

    #[tokio::test]
    async fn test_unreachable_bridge_is_error() {
        let connector = HttpConnector::new(&HttpConnectorConfig {
            url: "http://127.0.0.1:1/approve".to_owned(),
            timeout_ms: 300,
            ..HttpConnectorConfig::default()
        });
        let request = ApprovalRequest {
            approval_id: "id".to_owned(),
            prompt: "Approve?".to_owned(),
            timeout: Duration::from_secs(1),
            event: CanonicalEvent::new(Phase::PreTool, Framework::Generic),
        };
        let resolution = connector.resolve(&request).await;
        // Connection refused surfaces as error (not timeout).
        assert_eq!(resolution.outcome, ApprovalOutcome::Error);
    }
}
