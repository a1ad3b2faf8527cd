//! The approval resolver: channel dispatch and outcome model.

use std::time::Duration;

use radius_config::ApprovalConfig;
use radius_core::{ApprovalChannel, CanonicalEvent, ChallengeRequest};
use tracing::warn;
use uuid::Uuid;

use crate::http::HttpConnector;
use crate::telegram::TelegramConnector;

/// What the human (or the channel) decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// Let this call proceed.
    Approved,
    /// Let this call proceed and grant a temporary lease.
    ApprovedTemporary {
        /// Requested TTL in seconds, when the channel named one.
        ttl_sec: Option<u64>,
    },
    /// Refuse the call.
    Denied,
    /// Nobody answered before the deadline.
    Timeout,
    /// The channel itself failed.
    Error,
}

/// Outcome plus the channel's stated reason.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The outcome.
    pub outcome: ApprovalOutcome,
    /// Channel name that produced it (used as a reason prefix).
    pub channel: String,
    /// Reason text, when the channel supplied one.
    pub reason: Option<String>,
}

impl Resolution {
    /// Build a resolution.
    #[must_use]
    pub fn new(outcome: ApprovalOutcome, channel: &str, reason: Option<String>) -> Self {
        Self {
            outcome,
            channel: channel.to_owned(),
            reason,
        }
    }
}

/// A resolve request handed to a connector.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    /// Opaque id carried in callback data and bridge payloads.
    pub approval_id: String,
    /// Prompt shown to the human.
    pub prompt: String,
    /// How long the connector may wait.
    pub timeout: Duration,
    /// The event being challenged, for bridge payloads.
    pub event: CanonicalEvent,
}

impl ApprovalRequest {
    /// Build a request for one challenge.
    #[must_use]
    pub fn for_challenge(challenge: &ChallengeRequest, event: &CanonicalEvent) -> Self {
        Self {
            approval_id: Uuid::new_v4().to_string(),
            prompt: challenge.prompt.clone(),
            timeout: Duration::from_secs(challenge.timeout_seconds.max(1)),
            event: event.clone(),
        }
    }
}

/// Dispatches challenges to the configured connector for their channel.
pub struct ApprovalResolver {
    mode: String,
    telegram: Option<TelegramConnector>,
    http: Option<HttpConnector>,
}

impl ApprovalResolver {
    /// Build from the approval configuration.
    #[must_use]
    pub fn from_config(config: &ApprovalConfig) -> Self {
        Self {
            mode: config.mode.clone(),
            telegram: config.telegram.as_ref().map(TelegramConnector::new),
            http: config.http.as_ref().map(HttpConnector::new),
        }
    }

    /// Resolve one challenge.
    ///
    /// Any mode other than `sync_wait` resolves as denied — declared modes
    /// that are not implemented must not be guessed at.
    pub async fn resolve(
        &self,
        challenge: &ChallengeRequest,
        event: &CanonicalEvent,
    ) -> Resolution {
        if self.mode != "sync_wait" {
            return Resolution::new(
                ApprovalOutcome::Denied,
                challenge.channel.as_str(),
                Some(format!("approval mode not implemented: {}", self.mode)),
            );
        }
        let request = ApprovalRequest::for_challenge(challenge, event);
        match challenge.channel {
            ApprovalChannel::Telegram | ApprovalChannel::Discord => match &self.telegram {
                Some(connector) => connector.resolve(&request).await,
                None => missing_connector(challenge.channel),
            },
            ApprovalChannel::Http => match &self.http {
                Some(connector) => connector.resolve(&request).await,
                None => missing_connector(challenge.channel),
            },
            ApprovalChannel::Orchestrator => Resolution::new(
                ApprovalOutcome::Error,
                "orchestrator",
                Some("orchestrator channel is resolved by the caller".to_owned()),
            ),
        }
    }
}

impl std::fmt::Debug for ApprovalResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalResolver")
            .field("mode", &self.mode)
            .field("telegram", &self.telegram.is_some())
            .field("http", &self.http.is_some())
            .finish()
    }
}

fn missing_connector(channel: ApprovalChannel) -> Resolution {
    warn!(channel = channel.as_str(), "no connector configured");
    Resolution::new(
        ApprovalOutcome::Error,
        channel.as_str(),
        Some(format!("no connector configured for channel {channel}")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use radius_core::{Framework, Phase};

    fn challenge(channel: ApprovalChannel) -> ChallengeRequest {
        ChallengeRequest {
            channel,
            prompt: "Approve?".to_owned(),
            timeout_seconds: 5,
        }
    }

    fn event() -> CanonicalEvent {
        CanonicalEvent::new(Phase::PreTool, Framework::Generic).with_session("s-1")
    }

    #[tokio::test]
    async fn test_unimplemented_mode_denies() {
        let resolver = ApprovalResolver::from_config(&ApprovalConfig {
            mode: "async_token".to_owned(),
            ..ApprovalConfig::default()
        });
        let resolution = resolver
            .resolve(&challenge(ApprovalChannel::Telegram), &event())
            .await;
        assert_eq!(resolution.outcome, ApprovalOutcome::Denied);
        assert!(resolution
            .reason
            .unwrap()
            .contains("not implemented"));
    }

    #[tokio::test]
    async fn test_missing_connector_is_error() {
        let resolver = ApprovalResolver::from_config(&ApprovalConfig::default());
        let resolution = resolver
            .resolve(&challenge(ApprovalChannel::Http), &event())
            .await;
        assert_eq!(resolution.outcome, ApprovalOutcome::Error);
    }

    #[tokio::test]
    async fn test_orchestrator_channel_is_callers_job() {
        let resolver = ApprovalResolver::from_config(&ApprovalConfig::default());
        let resolution = resolver
            .resolve(&challenge(ApprovalChannel::Orchestrator), &event())
            .await;
        assert_eq!(resolution.outcome, ApprovalOutcome::Error);
        assert!(resolution.reason.unwrap().contains("caller"));
    }

    #[test]
    fn test_request_ids_unique() {
        let a = ApprovalRequest::for_challenge(&challenge(ApprovalChannel::Telegram), &event());
        let b = ApprovalRequest::for_challenge(&challenge(ApprovalChannel::Telegram), &event());
        assert_ne!(a.approval_id, b.approval_id);
    }

    #[test]
    fn test_timeout_clamped_to_at_least_one_second() {
        let request = ApprovalRequest::for_challenge(
            &ChallengeRequest {
                channel: ApprovalChannel::Telegram,
                prompt: "p".to_owned(),
                timeout_seconds: 0,
            },
            &event(),
        );
        assert_eq!(request.timeout, Duration::from_secs(1));
    }
}
