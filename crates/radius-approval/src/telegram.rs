//! Telegram chat connector: inline-keyboard approval over the Bot API.
//!
//! The prompt is posted with an approve/deny button pair to every
//! configured chat; updates are long-polled with a monotonically advancing
//! offset until a matching callback arrives or the deadline passes. The
//! callback originator must belong to the approver set AND the chat to the
//! allowed-chat set — empty sets reject everything.

use std::time::Duration;

use radius_config::TelegramConnectorConfig;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::resolver::{ApprovalOutcome, ApprovalRequest, Resolution};

const CHANNEL: &str = "telegram";

/// Parse `ag:approve:<id>` / `ag:deny:<id>` callback data for our id.
///
/// Returns `Some(true)` for approve, `Some(false)` for deny, `None` for
/// anything else (including someone else's approval).
#[must_use]
pub fn parse_callback(data: &str, approval_id: &str) -> Option<bool> {
    let rest = data.strip_prefix("ag:")?;
    let (verb, id) = rest.split_once(':')?;
    if id != approval_id {
        return None;
    }
    match verb {
        "approve" => Some(true),
        "deny" => Some(false),
        _ => None,
    }
}

/// Membership checks for one callback.
#[must_use]
pub fn authorized(config: &TelegramConnectorConfig, from_id: i64, chat_id: i64) -> bool {
    config.approver_ids.contains(&from_id) && config.chat_ids.contains(&chat_id)
}

/// Inline-keyboard approval connector.
pub struct TelegramConnector {
    config: TelegramConnectorConfig,
    client: reqwest::Client,
}

impl TelegramConnector {
    /// Build from connector configuration.
    #[must_use]
    pub fn new(config: &TelegramConnectorConfig) -> Self {
        Self {
            config: config.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        )
    }

    /// Call one Bot API method, returning the `result` of the standard
    /// `{ok, result}` envelope.
    async fn call(&self, method: &str, body: Value) -> Result<Value, String> {
        let response = self
            .client
            .post(self.method_url(method))
            .timeout(Duration::from_secs(35))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let envelope: Value = response.json().await.map_err(|e| e.to_string())?;
        if envelope.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(format!(
                "telegram API returned not-ok: {}",
                envelope.get("description").and_then(Value::as_str).unwrap_or("?")
            ));
        }
        Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Post the prompt with the button pair to every configured chat.
    async fn post_prompt(&self, request: &ApprovalRequest) -> Result<(), String> {
        let keyboard = json!({
            "inline_keyboard": [[
                {"text": "Approve", "callback_data": format!("ag:approve:{}", request.approval_id)},
                {"text": "Deny", "callback_data": format!("ag:deny:{}", request.approval_id)},
            ]]
        });
        let mut sent = false;
        for chat_id in &self.config.chat_ids {
            let body = json!({
                "chat_id": chat_id,
                "text": request.prompt,
                "reply_markup": keyboard,
            });
            match self.call("sendMessage", body).await {
                Ok(_) => sent = true,
                Err(reason) => warn!(chat_id = *chat_id, reason = %reason, "sendMessage failed"),
            }
        }
        if sent {
            Ok(())
        } else {
            Err("prompt could not be delivered to any chat".to_owned())
        }
    }

    /// Acknowledge a callback, best effort.
    async fn ack(&self, callback_id: &str, text: &str) {
        let body = json!({"callback_query_id": callback_id, "text": text});
        if let Err(reason) = self.call("answerCallbackQuery", body).await {
            debug!(reason = %reason, "answerCallbackQuery failed");
        }
    }

    /// Poll updates until a matching, authorized callback or the deadline.
    async fn poll_for_answer(
        &self,
        request: &ApprovalRequest,
        deadline: Instant,
    ) -> Resolution {
        let mut offset: i64 = 0;
        loop {
            if Instant::now() >= deadline {
                return Resolution::new(ApprovalOutcome::Timeout, CHANNEL, None);
            }
            let updates = match self
                .call("getUpdates", json!({"offset": offset, "timeout": 2}))
                .await
            {
                Ok(Value::Array(updates)) => updates,
                Ok(_) => Vec::new(),
                Err(reason) => {
                    return Resolution::new(ApprovalOutcome::Error, CHANNEL, Some(reason));
                },
            };

            for update in updates {
                if let Some(update_id) = update.get("update_id").and_then(Value::as_i64) {
                    offset = offset.max(update_id + 1);
                }
                let Some(callback) = update.get("callback_query") else {
                    continue;
                };
                let data = callback.get("data").and_then(Value::as_str).unwrap_or("");
                let Some(approve) = parse_callback(data, &request.approval_id) else {
                    continue;
                };
                let callback_id = callback.get("id").and_then(Value::as_str).unwrap_or("");
                let from_id = callback
                    .pointer("/from/id")
                    .and_then(Value::as_i64)
                    .unwrap_or(-1);
                let chat_id = callback
                    .pointer("/message/chat/id")
                    .and_then(Value::as_i64)
                    .unwrap_or(-1);

                if !authorized(&self.config, from_id, chat_id) {
                    warn!(from_id, chat_id, "unauthorized approval attempt");
                    self.ack(callback_id, "Not authorized").await;
                    continue;
                }

                self.ack(callback_id, if approve { "Approved" } else { "Denied" })
                    .await;
                let outcome = if approve {
                    ApprovalOutcome::Approved
                } else {
                    ApprovalOutcome::Denied
                };
                return Resolution::new(
                    outcome,
                    CHANNEL,
                    Some(format!("answered by user {from_id}")),
                );
            }

            tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms.max(100)))
                .await;
        }
    }

    /// Run one approval round trip.
    pub async fn resolve(&self, request: &ApprovalRequest) -> Resolution {
        let deadline = Instant::now() + request.timeout;
        if let Err(reason) = self.post_prompt(request).await {
            return Resolution::new(ApprovalOutcome::Error, CHANNEL, Some(reason));
        }
        self.poll_for_answer(request, deadline).await
    }
}

impl std::fmt::Debug for TelegramConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConnector")
            .field("chats", &self.config.chat_ids.len())
            .field("approvers", &self.config.approver_ids.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_callback_matching_id() {
        assert_eq!(parse_callback("ag:approve:abc-123", "abc-123"), Some(true));
        assert_eq!(parse_callback("ag:deny:abc-123", "abc-123"), Some(false));
    }

    #[test]
    fn test_parse_callback_other_id_ignored() {
        assert_eq!(parse_callback("ag:approve:other", "abc-123"), None);
    }

    #[test]
    fn test_parse_callback_garbage_ignored() {
        assert_eq!(parse_callback("apr:0:1", "abc"), None);
        assert_eq!(parse_callback("ag:shrug:abc", "abc"), None);
        assert_eq!(parse_callback("", "abc"), None);
    }

    #[test]
    fn test_authorization_requires_both_sets() {
        let config = TelegramConnectorConfig {
            chat_ids: vec![100],
            approver_ids: vec![7],
            ..TelegramConnectorConfig::default()
        };
        assert!(authorized(&config, 7, 100));
        assert!(!authorized(&config, 8, 100));
        assert!(!authorized(&config, 7, 200));
    }

    #[test]
    fn test_empty_sets_reject_everything() {
        let config = TelegramConnectorConfig::default();
        assert!(!authorized(&config, 7, 100));

        let only_chats = TelegramConnectorConfig {
            chat_ids: vec![100],
            ..TelegramConnectorConfig::default()
        };
        assert!(!authorized(&only_chats, 7, 100));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_error() {
        let config = TelegramConnectorConfig {
            bot_token: "123:abc".to_owned(),
            api_base: "http://127.0.0.1:1".to_owned(),
            chat_ids: vec![100],
            approver_ids: vec![7],
            ..TelegramConnectorConfig::default()
        };
        let connector = TelegramConnector::new(&config);
        let request = ApprovalRequest {
            approval_id: "id".to_owned(),
            prompt: "Approve?".to_owned(),
            timeout: Duration::from_millis(500),
            event: radius_core::CanonicalEvent::new(
                radius_core::Phase::PreTool,
                radius_core::Framework::Generic,
            ),
        };
        let resolution = connector.resolve(&request).await;
        assert_eq!(resolution.outcome, ApprovalOutcome::Error);
    }
}
