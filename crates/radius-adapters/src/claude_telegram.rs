//! Chat-style (claude-telegram) adapter.

use radius_core::{Action, CanonicalEvent, Framework, Phase, PipelineResult};
use serde_json::{json, Value};

use crate::Adapter;

/// Adapter for chat-bot hook payloads.
///
/// Inbound keys: `hook` (beforeClaude | afterClaude), `ctx.{chatId, userId,
/// agentName, profile, labels}`, `message` / `result`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeTelegramAdapter;

impl Adapter for ClaudeTelegramAdapter {
    fn framework(&self) -> Framework {
        Framework::ClaudeTelegram
    }

    fn to_event(&self, raw: &Value) -> CanonicalEvent {
        let hook = raw.get("hook").and_then(Value::as_str).unwrap_or("");
        let phase = if hook == "afterClaude" {
            Phase::PreResponse
        } else {
            Phase::PreRequest
        };

        let mut event = CanonicalEvent::new(phase, Framework::ClaudeTelegram);
        if let Some(chat_id) = raw.pointer("/ctx/chatId") {
            let chat = match chat_id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if !chat.is_empty() && chat != "null" {
                event.session_id = chat;
            }
        }
        if let Some(user) = raw.pointer("/ctx/userId") {
            let user = match user {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if !user.is_empty() && user != "null" {
                event.user_id = Some(user);
            }
        }
        if let Some(agent) = raw.pointer("/ctx/agentName").and_then(Value::as_str) {
            event.agent_name = Some(agent.to_owned());
        }
        match phase {
            Phase::PreRequest => {
                if let Some(message) = raw.get("message").and_then(Value::as_str) {
                    event.request_text = Some(message.to_owned());
                }
            },
            _ => {
                if let Some(result) = raw.get("result").and_then(Value::as_str) {
                    event.response_text = Some(result.to_owned());
                }
            },
        }

        // This framework always has a chat channel; profile and labels are
        // routing hints.
        if raw.pointer("/ctx").is_some() {
            event
                .metadata
                .insert("channel".to_owned(), "telegram".to_owned());
        }
        if let Some(profile) = raw.pointer("/ctx/profile").and_then(Value::as_str) {
            event.metadata.insert("modeHint".to_owned(), profile.to_owned());
        }
        if let Some(labels) = raw.pointer("/ctx/labels").and_then(Value::as_array) {
            let joined = labels
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(",");
            if !joined.is_empty() {
                event.metadata.insert("routeTags".to_owned(), joined);
            }
        }
        event
    }

    fn to_response(&self, result: &PipelineResult, _raw: &Value) -> Value {
        match result.final_action {
            Action::Deny => json!({
                "allow": false,
                "reason": result.final_reason,
                "message": result.final_reason,
            }),
            Action::Challenge => {
                let mut response = json!({
                    "allow": false,
                    "reason": result.final_reason,
                });
                if let Some(challenge) = result.challenge() {
                    response["message"] = json!(challenge.prompt);
                    response["challenge"] = json!({
                        "channel": challenge.channel.as_str(),
                        "prompt": challenge.prompt,
                        "timeoutSeconds": challenge.timeout_seconds,
                    });
                }
                response
            },
            _ => {
                let mut response = json!({"allow": true});
                if let Some(text) = &result.transforms.response_text {
                    response["message"] = json!(text);
                }
                response
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radius_core::Patch;
    use serde_json::json;

    #[test]
    fn test_before_claude_projection() {
        let adapter = ClaudeTelegramAdapter;
        let raw = json!({
            "hook": "beforeClaude",
            "ctx": {
                "chatId": 42,
                "userId": 7,
                "agentName": "assistant",
                "profile": "balanced",
                "labels": ["family", "admin"],
            },
            "message": "please run the backup",
        });
        let event = adapter.to_event(&raw);
        assert_eq!(event.phase, Phase::PreRequest);
        assert_eq!(event.session_id, "42");
        assert_eq!(event.user_id.as_deref(), Some("7"));
        assert_eq!(event.request_text.as_deref(), Some("please run the backup"));
        assert_eq!(
            event.metadata.get("channel").map(String::as_str),
            Some("telegram")
        );
        assert_eq!(
            event.metadata.get("modeHint").map(String::as_str),
            Some("balanced")
        );
        assert_eq!(
            event.metadata.get("routeTags").map(String::as_str),
            Some("family,admin")
        );
    }

    #[test]
    fn test_after_claude_projection() {
        let adapter = ClaudeTelegramAdapter;
        let raw = json!({
            "hook": "afterClaude",
            "ctx": {"chatId": "42"},
            "result": "backup finished",
        });
        let event = adapter.to_event(&raw);
        assert_eq!(event.phase, Phase::PreResponse);
        assert_eq!(event.response_text.as_deref(), Some("backup finished"));
    }

    #[test]
    fn test_allow_with_redacted_message() {
        let adapter = ClaudeTelegramAdapter;
        let result = PipelineResult {
            final_action: Action::Allow,
            final_reason: "ok".to_owned(),
            transforms: Patch {
                response_text: Some("token: [REDACTED]".to_owned()),
                ..Patch::default()
            },
            alerts: Vec::new(),
            decisions: Vec::new(),
        };
        let response = adapter.to_response(&result, &json!({}));
        assert_eq!(response["allow"], json!(true));
        assert_eq!(response["message"], json!("token: [REDACTED]"));
    }

    #[test]
    fn test_deny_shape() {
        let adapter = ClaudeTelegramAdapter;
        let result = PipelineResult {
            final_action: Action::Deny,
            final_reason: "blocked".to_owned(),
            transforms: Patch::default(),
            alerts: Vec::new(),
            decisions: Vec::new(),
        };
        let response = adapter.to_response(&result, &json!({}));
        assert_eq!(response["allow"], json!(false));
        assert_eq!(response["reason"], json!("blocked"));
    }
}
