//! OpenClaw-style hook adapter.

use radius_core::{
    Action, CanonicalEvent, Framework, Phase, PipelineResult, ToolCall, ToolResult,
};
use serde_json::{json, Map, Value};

use crate::{routing_metadata, Adapter};

/// Adapter for OpenClaw hook payloads.
///
/// Inbound keys: `hook_type` / `hook_event_name` (PreToolUse | PostToolUse),
/// `tool_name`, `tool_input` / `tool_arguments`, `tool_output` /
/// `tool_response` / `tool_result` with `is_error`, `session_id`,
/// `agent_name`, and routing fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenclawAdapter;

fn arguments_of(raw: &Value) -> Map<String, Value> {
    ["tool_input", "tool_arguments"]
        .iter()
        .find_map(|k| raw.get(*k).and_then(Value::as_object))
        .cloned()
        .unwrap_or_default()
}

fn result_text_of(raw: &Value) -> Option<String> {
    ["tool_output", "tool_response", "tool_result"]
        .iter()
        .find_map(|k| raw.get(*k))
        .map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
}

impl Adapter for OpenclawAdapter {
    fn framework(&self) -> Framework {
        Framework::Openclaw
    }

    fn to_event(&self, raw: &Value) -> CanonicalEvent {
        let hook = raw
            .get("hook_type")
            .or_else(|| raw.get("hook_event_name"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let phase = match hook {
            "PreToolUse" => Phase::PreTool,
            "PostToolUse" => Phase::PostTool,
            _ => Phase::PreRequest,
        };

        let mut event = CanonicalEvent::new(phase, Framework::Openclaw);
        if let Some(session) = raw.get("session_id").and_then(Value::as_str) {
            event.session_id = session.to_owned();
        }
        if let Some(agent) = raw.get("agent_name").and_then(Value::as_str) {
            event.agent_name = Some(agent.to_owned());
        }
        if let Some(user) = raw.get("user_id").and_then(Value::as_str) {
            event.user_id = Some(user.to_owned());
        }
        if let Some(prompt) = raw.get("prompt").and_then(Value::as_str) {
            event.request_text = Some(prompt.to_owned());
        }
        if let Some(tool) = raw.get("tool_name").and_then(Value::as_str) {
            event.tool_call = Some(ToolCall {
                name: tool.to_owned(),
                arguments: arguments_of(raw),
                raw: Some(raw.clone()),
            });
        }
        if phase == Phase::PostTool {
            if let Some(text) = result_text_of(raw) {
                event.tool_result = Some(ToolResult {
                    text,
                    is_error: raw
                        .get("is_error")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    raw: Some(raw.clone()),
                });
            }
        }
        routing_metadata(
            &mut event,
            raw,
            &["channel"],
            &["mode", "profile"],
            &["task_type"],
            &["tags"],
        );
        event
    }

    fn to_response(&self, result: &PipelineResult, raw: &Value) -> Value {
        match result.final_action {
            Action::Deny => json!({
                "decision": "deny",
                "reason": result.final_reason,
            }),
            Action::Challenge => {
                let mut response = json!({
                    "decision": "challenge",
                    "reason": result.final_reason,
                });
                if let Some(challenge) = result.challenge() {
                    response["challenge"] = json!({
                        "channel": challenge.channel.as_str(),
                        "prompt": challenge.prompt,
                        "timeoutSeconds": challenge.timeout_seconds,
                    });
                }
                response
            },
            _ => {
                let mut response = json!({"decision": "allow"});
                let is_pre_tool = raw
                    .get("hook_type")
                    .or_else(|| raw.get("hook_event_name"))
                    .and_then(Value::as_str)
                    == Some("PreToolUse");
                if is_pre_tool {
                    if let Some(arguments) = &result.transforms.tool_arguments {
                        response["updatedInput"] = Value::Object(arguments.clone());
                    }
                }
                response
            },
        }
    }
}
