//! MCP-style (nanobot) adapter.

use radius_core::{
    Action, CanonicalEvent, Framework, Phase, PipelineResult, ToolCall, ToolResult,
};
use serde_json::{json, Value};

use crate::{routing_metadata, Adapter};

/// Adapter for MCP-style request/response payloads.
///
/// Inbound keys: `direction` (request | response), `method` (tools/call),
/// `params.{name, arguments, agent}`, `result.content[].text`,
/// `result.isError`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NanobotAdapter;

fn content_text(result: &Value) -> String {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

impl Adapter for NanobotAdapter {
    fn framework(&self) -> Framework {
        Framework::Nanobot
    }

    fn to_event(&self, raw: &Value) -> CanonicalEvent {
        let direction = raw.get("direction").and_then(Value::as_str).unwrap_or("");
        let phase = if direction == "response" {
            Phase::PostTool
        } else {
            Phase::PreTool
        };

        let mut event = CanonicalEvent::new(phase, Framework::Nanobot);
        if let Some(session) = raw.get("session_id").and_then(Value::as_str) {
            event.session_id = session.to_owned();
        }
        if let Some(agent) = raw.pointer("/params/agent").and_then(Value::as_str) {
            event.agent_name = Some(agent.to_owned());
        }
        if let Some(name) = raw.pointer("/params/name").and_then(Value::as_str) {
            event.tool_call = Some(ToolCall {
                name: name.to_owned(),
                arguments: raw
                    .pointer("/params/arguments")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
                raw: Some(raw.clone()),
            });
        }
        if phase == Phase::PostTool {
            if let Some(result) = raw.get("result") {
                event.tool_result = Some(ToolResult {
                    text: content_text(result),
                    is_error: result
                        .get("isError")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    raw: Some(result.clone()),
                });
            }
        }
        routing_metadata(
            &mut event,
            raw,
            &["channel"],
            &["mode"],
            &["task_type", "taskType"],
            &["tags"],
        );
        event
    }

    fn to_response(&self, result: &PipelineResult, _raw: &Value) -> Value {
        match result.final_action {
            Action::Deny => json!({
                "accept": false,
                "reason": result.final_reason,
            }),
            Action::Challenge => {
                let mut response = json!({
                    "accept": false,
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
                let mut response = json!({"accept": true});
                if let Some(arguments) = &result.transforms.tool_arguments {
                    response["arguments"] = Value::Object(arguments.clone());
                }
                response
            },
        }
    }
}
