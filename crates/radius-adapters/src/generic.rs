//! Generic adapter: canonical events in, canonical results out.

use radius_core::{Action, CanonicalEvent, Framework, Phase, PipelineResult};
use serde_json::{json, Value};
use tracing::debug;

use crate::Adapter;

/// Adapter for callers that already speak the canonical event shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericAdapter;

impl Adapter for GenericAdapter {
    fn framework(&self) -> Framework {
        Framework::Generic
    }

    fn to_event(&self, raw: &Value) -> CanonicalEvent {
        match serde_json::from_value::<CanonicalEvent>(raw.clone()) {
            Ok(mut event) => {
                if event.session_id.is_empty() {
                    event.session_id = "unknown".to_owned();
                }
                event
            },
            Err(err) => {
                debug!(error = %err, "malformed canonical event, using safe defaults");
                CanonicalEvent::new(Phase::PreRequest, Framework::Generic)
            },
        }
    }

    fn to_response(&self, result: &PipelineResult, _raw: &Value) -> Value {
        let mut response = json!({
            "action": result.final_action.as_str(),
            "reason": result.final_reason,
        });
        if !result.alerts.is_empty() {
            response["alerts"] = json!(result.alerts);
        }
        if !result.transforms.is_empty() {
            response["transforms"] = serde_json::to_value(&result.transforms)
                .unwrap_or(Value::Null);
        }
        if result.final_action == Action::Challenge {
            if let Some(challenge) = result.challenge() {
                response["challenge"] = json!({
                    "channel": challenge.channel.as_str(),
                    "prompt": challenge.prompt,
                    "timeoutSeconds": challenge.timeout_seconds,
                });
            }
        }
        response
    }
}
