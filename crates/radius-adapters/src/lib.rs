//! Adapters between orchestrator envelopes and the canonical event model.
//!
//! Uniform contract: `to_event` never fails — malformed input becomes an
//! event with safe defaults (session `"unknown"`, empty metadata) — and
//! `to_response` renders a pipeline result in the orchestrator's dialect.

pub mod claude_telegram;
pub mod generic;
pub mod nanobot;
pub mod openclaw;

pub use claude_telegram::ClaudeTelegramAdapter;
pub use generic::GenericAdapter;
pub use nanobot::NanobotAdapter;
pub use openclaw::OpenclawAdapter;

use radius_core::{CanonicalEvent, Framework, PipelineResult};
use serde_json::Value;

/// One orchestrator dialect.
pub trait Adapter: Send + Sync {
    /// The framework this adapter speaks for.
    fn framework(&self) -> Framework;

    /// Project a raw payload into a canonical event. Must tolerate
    /// malformed input by returning safe defaults.
    fn to_event(&self, raw: &Value) -> CanonicalEvent;

    /// Render a pipeline result in the orchestrator's response shape.
    fn to_response(&self, result: &PipelineResult, raw: &Value) -> Value;
}

/// The adapter for a framework tag.
#[must_use]
pub fn adapter_for(framework: Framework) -> Box<dyn Adapter> {
    match framework {
        Framework::Openclaw => Box::new(OpenclawAdapter),
        Framework::Nanobot => Box::new(NanobotAdapter),
        Framework::ClaudeTelegram => Box::new(ClaudeTelegramAdapter),
        Framework::Generic => Box::new(GenericAdapter),
    }
}

/// Surface routing hints under the canonical metadata keys.
///
/// Source aliases differ per framework; the canonical keys are `channel`,
/// `modeHint`, `taskType`, and `routeTags` (comma-joined).
pub(crate) fn routing_metadata(
    event: &mut CanonicalEvent,
    raw: &Value,
    channel_keys: &[&str],
    mode_keys: &[&str],
    task_keys: &[&str],
    tag_keys: &[&str],
) {
    let first_string = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| raw.get(*k).and_then(Value::as_str))
            .map(str::to_owned)
    };
    if let Some(channel) = first_string(channel_keys) {
        event.metadata.insert("channel".to_owned(), channel);
    }
    if let Some(mode) = first_string(mode_keys) {
        event.metadata.insert("modeHint".to_owned(), mode);
    }
    if let Some(task) = first_string(task_keys) {
        event.metadata.insert("taskType".to_owned(), task);
    }
    for key in tag_keys {
        if let Some(tags) = raw.get(*key).and_then(Value::as_array) {
            let joined = tags
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(",");
            if !joined.is_empty() {
                event.metadata.insert("routeTags".to_owned(), joined);
            }
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radius_core::{Action, Patch};
    use serde_json::json;

    /// P8: an empty payload projects to a safe event, and an allow result
    /// renders in every adapter's canonical allow envelope.
    #[test]
    fn test_empty_object_round_trip_all_adapters() {
        let allow = PipelineResult {
            final_action: Action::Allow,
            final_reason: "allow after module evaluation".to_owned(),
            transforms: Patch::default(),
            alerts: Vec::new(),
            decisions: Vec::new(),
        };
        for framework in [
            Framework::Openclaw,
            Framework::Nanobot,
            Framework::ClaudeTelegram,
            Framework::Generic,
        ] {
            let adapter = adapter_for(framework);
            let event = adapter.to_event(&json!({}));
            assert_eq!(event.session_id, "unknown", "{framework}");
            assert!(event.metadata.is_empty(), "{framework}");

            let response = adapter.to_response(&allow, &json!({}));
            match framework {
                Framework::Openclaw => assert_eq!(response["decision"], json!("allow")),
                Framework::Nanobot => assert_eq!(response["accept"], json!(true)),
                Framework::ClaudeTelegram => assert_eq!(response["allow"], json!(true)),
                Framework::Generic => assert_eq!(response["action"], json!("allow")),
            }
        }
    }
}
