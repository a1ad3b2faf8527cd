//! Configuration types.
//!
//! Every struct implements [`Default`] with safe production values so that a
//! sparse YAML document (or none at all) produces a working configuration.
//! Keys are camelCase on the wire, matching the configuration file format.

use std::collections::BTreeMap;

use radius_core::Action;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root configuration for the Radius runtime.
///
/// Loaded once per runtime and frozen; modules receive their slice of
/// `module_config` at construction and never re-read it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RadiusConfig {
    /// Profile, default action, workspace, template policy.
    pub global: GlobalConfig,
    /// Audit recorder settings.
    pub audit: AuditSettings,
    /// Approval subsystem settings.
    pub approval: ApprovalConfig,
    /// Per-framework adapter settings, keyed by canonical framework name.
    pub adapters: BTreeMap<String, AdapterSettings>,
    /// Ordered module list for the pipeline.
    pub modules: Vec<String>,
    /// Per-module configuration mappings, keyed by module name.
    pub module_config: BTreeMap<String, Value>,
}

impl RadiusConfig {
    /// The configuration mapping for one module, or an empty mapping.
    #[must_use]
    pub fn module_config(&self, name: &str) -> Value {
        self.module_config
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalConfig {
    /// Canonical profile name (`local`, `standard`, `unbounded`); aliases
    /// are resolved before this struct is built.
    pub profile: String,
    /// What the pipeline returns when no module applies.
    pub default_action: Action,
    /// The agent's working directory; the `${workspace}` template variable.
    pub workspace: String,
    /// What to do when a `${NAME}` template names no known variable.
    pub on_undefined_template_var: UndefinedVarPolicy,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            profile: "standard".to_owned(),
            default_action: Action::Deny,
            workspace: "${CWD}".to_owned(),
            on_undefined_template_var: UndefinedVarPolicy::Error,
        }
    }
}

/// Policy for undefined `${NAME}` template variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndefinedVarPolicy {
    /// Abort initialization.
    Error,
    /// Substitute the empty string.
    Empty,
}

/// What the runtime does when an approval attempt fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Append a high-severity deny.
    Deny,
    /// Append an alert line and allow.
    Alert,
}

/// Audit recorder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditSettings {
    /// JSONL file path; `None` disables the file sink.
    pub file: Option<String>,
    /// Mirror entries to stdout.
    pub stdout: bool,
    /// Fire-and-forget webhook sink.
    pub webhook_url: Option<String>,
    /// Webhook POST timeout in milliseconds.
    pub webhook_timeout_ms: u64,
    /// OTLP-JSON sink endpoint (entries wrapped in resourceLogs).
    pub otlp_url: Option<String>,
    /// Record tool arguments in entries.
    pub include_arguments: bool,
    /// Record tool result summaries in entries.
    pub include_results: bool,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            file: Some("./radius-audit.jsonl".to_owned()),
            stdout: false,
            webhook_url: None,
            webhook_timeout_ms: 3_000,
            otlp_url: None,
            include_arguments: false,
            include_results: false,
        }
    }
}

/// Approval subsystem settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApprovalConfig {
    /// Master switch; disabled means challenges pass through to the
    /// orchestrator unresolved.
    pub enabled: bool,
    /// Resolution mode. Only `sync_wait` is implemented; any other value
    /// resolves challenges as denied.
    pub mode: String,
    /// Policy when the human does not answer before the deadline.
    pub on_timeout: FailurePolicy,
    /// Policy when the connector itself fails.
    pub on_connector_error: FailurePolicy,
    /// TTL granted by a temporary approval when the channel names none.
    pub default_ttl_sec: u64,
    /// Upper bound on any granted TTL.
    pub max_ttl_sec: u64,
    /// Fallback channel when neither rule, metadata, nor framework default
    /// resolves one.
    pub default_channel: String,
    /// Per-framework default channels, keyed by canonical framework name.
    pub channel_defaults: BTreeMap<String, String>,
    /// Telegram connector settings.
    pub telegram: Option<TelegramConnectorConfig>,
    /// HTTP bridge connector settings.
    pub http: Option<HttpConnectorConfig>,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: "sync_wait".to_owned(),
            on_timeout: FailurePolicy::Deny,
            on_connector_error: FailurePolicy::Deny,
            default_ttl_sec: 300,
            max_ttl_sec: 3_600,
            default_channel: "telegram".to_owned(),
            channel_defaults: BTreeMap::new(),
            telegram: None,
            http: None,
        }
    }
}

/// Telegram Bot API connector settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelegramConnectorConfig {
    /// Bot token. Prefer `${TELEGRAM_BOT_TOKEN}` over storing it inline.
    pub bot_token: String,
    /// Chats the approval prompt is posted to. Empty rejects everything.
    pub chat_ids: Vec<i64>,
    /// Users allowed to answer. Empty rejects everything.
    pub approver_ids: Vec<i64>,
    /// Bot API base URL; overridable for tests.
    pub api_base: String,
    /// Delay between `getUpdates` polls in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for TelegramConnectorConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_ids: Vec::new(),
            approver_ids: Vec::new(),
            api_base: "https://api.telegram.org".to_owned(),
            poll_interval_ms: 1_000,
        }
    }
}

impl std::fmt::Debug for TelegramConnectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConnectorConfig")
            .field("has_bot_token", &!self.bot_token.is_empty())
            .field("chat_ids", &self.chat_ids)
            .field("approver_ids", &self.approver_ids)
            .field("api_base", &self.api_base)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .finish()
    }
}

/// HTTP approval bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpConnectorConfig {
    /// Bridge endpoint.
    pub url: String,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// Connector timeout in milliseconds; the effective per-call timeout is
    /// the smaller of this and the challenge timeout.
    pub timeout_ms: u64,
}

impl Default for HttpConnectorConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            headers: BTreeMap::new(),
            timeout_ms: 30_000,
        }
    }
}

/// Per-framework adapter settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdapterSettings {
    /// Enable this adapter.
    pub enabled: bool,
    /// Adapter-specific options, passed through untouched.
    #[serde(flatten)]
    pub options: BTreeMap<String, Value>,
}
