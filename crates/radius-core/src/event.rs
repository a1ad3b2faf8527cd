//! The canonical event model.
//!
//! Every orchestrator payload is projected into a [`CanonicalEvent`] before
//! any policy runs. Events are immutable values: modules read them, the
//! pipeline accumulates transforms separately.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle point at which a policy evaluates.
///
/// Phase gates which modules apply: the pipeline filters its ordered module
/// list down to modules whose phase set contains the event phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// An artifact (skill, prompt, tool metadata, config) is about to be
    /// installed.
    PreLoad,
    /// User input is arriving.
    PreRequest,
    /// A tool call is about to run.
    PreTool,
    /// A tool result has been observed.
    PostTool,
    /// Text is about to be returned to the user.
    PreResponse,
}

impl Phase {
    /// All five phases, in lifecycle order.
    pub const ALL: [Phase; 5] = [
        Phase::PreLoad,
        Phase::PreRequest,
        Phase::PreTool,
        Phase::PostTool,
        Phase::PreResponse,
    ];

    /// The snake_case wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreLoad => "pre_load",
            Self::PreRequest => "pre_request",
            Self::PreTool => "pre_tool",
            Self::PostTool => "post_tool",
            Self::PreResponse => "pre_response",
        }
    }

    /// Parse a wire name. Unknown names return `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pre_load" => Some(Self::PreLoad),
            "pre_request" => Some(Self::PreRequest),
            "pre_tool" => Some(Self::PreTool),
            "post_tool" => Some(Self::PostTool),
            "pre_response" => Some(Self::PreResponse),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator framework the event originated from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framework {
    /// OpenClaw-style hook payloads.
    Openclaw,
    /// MCP-style request/response payloads.
    Nanobot,
    /// Chat-style hook payloads.
    ClaudeTelegram,
    /// A canonical event submitted directly.
    #[default]
    Generic,
}

impl Framework {
    /// The kebab-case wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Openclaw => "openclaw",
            Self::Nanobot => "nanobot",
            Self::ClaudeTelegram => "claude-telegram",
            Self::Generic => "generic",
        }
    }

    /// Parse a wire name. Unknown names return `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "openclaw" => Some(Self::Openclaw),
            "nanobot" => Some(Self::Nanobot),
            "claude-telegram" | "claudeTelegram" => Some(Self::ClaudeTelegram),
            "generic" => Some(Self::Generic),
            _ => None,
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool invocation about to run (or, post-tool, the one that ran).
///
/// `arguments` is semi-structured: values may be strings, numbers, booleans,
/// nested mappings, or sequences, exactly as the orchestrator sent them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolCall {
    /// Tool name as the orchestrator reports it.
    pub name: String,
    /// Unstructured argument mapping.
    pub arguments: Map<String, Value>,
    /// The raw payload the arguments were extracted from, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl ToolCall {
    /// Build a tool call from a name and arguments.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
            raw: None,
        }
    }

    /// Fetch a string-valued argument.
    #[must_use]
    pub fn string_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// An observed tool result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolResult {
    /// Result text.
    pub text: String,
    /// Whether the orchestrator flagged the result as an error.
    pub is_error: bool,
    /// The raw result payload, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

/// Kind of artifact being installed at `pre_load`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// An agent skill (instructions plus optional code).
    Skill,
    /// A prompt template.
    Prompt,
    /// Tool metadata (names, descriptions, schemas).
    ToolMetadata,
    /// A configuration document.
    Config,
}

impl ArtifactKind {
    /// The snake_case wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skill => "skill",
            Self::Prompt => "prompt",
            Self::ToolMetadata => "tool_metadata",
            Self::Config => "config",
        }
    }
}

/// An artifact about to be installed, with its provenance metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// What kind of artifact this is.
    pub kind: ArtifactKind,
    /// Artifact content (the text the scanner inspects).
    pub content: String,
    /// Where the artifact came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    /// Content hash as reported by the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Whether a signature over the content was verified.
    #[serde(default)]
    pub signature_verified: bool,
    /// Signer identity, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,
    /// SBOM location, when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sbom_uri: Option<String>,
    /// Whether the source reference is pinned to an immutable version.
    #[serde(default)]
    pub version_pinned: bool,
}

impl Artifact {
    /// Build an artifact of the given kind with content only.
    #[must_use]
    pub fn new(kind: ArtifactKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            source_uri: None,
            hash: None,
            signature_verified: false,
            signer: None,
            sbom_uri: None,
            version_pinned: false,
        }
    }
}

/// Framework-independent projection of an orchestrator payload.
///
/// Built once per request by an adapter, then evaluated by every applicable
/// module. The default session id is `"unknown"` — adapters tolerate
/// malformed input by falling back to it rather than failing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    /// Lifecycle point of this event.
    pub phase: Phase,
    /// Originating framework.
    #[serde(default)]
    pub framework: Framework,
    /// Session identifier; `"unknown"` when the orchestrator omitted one.
    pub session_id: String,
    /// Agent identifier, when the orchestrator is multi-agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// End-user identifier, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// User input text (`pre_request`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_text: Option<String>,
    /// Tool call (`pre_tool` / `post_tool`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    /// Tool result (`post_tool`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    /// Response text (`pre_response`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
    /// Artifact being installed (`pre_load`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    /// Free-form metadata (routing hints, channel, tags).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl CanonicalEvent {
    /// Create an event with safe defaults for the given phase.
    #[must_use]
    pub fn new(phase: Phase, framework: Framework) -> Self {
        Self {
            phase,
            framework,
            session_id: "unknown".to_owned(),
            agent_name: None,
            user_id: None,
            request_text: None,
            tool_call: None,
            tool_result: None,
            response_text: None,
            artifact: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Set the session id.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Set the agent name.
    #[must_use]
    pub fn with_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    /// Set the user id.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the request text.
    #[must_use]
    pub fn with_request_text(mut self, text: impl Into<String>) -> Self {
        self.request_text = Some(text.into());
        self
    }

    /// Set the tool call.
    #[must_use]
    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        self.tool_call = Some(call);
        self
    }

    /// Set the tool result.
    #[must_use]
    pub fn with_tool_result(mut self, result: ToolResult) -> Self {
        self.tool_result = Some(result);
        self
    }

    /// Set the response text.
    #[must_use]
    pub fn with_response_text(mut self, text: impl Into<String>) -> Self {
        self.response_text = Some(text.into());
        self
    }

    /// Set the artifact.
    #[must_use]
    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    /// Insert a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The tool name, when this event carries a tool call.
    #[must_use]
    pub fn tool_name(&self) -> Option<&str> {
        self.tool_call.as_ref().map(|c| c.name.as_str())
    }
}
