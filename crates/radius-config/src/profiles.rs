//! Profiles: named sets of default module selections and overrides.
//!
//! Canonical names are `local`, `standard`, and `unbounded`; the alias
//! table maps the older names onto them so downstream code only ever sees
//! canonical names.

use serde_json::{json, Value};

use crate::error::{ConfigError, ConfigResult};

/// A canonical profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Everything on, sandbox required, strictest command patterns.
    Local,
    /// The default: guards on, sandbox advisory.
    Standard,
    /// Observation only: kill switch and audit.
    Unbounded,
}

impl Profile {
    /// Resolve a configured name through the alias table.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownProfile`] for names outside both the
    /// canonical and alias sets.
    pub fn resolve(name: &str) -> ConfigResult<Self> {
        match name {
            "local" | "strict" | "bunker" => Ok(Self::Local),
            "standard" | "balanced" | "tactical" => Ok(Self::Standard),
            "unbounded" | "monitor" | "yolo" | "unleashed" => Ok(Self::Unbounded),
            other => Err(ConfigError::UnknownProfile(other.to_owned())),
        }
    }

    /// The canonical name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Standard => "standard",
            Self::Unbounded => "unbounded",
        }
    }

    /// The default action when no module applies.
    #[must_use]
    pub fn default_action(self) -> &'static str {
        match self {
            Self::Local | Self::Standard => "deny",
            Self::Unbounded => "allow",
        }
    }

    /// Profile defaults as a configuration overlay.
    ///
    /// Merged between the built-in defaults and the user document, so the
    /// user can override any of it.
    #[must_use]
    pub fn defaults(self) -> Value {
        match self {
            Self::Local => json!({
                "global": {
                    "profile": "local",
                    "defaultAction": "deny",
                },
                "modules": [
                    "kill_switch",
                    "self_defense",
                    "tripwire_guard",
                    "tool_policy",
                    "fs_guard",
                    "command_guard",
                    "exec_sandbox",
                    "egress_guard",
                    "rate_budget",
                    "repetition_guard",
                    "output_dlp",
                    "skill_scanner",
                    "approval_gate",
                    "audit",
                ],
                "moduleConfig": {
                    "command_guard": {
                        "denyPatterns": [
                            r"(^|\s)sudo\s",
                            r"rm\s+-rf\s+/",
                            r"(^|\s)(cat|less|more|head|tail|grep|awk|sed)\s+[^|;]*\.env\b",
                            r"(^|\s)(source|\.)\s+[^|;]*\.env\b",
                        ],
                    },
                    "exec_sandbox": {
                        "engine": "bwrap",
                        "required": true,
                    },
                    "fs_guard": {
                        "allowedPaths": ["${workspace}"],
                        "blockedPaths": ["~/.ssh", "~/.aws", "~/.gnupg", "/etc"],
                    },
                },
            }),
            Self::Standard => json!({
                "global": {
                    "profile": "standard",
                    "defaultAction": "deny",
                },
                "modules": [
                    "kill_switch",
                    "tool_policy",
                    "fs_guard",
                    "command_guard",
                    "egress_guard",
                    "rate_budget",
                    "repetition_guard",
                    "output_dlp",
                    "skill_scanner",
                    "audit",
                ],
                "moduleConfig": {
                    "fs_guard": {
                        "allowedPaths": ["${workspace}"],
                        "blockedPaths": ["~/.ssh", "~/.aws", "~/.gnupg"],
                    },
                },
            }),
            Self::Unbounded => json!({
                "global": {
                    "profile": "unbounded",
                    "defaultAction": "allow",
                },
                "modules": ["kill_switch", "audit"],
                "moduleConfig": {},
            }),
        }
    }
}
