//! Filesystem guard: blocked and allowed path prefixes for file tools.

use std::path::PathBuf;

use async_trait::async_trait;
use radius_config::ConfigResult;
use radius_core::paths::{canonicalize_with_ancestors, path_within};
use radius_core::{
    CanonicalEvent, CoreResult, Decision, ModuleMode, Phase, PolicyModule, Severity,
};
use serde::Deserialize;
use serde_json::Value;

use crate::parse_config;

const PHASES: [Phase; 1] = [Phase::PreTool];

/// Argument keys a file path may arrive under.
pub const DEFAULT_PATH_KEYS: [&str; 3] = ["file_path", "path", "notebook_path"];

fn default_file_tools() -> Vec<String> {
    ["Read", "Write", "Edit", "Glob", "Grep", "NotebookEdit"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn default_path_keys() -> Vec<String> {
    DEFAULT_PATH_KEYS.into_iter().map(str::to_owned).collect()
}

fn default_blocked_basenames() -> Vec<String> {
    [".env", ".netrc", ".npmrc", "id_rsa", "id_dsa", "id_ecdsa", "id_ed25519"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FsGuardConfig {
    file_tools: Vec<String>,
    shell_tools: Vec<String>,
    path_keys: Vec<String>,
    blocked_paths: Vec<String>,
    blocked_basenames: Vec<String>,
    allowed_paths: Vec<String>,
    mode: ModuleMode,
}

impl Default for FsGuardConfig {
    fn default() -> Self {
        Self {
            file_tools: default_file_tools(),
            shell_tools: vec!["Bash".to_owned()],
            path_keys: default_path_keys(),
            blocked_paths: Vec::new(),
            blocked_basenames: default_blocked_basenames(),
            allowed_paths: Vec::new(),
            mode: ModuleMode::Enforce,
        }
    }
}

/// Canonicalizes the target path and applies blocked-before-allowed
/// prefix policy.
///
/// Blocked strictly precedes allowed: a path inside a blocked prefix is
/// denied even when an allowed prefix also contains it. Lookalike prefixes
/// (`/workspace-evil` against `/workspace`) are rejected by component-wise
/// containment.
#[derive(Debug)]
pub struct FsGuardModule {
    file_tools: Vec<String>,
    shell_tools: Vec<String>,
    path_keys: Vec<String>,
    blocked: Vec<PathBuf>,
    blocked_basenames: Vec<String>,
    allowed: Vec<PathBuf>,
    mode: ModuleMode,
}

impl FsGuardModule {
    /// Module name in decision chains.
    pub const NAME: &'static str = "fs_guard";

    /// Build from the module's configuration mapping, canonicalizing every
    /// configured prefix once.
    pub fn from_config(value: &Value) -> ConfigResult<Self> {
        let config: FsGuardConfig = parse_config(value)?;
        Ok(Self {
            file_tools: config.file_tools,
            shell_tools: config.shell_tools,
            path_keys: config.path_keys,
            blocked: config
                .blocked_paths
                .iter()
                .map(|p| canonicalize_with_ancestors(p))
                .collect(),
            blocked_basenames: config
                .blocked_basenames
                .iter()
                .map(|b| b.to_lowercase())
                .collect(),
            allowed: config
                .allowed_paths
                .iter()
                .map(|p| canonicalize_with_ancestors(p))
                .collect(),
            mode: config.mode,
        })
    }

    fn extract_path<'a>(&self, event: &'a CanonicalEvent) -> Option<&'a str> {
        let call = event.tool_call.as_ref()?;
        self.path_keys.iter().find_map(|key| call.string_arg(key))
    }

    /// Blocked-prefix and blocked-basename checks for one canonical path.
    fn blocked_violation(&self, canonical: &std::path::Path) -> Option<Decision> {
        for blocked in &self.blocked {
            if path_within(blocked, canonical) {
                return Some(Decision::deny(
                    Self::NAME,
                    format!(
                        "{} is in blocked prefix {}",
                        canonical.display(),
                        blocked.display()
                    ),
                    Severity::Critical,
                ));
            }
        }
        if let Some(basename) = canonical.file_name().and_then(|n| n.to_str()) {
            if self
                .blocked_basenames
                .iter()
                .any(|b| b == &basename.to_lowercase())
            {
                return Some(Decision::deny(
                    Self::NAME,
                    format!("{basename} is a blocked file name"),
                    Severity::Critical,
                ));
            }
        }
        None
    }

    /// Path-like tokens inside a shell command string.
    fn command_path_tokens(command: &str) -> Vec<String> {
        command
            .split_whitespace()
            .map(|token| token.trim_matches(|c| matches!(c, '\'' | '"' | ';' | ',')))
            .filter(|token| {
                !token.starts_with('-') && (token.contains('/') || token.starts_with('~'))
            })
            .map(str::to_owned)
            .collect()
    }
}

#[async_trait]
impl PolicyModule for FsGuardModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn phases(&self) -> &[Phase] {
        &PHASES
    }

    fn mode(&self) -> ModuleMode {
        self.mode
    }

    async fn evaluate(&self, event: &CanonicalEvent) -> CoreResult<Decision> {
        let Some(tool) = event.tool_name() else {
            return Ok(Decision::allow(Self::NAME));
        };

        // Shell commands get the blocked rules only: a path token inside a
        // command that lands in a blocked prefix (or names a blocked file)
        // is denied, but ordinary binaries outside the allowed prefixes
        // are not.
        if self.shell_tools.iter().any(|t| t == tool) {
            if let Some(command) = event
                .tool_call
                .as_ref()
                .and_then(|call| call.string_arg("command"))
            {
                for token in Self::command_path_tokens(command) {
                    let canonical = canonicalize_with_ancestors(&token);
                    if let Some(decision) = self.blocked_violation(&canonical) {
                        return Ok(decision);
                    }
                }
            }
            return Ok(Decision::allow(Self::NAME));
        }

        if !self.file_tools.iter().any(|t| t == tool) {
            return Ok(Decision::allow(Self::NAME));
        }
        let Some(raw_path) = self.extract_path(event) else {
            return Ok(Decision::allow(Self::NAME));
        };
        let canonical = canonicalize_with_ancestors(raw_path);

        if let Some(decision) = self.blocked_violation(&canonical) {
            return Ok(decision);
        }

        if self
            .allowed
            .iter()
            .any(|allowed| path_within(allowed, &canonical))
        {
            return Ok(Decision::allow_with_reason(
                Self::NAME,
                format!("{} is within an allowed prefix", canonical.display()),
            ));
        }

        Ok(Decision::deny(
            Self::NAME,
            format!("{} is outside every allowed prefix", canonical.display()),
            Severity::High,
        ))
    }
}
