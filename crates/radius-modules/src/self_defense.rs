//! Self defense: the kernel protects its own configuration.
//!
//! At construction the module resolves its immutable targets and captures a
//! baseline digest for each. Pre-tool, writes into a protected path are
//! refused outright; pre-request and post-tool, the digests are recomputed
//! and a mismatch means something changed the files behind our back.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use radius_config::ConfigResult;
use radius_core::fingerprint::sha256_hex;
use radius_core::paths::{canonicalize_with_ancestors, path_within};
use radius_core::{
    CanonicalEvent, ChallengeRequest, CoreResult, Decision, ModuleMode, Phase, PolicyModule,
    Severity,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, warn};

use crate::kill_switch::DEFAULT_FILE_PATH;
use crate::parse_config;

const PHASES: [Phase; 3] = [Phase::PreRequest, Phase::PreTool, Phase::PostTool];

/// Tools that can mutate the filesystem.
pub const DEFAULT_MUTATING_TOOLS: [&str; 10] = [
    "Write",
    "Edit",
    "NotebookEdit",
    "MultiEdit",
    "Delete",
    "Move",
    "Copy",
    "Rename",
    "Chmod",
    "Chown",
];

/// Configuration files discovered automatically when present.
const DISCOVERED_CONFIGS: [&str; 3] = ["radius.yaml", "radius.yml", ".radius.yaml"];

/// What a write attempt into a protected path does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnWriteAttempt {
    /// Block the call.
    #[default]
    Deny,
    /// Ask a human.
    Challenge,
}

/// What a baseline digest mismatch does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnHashMismatch {
    /// Block the event.
    #[default]
    Deny,
    /// Block the event and write the kill-switch marker.
    KillSwitch,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SelfDefenseConfig {
    immutable_paths: Vec<String>,
    discover_configs: bool,
    mutating_tools: Vec<String>,
    on_write_attempt: OnWriteAttempt,
    on_hash_mismatch: OnHashMismatch,
    kill_switch_path: String,
    unlock_token_path: Option<String>,
    unlock_ttl_sec: u64,
    mode: ModuleMode,
}

impl Default for SelfDefenseConfig {
    fn default() -> Self {
        Self {
            immutable_paths: Vec::new(),
            discover_configs: true,
            mutating_tools: DEFAULT_MUTATING_TOOLS
                .into_iter()
                .map(str::to_owned)
                .collect(),
            on_write_attempt: OnWriteAttempt::Deny,
            on_hash_mismatch: OnHashMismatch::Deny,
            kill_switch_path: DEFAULT_FILE_PATH.to_owned(),
            unlock_token_path: None,
            unlock_ttl_sec: 300,
            mode: ModuleMode::Enforce,
        }
    }
}

#[derive(Debug)]
struct Target {
    path: PathBuf,
    is_dir: bool,
    baseline: String,
}

/// Guards the kernel's own configuration against tampering.
#[derive(Debug)]
pub struct SelfDefenseModule {
    targets: Vec<Target>,
    mutating_tools: Vec<String>,
    on_write_attempt: OnWriteAttempt,
    on_hash_mismatch: OnHashMismatch,
    kill_switch_path: PathBuf,
    unlock_token_path: Option<PathBuf>,
    unlock_ttl_sec: u64,
    mode: ModuleMode,
}

/// Digest of one target: SHA-256 of file contents for exact rules, stable
/// concatenation of sorted directory entries for prefix rules.
fn digest_target(path: &Path, is_dir: bool) -> String {
    if is_dir {
        let mut entries: Vec<String> = std::fs::read_dir(path)
            .map(|dir| {
                dir.filter_map(Result::ok)
                    .map(|entry| {
                        let name = entry.file_name().to_string_lossy().into_owned();
                        let file_digest = if entry.path().is_file() {
                            std::fs::read(entry.path())
                                .map(|bytes| sha256_hex(&bytes))
                                .unwrap_or_default()
                        } else {
                            String::new()
                        };
                        format!("{name}:{file_digest}")
                    })
                    .collect()
            })
            .unwrap_or_default();
        entries.sort();
        sha256_hex(entries.join("\n").as_bytes())
    } else {
        std::fs::read(path)
            .map(|bytes| sha256_hex(&bytes))
            .unwrap_or_default()
    }
}

impl SelfDefenseModule {
    /// Module name in decision chains.
    pub const NAME: &'static str = "self_defense";

    /// Build from the module's configuration mapping, resolving targets and
    /// capturing their baseline digests.
    pub fn from_config(value: &Value) -> ConfigResult<Self> {
        let config: SelfDefenseConfig = parse_config(value)?;
        let mut raw_paths = config.immutable_paths.clone();
        if config.discover_configs {
            for name in DISCOVERED_CONFIGS {
                if Path::new(name).is_file() {
                    raw_paths.push(name.to_owned());
                }
            }
        }
        let targets = raw_paths
            .iter()
            .map(|raw| {
                let path = canonicalize_with_ancestors(raw);
                let is_dir = path.is_dir();
                let baseline = digest_target(&path, is_dir);
                Target {
                    path,
                    is_dir,
                    baseline,
                }
            })
            .collect();
        Ok(Self {
            targets,
            mutating_tools: config.mutating_tools,
            on_write_attempt: config.on_write_attempt,
            on_hash_mismatch: config.on_hash_mismatch,
            kill_switch_path: PathBuf::from(config.kill_switch_path),
            unlock_token_path: config.unlock_token_path.map(PathBuf::from),
            unlock_ttl_sec: config.unlock_ttl_sec,
            mode: config.mode,
        })
    }

    /// Whether a fresh unlock token suspends the checks.
    fn unlocked(&self) -> bool {
        let Some(token) = &self.unlock_token_path else {
            return false;
        };
        let Ok(metadata) = std::fs::metadata(token) else {
            return false;
        };
        let Ok(modified) = metadata.modified() else {
            return false;
        };
        modified
            .elapsed()
            .map(|age| age.as_secs() < self.unlock_ttl_sec)
            .unwrap_or(false)
    }

    fn hit_target(&self, candidate: &Path) -> Option<&Target> {
        self.targets.iter().find(|target| {
            if target.is_dir {
                path_within(&target.path, candidate)
            } else {
                candidate == target.path
            }
        })
    }

    fn write_attempt_decision(&self, target: &Target, tool: &str) -> Decision {
        match self.on_write_attempt {
            OnWriteAttempt::Deny => Decision::deny(
                Self::NAME,
                format!(
                    "{tool} may not modify protected path {}",
                    target.path.display()
                ),
                Severity::Critical,
            ),
            OnWriteAttempt::Challenge => Decision::challenge(
                Self::NAME,
                format!("write into protected path {}", target.path.display()),
                ChallengeRequest {
                    channel: radius_core::ApprovalChannel::default(),
                    prompt: format!(
                        "Allow {tool} to modify protected path {}?",
                        target.path.display()
                    ),
                    timeout_seconds: 120,
                },
            ),
        }
    }

    fn integrity_decision(&self) -> Decision {
        let mut drifted: Vec<String> = Vec::new();
        for target in &self.targets {
            let current = digest_target(&target.path, target.is_dir);
            if current != target.baseline {
                drifted.push(target.path.display().to_string());
            }
        }
        if drifted.is_empty() {
            return Decision::allow(Self::NAME);
        }
        warn!(paths = ?drifted, "protected file digest mismatch");
        if self.on_hash_mismatch == OnHashMismatch::KillSwitch {
            if let Some(parent) = self.kill_switch_path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(err) = std::fs::write(
                &self.kill_switch_path,
                format!("self_defense: {}\n", drifted.join(", ")),
            ) {
                error!(error = %err, "failed to write kill-switch marker");
            }
        }
        Decision::deny(
            Self::NAME,
            format!("protected files changed outside policy: {}", drifted.join(", ")),
            Severity::Critical,
        )
    }
}

#[async_trait]
impl PolicyModule for SelfDefenseModule {
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
        if self.targets.is_empty() || self.unlocked() {
            return Ok(Decision::allow(Self::NAME));
        }

        if event.phase == Phase::PreTool {
            let Some(call) = &event.tool_call else {
                return Ok(Decision::allow(Self::NAME));
            };
            if !self.mutating_tools.iter().any(|t| t == &call.name) {
                return Ok(Decision::allow(Self::NAME));
            }
            for (_, value) in &call.arguments {
                let Some(text) = value.as_str() else { continue };
                if !text.contains('/') && !text.starts_with('~') {
                    continue;
                }
                let canonical = canonicalize_with_ancestors(text);
                if let Some(target) = self.hit_target(&canonical) {
                    return Ok(self.write_attempt_decision(target, &call.name));
                }
            }
            return Ok(Decision::allow(Self::NAME));
        }

        // pre_request / post_tool: integrity recheck.
        Ok(self.integrity_decision())
    }
}
