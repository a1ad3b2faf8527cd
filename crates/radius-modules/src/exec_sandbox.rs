//! Exec sandbox: rewrites shell commands into a bubblewrap invocation.
//!
//! The module never executes anything itself — it prescribes the wrapper by
//! emitting a modify decision that replaces `arguments.command`. Kernel
//! level isolation is the wrapper's job.

use std::process::Command;
use std::sync::OnceLock;

use async_trait::async_trait;
use radius_config::ConfigResult;
use radius_core::{
    CanonicalEvent, CoreResult, Decision, ModuleMode, Patch, Phase, PolicyModule, Severity,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::parse_config;

const PHASES: [Phase; 1] = [Phase::PreTool];

/// Sandbox engine selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxEngine {
    /// No wrapper; `required = true` turns this into a deny.
    #[default]
    None,
    /// Bubblewrap.
    Bwrap,
}

/// Network policy for the sandboxed child.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildNetwork {
    /// Keep the legacy `shareNetwork` flag's behaviour.
    #[default]
    Inherit,
    /// Never share the network namespace.
    Deny,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ChildPolicy {
    network: ChildNetwork,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ExecSandboxConfig {
    engine: SandboxEngine,
    required: bool,
    shell_tools: Vec<String>,
    wrapper_path: String,
    shell: String,
    shell_flag: String,
    share_network: bool,
    child_policy: ChildPolicy,
    read_only_paths: Vec<String>,
    read_write_paths: Vec<String>,
    tmpfs_paths: Vec<String>,
    mode: ModuleMode,
}

impl Default for ExecSandboxConfig {
    fn default() -> Self {
        Self {
            engine: SandboxEngine::None,
            required: false,
            shell_tools: vec!["Bash".to_owned()],
            wrapper_path: "bwrap".to_owned(),
            shell: "/bin/sh".to_owned(),
            shell_flag: "-c".to_owned(),
            share_network: false,
            child_policy: ChildPolicy::default(),
            read_only_paths: vec![
                "/usr".to_owned(),
                "/lib".to_owned(),
                "/lib64".to_owned(),
                "/bin".to_owned(),
                "/etc/resolv.conf".to_owned(),
            ],
            read_write_paths: Vec::new(),
            tmpfs_paths: vec!["/tmp".to_owned()],
            mode: ModuleMode::Enforce,
        }
    }
}

/// Single-quote an argument for the shell, escaping embedded quotes.
#[must_use]
pub fn shell_quote(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('\'');
    for ch in arg.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

/// Wraps shell commands in a bubblewrap invocation, or refuses to let them
/// run when the sandbox is required but unavailable.
#[derive(Debug)]
pub struct ExecSandboxModule {
    config: ExecSandboxConfig,
    probe: OnceLock<bool>,
}

impl ExecSandboxModule {
    /// Module name in decision chains.
    pub const NAME: &'static str = "exec_sandbox";

    /// Build from the module's configuration mapping.
    pub fn from_config(value: &Value) -> ConfigResult<Self> {
        Ok(Self {
            config: parse_config(value)?,
            probe: OnceLock::new(),
        })
    }

    /// Test hook: pin the wrapper-availability probe.
    pub fn set_probe_result(&self, available: bool) {
        let _ = self.probe.set(available);
    }

    /// Probe the wrapper binary once and cache the answer.
    fn wrapper_available(&self) -> bool {
        *self.probe.get_or_init(|| {
            let available = Command::new(&self.config.wrapper_path)
                .arg("--version")
                .output()
                .map(|out| out.status.success())
                .unwrap_or(false);
            debug!(
                wrapper = %self.config.wrapper_path,
                available, "sandbox wrapper probe"
            );
            available
        })
    }

    /// Whether the child keeps network access.
    fn network_shared(&self) -> bool {
        match self.config.child_policy.network {
            ChildNetwork::Inherit => self.config.share_network,
            ChildNetwork::Deny => false,
        }
    }

    /// Build the full wrapper command line for one original command.
    fn wrap_command(&self, original: &str) -> String {
        let mut argv: Vec<String> = vec![
            self.config.wrapper_path.clone(),
            "--die-with-parent".to_owned(),
            "--new-session".to_owned(),
            "--unshare-all".to_owned(),
        ];
        if self.network_shared() {
            argv.push("--share-net".to_owned());
        }
        argv.extend(["--proc".to_owned(), "/proc".to_owned()]);
        argv.extend(["--dev".to_owned(), "/dev".to_owned()]);
        for path in &self.config.read_only_paths {
            argv.extend(["--ro-bind".to_owned(), path.clone(), path.clone()]);
        }
        for path in &self.config.read_write_paths {
            argv.extend(["--bind".to_owned(), path.clone(), path.clone()]);
        }
        for path in &self.config.tmpfs_paths {
            argv.extend(["--tmpfs".to_owned(), path.clone()]);
        }
        argv.extend(["--setenv".to_owned(), "HOME".to_owned(), "/tmp".to_owned()]);
        argv.extend(["--setenv".to_owned(), "TMPDIR".to_owned(), "/tmp".to_owned()]);
        argv.push(self.config.shell.clone());
        argv.push(self.config.shell_flag.clone());
        argv.push(original.to_owned());

        argv.iter()
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl PolicyModule for ExecSandboxModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn phases(&self) -> &[Phase] {
        &PHASES
    }

    fn mode(&self) -> ModuleMode {
        self.config.mode
    }

    async fn evaluate(&self, event: &CanonicalEvent) -> CoreResult<Decision> {
        let Some(call) = &event.tool_call else {
            return Ok(Decision::allow(Self::NAME));
        };
        if !self.config.shell_tools.iter().any(|t| t == &call.name) {
            return Ok(Decision::allow(Self::NAME));
        }
        let Some(command) = call.string_arg("command") else {
            return Ok(Decision::allow(Self::NAME));
        };

        match self.config.engine {
            SandboxEngine::None => {
                if self.config.required {
                    return Ok(Decision::deny(
                        Self::NAME,
                        "sandbox required but engine is none",
                        Severity::Critical,
                    ));
                }
                Ok(Decision::alert(
                    Self::NAME,
                    "shell command runs without a sandbox",
                    Severity::Medium,
                ))
            },
            SandboxEngine::Bwrap => {
                if !self.wrapper_available() {
                    if self.config.required {
                        return Ok(Decision::deny(
                            Self::NAME,
                            format!(
                                "sandbox required but wrapper {:?} is unavailable",
                                self.config.wrapper_path
                            ),
                            Severity::Critical,
                        ));
                    }
                    return Ok(Decision::alert(
                        Self::NAME,
                        format!(
                            "sandbox wrapper {:?} unavailable, running unwrapped",
                            self.config.wrapper_path
                        ),
                        Severity::High,
                    ));
                }
                let wrapped = self.wrap_command(command);
                let mut arguments = serde_json::Map::new();
                arguments.insert("command".to_owned(), Value::String(wrapped));
                Ok(Decision::modify(
                    Self::NAME,
                    "command wrapped in sandbox",
                    Patch {
                        tool_arguments: Some(arguments),
                        ..Patch::default()
                    },
                ))
            },
        }
    }
}
