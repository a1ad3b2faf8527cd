//! End-to-end scenarios through the assembled runtime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use radius_config::resolve_config;
use radius_core::{Action, ApprovalChannel, CanonicalEvent, Framework, Phase, ToolCall};
use radius_runtime::Runtime;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn bash_event(session: &str, command: &str) -> CanonicalEvent {
    let args = json!({"command": command}).as_object().cloned().unwrap();
    CanonicalEvent::new(Phase::PreTool, Framework::Openclaw)
        .with_session(session)
        .with_tool_call(ToolCall::new("Bash", args))
}

fn runtime(config: Value) -> Runtime {
    let mut config = config;
    // Tests never write audit files into the working tree.
    if config.pointer("/audit/file").is_none() {
        config["audit"] = json!({"file": null});
    }
    Runtime::new(resolve_config(config).unwrap()).unwrap()
}

/// A one-shot HTTP approval bridge answering every POST with a fixed body.
async fn spawn_bridge(body: &'static str) -> (String, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buffer = Vec::new();
                let mut chunk = [0u8; 4096];
                // Read headers, then the content-length body.
                let body_start = loop {
                    let Ok(n) = socket.read(&mut chunk).await else {
                        return;
                    };
                    if n == 0 {
                        return;
                    }
                    buffer.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let headers = String::from_utf8_lossy(&buffer[..body_start]).to_lowercase();
                let content_length = headers
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                while buffer.len() < body_start + content_length {
                    let Ok(n) = socket.read(&mut chunk).await else {
                        return;
                    };
                    if n == 0 {
                        break;
                    }
                    buffer.extend_from_slice(&chunk[..n]);
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (format!("http://{addr}/approve"), calls)
}

/// S1: a shell read of a blocked prefix is denied by the filesystem guard.
#[tokio::test]
async fn s1_blocked_prefix_via_shell() {
    let home = tempfile::tempdir().unwrap();
    std::env::set_var("HOME", home.path());
    std::fs::create_dir_all(home.path().join(".ssh")).unwrap();

    let runtime = runtime(json!({
        "global": {"profile": "standard"},
        "moduleConfig": {
            "fs_guard": {
                "blockedPaths": ["~/.ssh"],
                "allowedPaths": ["/workspace"],
            },
        },
    }));
    let result = runtime
        .evaluate(&bash_event("s-deny", "cat ~/.ssh/id_rsa"))
        .await;
    assert_eq!(result.final_action, Action::Deny);
    assert!(
        result.final_reason.contains("is in blocked prefix"),
        "unexpected reason: {}",
        result.final_reason
    );
}

/// S2: `sudo` in any segment is denied by the command guard, and the
/// command guard is the terminating decision.
#[tokio::test]
async fn s2_sudo_denied_by_command_guard() {
    let runtime = runtime(json!({"global": {"profile": "standard"}}));
    let result = runtime
        .evaluate(&bash_event("s-sudo", "echo ok && sudo rm -rf /"))
        .await;
    assert_eq!(result.final_action, Action::Deny);
    assert!(result.final_reason.contains("sudo"));
    let last = result.decisions.last().unwrap();
    assert_eq!(last.module, "command_guard");
    assert!(!result
        .decisions
        .iter()
        .any(|d| d.action == Action::Deny && d.module != "command_guard"));
}

/// S3: an available sandbox wrapper rewrites the command in place.
#[tokio::test]
async fn s3_sandbox_wraps_command() {
    let runtime = runtime(json!({
        "global": {"profile": "standard"},
        "modules": ["kill_switch", "command_guard", "exec_sandbox"],
        "moduleConfig": {
            "exec_sandbox": {
                "engine": "bwrap",
                "required": true,
                "wrapperPath": "/bin/true",
            },
        },
    }));
    let result = runtime
        .evaluate(&bash_event("s-sandbox", "echo 'sandboxed'"))
        .await;
    assert_eq!(result.final_action, Action::Allow);
    let command = result.transforms.tool_arguments.unwrap()["command"]
        .as_str()
        .unwrap()
        .to_owned();
    assert!(command.starts_with("'/bin/true'"), "command: {command}");
    assert!(command.contains("--unshare-all"));
}

/// S4: an auto-channel approval gate resolves the channel from event
/// metadata.
#[tokio::test]
async fn s4_challenge_channel_from_metadata() {
    let runtime = runtime(json!({
        "modules": ["approval_gate"],
        "moduleConfig": {
            "approval_gate": {"rules": [{"tool": "Bash", "channel": "auto"}]},
        },
    }));
    let event = bash_event("s-gate", "ls").with_metadata("channel", "discord");
    let result = runtime.evaluate(&event).await;
    assert_eq!(result.final_action, Action::Challenge);
    let challenge = result.decisions.last().unwrap().challenge.as_ref().unwrap();
    assert_eq!(challenge.channel, ApprovalChannel::Discord);
}

/// S5: a temporary HTTP approval installs a lease; the second call is
/// allowed without touching the bridge again.
#[tokio::test]
async fn s5_temporary_approval_installs_lease() {
    let (url, calls) = spawn_bridge(r#"{"status":"approved_temporary","ttlSec":120}"#).await;
    let runtime = runtime(json!({
        "modules": ["approval_gate"],
        "approval": {
            "enabled": true,
            "mode": "sync_wait",
            "http": {"url": url, "timeoutMs": 2000},
        },
        "moduleConfig": {
            "approval_gate": {
                "rules": [{"tool": "Bash", "channel": "http", "timeoutSeconds": 5}],
            },
        },
    }));

    let event = bash_event("s-lease", "ls")
        .with_agent("worker");
    let first = runtime.evaluate(&event).await;
    assert_eq!(first.final_action, Action::Allow, "{first:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let second = runtime.evaluate(&event).await;
    assert_eq!(second.final_action, Action::Allow);
    // The lease suppressed the challenge; the bridge saw exactly one call.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(second
        .decisions
        .iter()
        .any(|d| d.reason.contains("approval lease active")));
}

/// S5 variant: a denial from the bridge folds into a deny with the
/// channel-prefixed reason.
#[tokio::test]
async fn s5b_http_denial_folds_to_deny() {
    let (url, _calls) = spawn_bridge(r#"{"status":"denied","reason":"operator said no"}"#).await;
    let runtime = runtime(json!({
        "modules": ["approval_gate"],
        "approval": {
            "enabled": true,
            "http": {"url": url, "timeoutMs": 2000},
        },
        "moduleConfig": {
            "approval_gate": {
                "rules": [{"tool": "Bash", "channel": "http", "timeoutSeconds": 5}],
            },
        },
    }));
    let result = runtime.evaluate(&bash_event("s-denied", "ls")).await;
    assert_eq!(result.final_action, Action::Deny);
    assert!(result.final_reason.starts_with("http:"));
    assert!(result.final_reason.contains("operator said no"));
}

/// S6: the persistent rate budget denies the fourth call in the window.
#[tokio::test]
async fn s6_persistent_rate_budget() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("state.db");
    let runtime = runtime(json!({
        "modules": ["rate_budget"],
        "moduleConfig": {
            "rate_budget": {
                "windowSec": 60,
                "maxCallsPerWindow": 3,
                "store": {"backend": "sqlite", "path": db.display().to_string()},
            },
        },
    }));

    for i in 0..3 {
        let result = runtime.evaluate(&bash_event("s-rate", "ls")).await;
        assert_eq!(result.final_action, Action::Allow, "call {i}");
    }
    let fourth = runtime.evaluate(&bash_event("s-rate", "ls")).await;
    assert_eq!(fourth.final_action, Action::Deny);
    assert!(fourth.final_reason.contains("rate limit exceeded: 3/3"));
    assert!(db.exists());
}

/// Unimplemented approval modes deny rather than guess.
#[tokio::test]
async fn unimplemented_approval_mode_denies() {
    let runtime = runtime(json!({
        "modules": ["approval_gate"],
        "approval": {
            "enabled": true,
            "mode": "async_token",
            "http": {"url": "http://127.0.0.1:1/approve", "timeoutMs": 200},
        },
        "moduleConfig": {
            "approval_gate": {
                "rules": [{"tool": "Bash", "channel": "http", "timeoutSeconds": 2}],
            },
        },
    }));
    let result = runtime.evaluate(&bash_event("s-mode", "ls")).await;
    assert_eq!(result.final_action, Action::Deny);
    assert!(result.final_reason.contains("not implemented"));
}

/// A connector failure with the alert policy lets the call through with an
/// alert line instead of denying.
#[tokio::test]
async fn connector_error_alert_policy() {
    let runtime = runtime(json!({
        "modules": ["approval_gate"],
        "approval": {
            "enabled": true,
            "onConnectorError": "alert",
            "http": {"url": "http://127.0.0.1:1/approve", "timeoutMs": 200},
        },
        "moduleConfig": {
            "approval_gate": {
                "rules": [{"tool": "Bash", "channel": "http", "timeoutSeconds": 2}],
            },
        },
    }));
    let result = runtime.evaluate(&bash_event("s-err", "ls")).await;
    assert_eq!(result.final_action, Action::Allow);
    assert!(result
        .alerts
        .iter()
        .any(|line| line.contains("approval connector failed")));
}

/// Disabled approval passes challenges through to the orchestrator.
#[tokio::test]
async fn disabled_approval_passes_challenge_through() {
    let runtime = runtime(json!({
        "modules": ["approval_gate"],
        "moduleConfig": {
            "approval_gate": {"rules": [{"tool": "*"}]},
        },
    }));
    let response = runtime
        .handle(
            Framework::Openclaw,
            &json!({
                "hook_type": "PreToolUse",
                "tool_name": "Bash",
                "tool_input": {"command": "ls"},
                "session_id": "s-pass",
            }),
        )
        .await;
    assert_eq!(response["decision"], json!("challenge"));
    assert!(response["challenge"]["prompt"]
        .as_str()
        .unwrap()
        .contains("Bash"));
}

/// The unbounded profile allows events that no module claims.
#[tokio::test]
async fn unbounded_profile_defaults_to_allow() {
    let runtime = runtime(json!({
        "global": {"profile": "monitor"},
        "modules": [],
    }));
    let result = runtime.evaluate(&bash_event("s-open", "ls")).await;
    assert_eq!(result.final_action, Action::Allow);
    assert_eq!(result.final_reason, "no applicable modules");
}

/// Full openclaw round trip with a transform: the response carries the
/// sandboxed command as updated input.
#[tokio::test]
async fn openclaw_round_trip_with_transform() {
    let runtime = runtime(json!({
        "modules": ["exec_sandbox"],
        "moduleConfig": {
            "exec_sandbox": {
                "engine": "bwrap",
                "required": true,
                "wrapperPath": "/bin/true",
            },
        },
    }));
    let response = runtime
        .handle(
            Framework::Openclaw,
            &json!({
                "hook_type": "PreToolUse",
                "tool_name": "Bash",
                "tool_input": {"command": "make test"},
                "session_id": "s-rt",
            }),
        )
        .await;
    assert_eq!(response["decision"], json!("allow"));
    assert!(response["updatedInput"]["command"]
        .as_str()
        .unwrap()
        .contains("--unshare-all"));
}
