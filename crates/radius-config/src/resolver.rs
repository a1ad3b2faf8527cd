//! Loading, merging, and template expansion.
//!
//! Merge order is built-in defaults ← profile defaults ← user document,
//! all as JSON trees so mappings deep-merge and user scalars/sequences win.
//! After merging, every `${NAME}` inside string scalars is replaced from
//! {workspace, CWD, HOME, process env}.

use std::collections::BTreeMap;
use std::path::Path;

use radius_core::merge::deep_merge;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::profiles::Profile;
use crate::types::{RadiusConfig, UndefinedVarPolicy};

/// File names probed in the working directory when no path is given.
const CONFIG_FILE_NAMES: [&str; 3] = ["radius.yaml", "radius.yml", ".radius.yaml"];

/// Load and resolve configuration.
///
/// With `path` set, that file must exist. Without it, the working directory
/// is probed for `radius.yaml`, `radius.yml`, `.radius.yaml` in order; when
/// none exists the built-in defaults apply alone.
///
/// # Errors
///
/// Read, parse, schema, profile, and template errors — all fatal at
/// startup.
pub fn load_config(path: Option<&Path>) -> ConfigResult<RadiusConfig> {
    let document = match path {
        Some(explicit) => Some(read_yaml(explicit)?),
        None => {
            let mut found = None;
            for name in CONFIG_FILE_NAMES {
                let candidate = Path::new(name);
                if candidate.is_file() {
                    found = Some(read_yaml(candidate)?);
                    break;
                }
            }
            found
        },
    };
    resolve_config(document.unwrap_or_else(|| json!({})))
}

fn read_yaml(path: &Path) -> ConfigResult<Value> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let yaml: serde_yaml::Value = serde_yaml::from_str(&text)?;
    debug!(path = %path.display(), "loaded config file");
    // Re-serialize through JSON so the merge and expansion passes work on
    // one tree type.
    serde_json::to_value(yaml).map_err(ConfigError::Schema)
}

/// Resolve a raw user document into a frozen [`RadiusConfig`].
///
/// # Errors
///
/// Unknown profile, undefined template variable (under the `error`
/// policy), or a merged document that does not fit the schema.
pub fn resolve_config(user: Value) -> ConfigResult<RadiusConfig> {
    let profile_name = user
        .pointer("/global/profile")
        .and_then(Value::as_str)
        .unwrap_or("standard");
    let profile = Profile::resolve(profile_name)?;

    let mut merged = builtin_defaults();
    deep_merge(&mut merged, &profile.defaults());
    deep_merge(&mut merged, &user);

    // The user may have set an alias; downstream sees canonical names only.
    if let Some(slot) = merged.pointer_mut("/global/profile") {
        *slot = Value::String(profile.as_str().to_owned());
    }

    normalize_adapter_keys(&mut merged);

    let policy = undefined_var_policy(&merged);
    let vars = template_vars(&merged, policy)?;
    expand_templates(&mut merged, &vars, policy)?;

    let config: RadiusConfig = serde_json::from_value(merged)?;
    Ok(config)
}

/// Built-in defaults, before any profile contribution.
fn builtin_defaults() -> Value {
    serde_json::to_value(RadiusConfig::default()).unwrap_or_else(|_| json!({}))
}

/// Fold `adapters.claudeTelegram` into `adapters.claude-telegram`.
fn normalize_adapter_keys(merged: &mut Value) {
    let Some(adapters) = merged
        .pointer_mut("/adapters")
        .and_then(Value::as_object_mut)
    else {
        return;
    };
    if let Some(settings) = adapters.remove("claudeTelegram") {
        match adapters.get_mut("claude-telegram") {
            Some(existing) => deep_merge(existing, &settings),
            None => {
                adapters.insert("claude-telegram".to_owned(), settings);
            },
        }
    }
}

fn undefined_var_policy(merged: &Value) -> UndefinedVarPolicy {
    match merged
        .pointer("/global/onUndefinedTemplateVar")
        .and_then(Value::as_str)
    {
        Some("empty") => UndefinedVarPolicy::Empty,
        _ => UndefinedVarPolicy::Error,
    }
}

/// Build the variable table. `workspace` itself may contain templates, so
/// it is expanded first against {CWD, HOME, env}.
fn template_vars(
    merged: &Value,
    policy: UndefinedVarPolicy,
) -> ConfigResult<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    vars.insert("CWD".to_owned(), cwd);
    if let Ok(home) = std::env::var("HOME") {
        vars.insert("HOME".to_owned(), home);
    }

    let raw_workspace = merged
        .pointer("/global/workspace")
        .and_then(Value::as_str)
        .unwrap_or("${CWD}");
    let workspace = expand_string(raw_workspace, &vars, policy)?;
    vars.insert("workspace".to_owned(), workspace);
    Ok(vars)
}

/// Recursively expand `${NAME}` in every string scalar.
fn expand_templates(
    value: &mut Value,
    vars: &BTreeMap<String, String>,
    policy: UndefinedVarPolicy,
) -> ConfigResult<()> {
    match value {
        Value::String(s) => {
            *s = expand_string(s, vars, policy)?;
        },
        Value::Array(items) => {
            for item in items {
                expand_templates(item, vars, policy)?;
            }
        },
        Value::Object(map) => {
            for item in map.values_mut() {
                expand_templates(item, vars, policy)?;
            }
        },
        _ => {},
    }
    Ok(())
}

/// Expand `${NAME}` occurrences in one string.
///
/// Lookup order: the variable table (workspace, CWD, HOME), then the
/// process environment.
fn expand_string(
    input: &str,
    vars: &BTreeMap<String, String>,
    policy: UndefinedVarPolicy,
) -> ConfigResult<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated template; keep the literal text.
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = &after[..end];
        match vars
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
        {
            Some(replacement) => out.push_str(&replacement),
            None => match policy {
                UndefinedVarPolicy::Error => {
                    return Err(ConfigError::UndefinedTemplateVar(name.to_owned()));
                },
                UndefinedVarPolicy::Empty => {},
            },
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_empty_document_yields_standard_profile() {
        let config = resolve_config(json!({})).unwrap();
        assert_eq!(config.global.profile, "standard");
        assert_eq!(config.global.default_action, radius_core::Action::Deny);
        assert!(config.modules.contains(&"fs_guard".to_owned()));
    }

    #[test]
    fn test_alias_resolves_to_canonical() {
        let config = resolve_config(json!({"global": {"profile": "yolo"}})).unwrap();
        assert_eq!(config.global.profile, "unbounded");
        assert_eq!(config.global.default_action, radius_core::Action::Allow);
        assert_eq!(config.modules, vec!["kill_switch", "audit"]);
    }

    #[test]
    fn test_unknown_profile_is_fatal() {
        assert!(matches!(
            resolve_config(json!({"global": {"profile": "extreme"}})),
            Err(ConfigError::UnknownProfile(_))
        ));
    }

    #[test]
    fn test_user_document_overrides_profile_defaults() {
        let config = resolve_config(json!({
            "global": {"profile": "standard"},
            "modules": ["kill_switch", "fs_guard", "audit"],
            "moduleConfig": {
                "fs_guard": {"blockedPaths": ["/secrets"]},
            },
        }))
        .unwrap();
        assert_eq!(config.modules, vec!["kill_switch", "fs_guard", "audit"]);
        // Sequences replace: the profile's blocked list is gone.
        assert_eq!(
            config.module_config("fs_guard")["blockedPaths"],
            json!(["/secrets"])
        );
        // Mappings merge: the profile's allowedPaths survives.
        assert!(config.module_config("fs_guard")["allowedPaths"].is_array());
    }

    #[test]
    fn test_workspace_template_expansion() {
        std::env::set_var("HOME", "/home/tester");
        let config = resolve_config(json!({
            "global": {"workspace": "${HOME}/agent"},
            "moduleConfig": {
                "fs_guard": {"allowedPaths": ["${workspace}/src"]},
            },
        }))
        .unwrap();
        assert_eq!(config.global.workspace, "/home/tester/agent");
        assert_eq!(
            config.module_config("fs_guard")["allowedPaths"][0],
            json!("/home/tester/agent/src")
        );
    }

    #[test]
    fn test_undefined_var_error_policy() {
        let result = resolve_config(json!({
            "moduleConfig": {"x": {"path": "${RADIUS_NO_SUCH_VAR_A}"}},
        }));
        assert!(matches!(result, Err(ConfigError::UndefinedTemplateVar(name)) if name == "RADIUS_NO_SUCH_VAR_A"));
    }

    #[test]
    fn test_undefined_var_empty_policy() {
        let config = resolve_config(json!({
            "global": {"onUndefinedTemplateVar": "empty"},
            "moduleConfig": {"x": {"path": "a${RADIUS_NO_SUCH_VAR_B}b"}},
        }))
        .unwrap();
        assert_eq!(config.module_config("x")["path"], json!("ab"));
    }

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("RADIUS_TEST_TOKEN", "tok-123");
        let config = resolve_config(json!({
            "approval": {"telegram": {"botToken": "${RADIUS_TEST_TOKEN}"}},
        }))
        .unwrap();
        assert_eq!(
            config.approval.telegram.unwrap().bot_token,
            "tok-123"
        );
    }

    #[test]
    fn test_claude_telegram_key_normalized() {
        let config = resolve_config(json!({
            "adapters": {"claudeTelegram": {"enabled": true}},
        }))
        .unwrap();
        assert!(config.adapters.contains_key("claude-telegram"));
        assert!(!config.adapters.contains_key("claudeTelegram"));
        assert!(config.adapters["claude-telegram"].enabled);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radius.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "global:\n  profile: strict\nmodules:\n  - kill_switch\n  - audit\n"
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.global.profile, "local");
        assert_eq!(config.modules, vec!["kill_switch", "audit"]);
    }

    #[test]
    fn test_load_config_missing_explicit_path_fails() {
        assert!(matches!(
            load_config(Some(Path::new("/nonexistent/radius.yaml"))),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_unterminated_template_kept_literal() {
        let config = resolve_config(json!({
            "moduleConfig": {"x": {"note": "cost is ${unclosed"}},
        }))
        .unwrap();
        assert_eq!(config.module_config("x")["note"], json!("cost is ${unclosed"));
    }
}
