//! Module registry: names → instances, plus cross-module bindings.

use std::sync::Arc;

use radius_audit::AuditRecorder;
use radius_config::{ConfigError, ConfigResult, RadiusConfig};
use radius_core::PolicyModule;
use radius_state::StateStore;
use serde_json::{Map, Value};
use tracing::debug;

use crate::approval_gate::ApprovalGateModule;
use crate::audit::AuditModule;
use crate::command_guard::CommandGuardModule;
use crate::egress_guard::EgressGuardModule;
use crate::exec_sandbox::ExecSandboxModule;
use crate::fs_guard::FsGuardModule;
use crate::kill_switch::KillSwitchModule;
use crate::output_dlp::OutputDlpModule;
use crate::rate_budget::RateBudgetModule;
use crate::repetition_guard::RepetitionGuardModule;
use crate::self_defense::SelfDefenseModule;
use crate::skill_scanner::SkillScannerModule;
use crate::tool_policy::ToolPolicyModule;
use crate::tripwire_guard::TripwireGuardModule;
use crate::verdict_provider::VerdictProviderModule;

/// Instantiate the configured module list, in order.
///
/// Cross-module bindings are derived here: tool-policy rule `egress` blocks
/// become egress-guard intersect bindings (first rule per tool wins), the
/// approval configuration's channel defaults feed the approval gate, and
/// the kill-switch marker path is shared with the tripwire and
/// self-defense modules.
///
/// # Errors
///
/// [`ConfigError::UnknownModule`] for a name with no factory; schema and
/// pattern errors from the individual constructors.
pub fn build_modules(
    config: &RadiusConfig,
    store: Arc<dyn StateStore>,
    recorder: Arc<AuditRecorder>,
) -> ConfigResult<Vec<Arc<dyn PolicyModule>>> {
    let mut modules: Vec<Arc<dyn PolicyModule>> = Vec::with_capacity(config.modules.len());
    for name in &config.modules {
        let module_config = config.module_config(name);
        let module: Arc<dyn PolicyModule> = match name.as_str() {
            KillSwitchModule::NAME => Arc::new(KillSwitchModule::from_config(&module_config)?),
            ToolPolicyModule::NAME => Arc::new(ToolPolicyModule::from_config(&module_config)?),
            FsGuardModule::NAME => Arc::new(FsGuardModule::from_config(&module_config)?),
            CommandGuardModule::NAME => {
                Arc::new(CommandGuardModule::from_config(&module_config)?)
            },
            ExecSandboxModule::NAME => Arc::new(ExecSandboxModule::from_config(&module_config)?),
            EgressGuardModule::NAME => {
                let with_bindings = with_derived_bindings(&module_config, config);
                Arc::new(EgressGuardModule::from_config(&with_bindings)?)
            },
            OutputDlpModule::NAME => Arc::new(OutputDlpModule::from_config(&module_config)?),
            RateBudgetModule::NAME => {
                Arc::new(RateBudgetModule::from_config(&module_config, Arc::clone(&store))?)
            },
            RepetitionGuardModule::NAME => Arc::new(RepetitionGuardModule::from_config(
                &module_config,
                Arc::clone(&store),
            )?),
            TripwireGuardModule::NAME => {
                let with_marker = with_kill_switch_path(&module_config, config);
                Arc::new(TripwireGuardModule::from_config(&with_marker)?)
            },
            SelfDefenseModule::NAME => {
                let with_marker = with_kill_switch_path(&module_config, config);
                Arc::new(SelfDefenseModule::from_config(&with_marker)?)
            },
            ApprovalGateModule::NAME => {
                let with_channels = with_approval_defaults(&module_config, config);
                Arc::new(ApprovalGateModule::from_config(&with_channels)?)
            },
            SkillScannerModule::NAME => {
                Arc::new(SkillScannerModule::from_config(&module_config)?)
            },
            VerdictProviderModule::NAME => {
                Arc::new(VerdictProviderModule::from_config(&module_config)?)
            },
            AuditModule::NAME => Arc::new(AuditModule::new(Arc::clone(&recorder))),
            other => return Err(ConfigError::UnknownModule(other.to_owned())),
        };
        debug!(module = name.as_str(), "module constructed");
        modules.push(module);
    }
    Ok(modules)
}

fn as_map(value: &Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Derive egress-guard tool bindings from tool-policy rule egress blocks.
///
/// Explicitly configured bindings win; otherwise the first rule carrying an
/// `egress` block per tool contributes one intersect binding.
fn with_derived_bindings(module_config: &Value, config: &RadiusConfig) -> Value {
    let mut map = as_map(module_config);
    let already = map
        .get("toolBindings")
        .and_then(Value::as_object)
        .is_some_and(|b| !b.is_empty());
    if !already {
        let mut bindings = Map::new();
        let tool_policy = config.module_config(ToolPolicyModule::NAME);
        if let Some(rules) = tool_policy.get("rules").and_then(Value::as_array) {
            for rule in rules {
                let (Some(tool), Some(egress)) = (
                    rule.get("tool").and_then(Value::as_str),
                    rule.get("egress").filter(|e| e.is_object()),
                ) else {
                    continue;
                };
                if tool != "*" && !bindings.contains_key(tool) {
                    bindings.insert(tool.to_owned(), egress.clone());
                }
            }
        }
        if !bindings.is_empty() {
            map.insert("toolBindings".to_owned(), Value::Object(bindings));
        }
    }
    Value::Object(map)
}

/// Share the kill-switch marker path with modules that can engage it.
fn with_kill_switch_path(module_config: &Value, config: &RadiusConfig) -> Value {
    let mut map = as_map(module_config);
    if !map.contains_key("killSwitchPath") {
        if let Some(path) = config
            .module_config(KillSwitchModule::NAME)
            .get("filePath")
            .and_then(Value::as_str)
        {
            map.insert("killSwitchPath".to_owned(), Value::String(path.to_owned()));
        }
    }
    Value::Object(map)
}

/// Feed the approval configuration's channel defaults to the gate.
fn with_approval_defaults(module_config: &Value, config: &RadiusConfig) -> Value {
    let mut map = as_map(module_config);
    if !map.contains_key("frameworkChannels") && !config.approval.channel_defaults.is_empty() {
        let channels: Map<String, Value> = config
            .approval
            .channel_defaults
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        map.insert("frameworkChannels".to_owned(), Value::Object(channels));
    }
    if !map.contains_key("defaultChannel") {
        map.insert(
            "defaultChannel".to_owned(),
            Value::String(config.approval.default_channel.clone()),
        );
    }
    Value::Object(map)
}
