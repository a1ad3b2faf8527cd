//! Tool policy: first-matching rule over tool calls.

use async_trait::async_trait;
use radius_config::{ConfigError, ConfigResult};
use radius_core::{
    ApprovalChannel, CanonicalEvent, ChallengeRequest, CoreResult, Decision, ModuleMode, Phase,
    PolicyModule, Severity,
};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::{compile_pattern, parse_config};

const PHASES: [Phase; 1] = [Phase::PreTool];

/// What a matched rule does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Let the call proceed.
    #[default]
    Allow,
    /// Block the call.
    Deny,
    /// Block pending human approval.
    Challenge,
}

/// Fallback when no rule matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultAction {
    /// Let unmatched calls proceed.
    #[default]
    Allow,
    /// Block unmatched calls.
    Deny,
}

/// Constraint on one argument.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ArgConstraintConfig {
    r#type: Option<String>,
    pattern: Option<String>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    min: Option<f64>,
    max: Option<f64>,
    r#enum: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RuleSchemaConfig {
    required_args: Vec<String>,
    allowed_args: Vec<String>,
    forbid_unknown_args: bool,
    arg_constraints: BTreeMap<String, ArgConstraintConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RuleConfig {
    tool: String,
    when: Option<Value>,
    action: RuleAction,
    schema: Option<RuleSchemaConfig>,
    reason: Option<String>,
    channel: Option<String>,
    prompt: Option<String>,
    timeout_seconds: u64,
    /// Egress block consumed by the registry, not by this module.
    #[allow(dead_code)]
    egress: Option<Value>,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            tool: "*".to_owned(),
            when: None,
            action: RuleAction::Allow,
            schema: None,
            reason: None,
            channel: None,
            prompt: None,
            timeout_seconds: 120,
            egress: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ToolPolicyConfig {
    rules: Vec<RuleConfig>,
    default: DefaultAction,
    mode: ModuleMode,
}

/// A compiled argument constraint.
#[derive(Debug)]
struct ArgConstraint {
    r#type: Option<String>,
    pattern: Option<Regex>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    min: Option<f64>,
    max: Option<f64>,
    allowed_values: Vec<Value>,
}

impl ArgConstraint {
    /// Check one argument value; `Err` carries the precise reason.
    fn check(&self, name: &str, value: &Value) -> Result<(), String> {
        if let Some(expected) = &self.r#type {
            let actual = json_type_name(value);
            if expected != actual {
                return Err(format!(
                    "argument {name:?} has type {actual}, expected {expected}"
                ));
            }
        }
        if let Some(pattern) = &self.pattern {
            let Some(text) = value.as_str() else {
                return Err(format!("argument {name:?} is not a string, cannot match pattern"));
            };
            if !pattern.is_match(text) {
                return Err(format!(
                    "argument {name:?} does not match pattern {:?}",
                    pattern.as_str()
                ));
            }
        }
        if let Some(text) = value.as_str() {
            if let Some(min) = self.min_length {
                if text.chars().count() < min {
                    return Err(format!("argument {name:?} is shorter than {min}"));
                }
            }
            if let Some(max) = self.max_length {
                if text.chars().count() > max {
                    return Err(format!("argument {name:?} is longer than {max}"));
                }
            }
        }
        if let Some(number) = value.as_f64() {
            if let Some(min) = self.min {
                if number < min {
                    return Err(format!("argument {name:?} is below minimum {min}"));
                }
            }
            if let Some(max) = self.max {
                if number > max {
                    return Err(format!("argument {name:?} is above maximum {max}"));
                }
            }
        }
        if !self.allowed_values.is_empty() && !self.allowed_values.contains(value) {
            return Err(format!("argument {name:?} is not one of the allowed values"));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Rule {
    tool: String,
    when: Option<Value>,
    action: RuleAction,
    required_args: Vec<String>,
    allowed_args: Vec<String>,
    forbid_unknown_args: bool,
    constraints: BTreeMap<String, ArgConstraint>,
    has_schema: bool,
    reason: Option<String>,
    channel: Option<ApprovalChannel>,
    prompt: Option<String>,
    timeout_seconds: u64,
}

/// First-matching-rule policy over tool calls.
#[derive(Debug)]
pub struct ToolPolicyModule {
    rules: Vec<Rule>,
    default: DefaultAction,
    mode: ModuleMode,
}

impl ToolPolicyModule {
    /// Module name in decision chains.
    pub const NAME: &'static str = "tool_policy";

    /// Build from the module's configuration mapping, compiling every
    /// constraint pattern once.
    pub fn from_config(value: &Value) -> ConfigResult<Self> {
        let config: ToolPolicyConfig = parse_config(value)?;
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in config.rules {
            let schema = rule.schema.unwrap_or_default();
            let mut constraints = BTreeMap::new();
            for (name, constraint) in schema.arg_constraints {
                let pattern = constraint
                    .pattern
                    .as_deref()
                    .map(|p| compile_pattern(Self::NAME, p, false))
                    .transpose()?;
                constraints.insert(
                    name,
                    ArgConstraint {
                        r#type: constraint.r#type,
                        pattern,
                        min_length: constraint.min_length,
                        max_length: constraint.max_length,
                        min: constraint.min,
                        max: constraint.max,
                        allowed_values: constraint.r#enum,
                    },
                );
            }
            let channel = rule
                .channel
                .as_deref()
                .filter(|c| *c != "auto")
                .map(|c| {
                    ApprovalChannel::parse(c).ok_or_else(|| ConfigError::InvalidPattern {
                        module: Self::NAME.to_owned(),
                        pattern: c.to_owned(),
                        reason: "unknown approval channel".to_owned(),
                    })
                })
                .transpose()?;
            let has_schema = !schema.required_args.is_empty()
                || !schema.allowed_args.is_empty()
                || schema.forbid_unknown_args
                || !constraints.is_empty();
            rules.push(Rule {
                tool: rule.tool,
                when: rule.when,
                action: rule.action,
                required_args: schema.required_args,
                allowed_args: schema.allowed_args,
                forbid_unknown_args: schema.forbid_unknown_args,
                constraints,
                has_schema,
                reason: rule.reason,
                channel,
                prompt: rule.prompt,
                timeout_seconds: rule.timeout_seconds,
            });
        }
        Ok(Self {
            rules,
            default: config.default,
            mode: config.mode,
        })
    }

    fn apply_rule(&self, rule: &Rule, tool: &str, arguments: &Map<String, Value>) -> Decision {
        if rule.has_schema {
            if let Err(reason) = check_schema(rule, arguments) {
                return Decision::deny(Self::NAME, reason, Severity::High);
            }
        }
        match rule.action {
            RuleAction::Allow => Decision::allow_with_reason(
                Self::NAME,
                rule.reason
                    .clone()
                    .unwrap_or_else(|| format!("rule allows {tool}")),
            ),
            RuleAction::Deny => Decision::deny(
                Self::NAME,
                rule.reason
                    .clone()
                    .unwrap_or_else(|| format!("rule denies {tool}")),
                Severity::High,
            ),
            RuleAction::Challenge => Decision::challenge(
                Self::NAME,
                rule.reason
                    .clone()
                    .unwrap_or_else(|| format!("rule challenges {tool}")),
                ChallengeRequest {
                    channel: rule.channel.unwrap_or_default(),
                    prompt: rule
                        .prompt
                        .clone()
                        .unwrap_or_else(|| format!("Approve execution of \"{tool}\"?")),
                    timeout_seconds: rule.timeout_seconds,
                },
            ),
        }
    }
}

/// Schema validation; `Err` carries a precise denial reason.
fn check_schema(rule: &Rule, arguments: &Map<String, Value>) -> Result<(), String> {
    for required in &rule.required_args {
        if !arguments.contains_key(required) {
            return Err(format!("missing required argument {required:?}"));
        }
    }

    let allowlist: Vec<&str> = if rule.allowed_args.is_empty() {
        if rule.forbid_unknown_args {
            // allowed = required ∪ constraint keys
            rule.required_args
                .iter()
                .map(String::as_str)
                .chain(rule.constraints.keys().map(String::as_str))
                .collect()
        } else {
            Vec::new()
        }
    } else {
        rule.allowed_args.iter().map(String::as_str).collect()
    };
    if !allowlist.is_empty() || (rule.forbid_unknown_args && rule.allowed_args.is_empty()) {
        for key in arguments.keys() {
            if !allowlist.contains(&key.as_str()) {
                return Err(format!("argument {key:?} is not allowlisted"));
            }
        }
    }

    for (name, constraint) in &rule.constraints {
        if let Some(value) = arguments.get(name) {
            constraint.check(name, value)?;
        }
    }
    Ok(())
}

/// Structural match of a `when` predicate against an actual value.
///
/// Mappings: every key in the predicate must appear in the actual value and
/// match recursively. Sequences: equal length, pairwise match. Scalars:
/// equality (JSON numbers cannot be NaN, so equality is well-defined).
fn structurally_matches(predicate: &Value, actual: &Value) -> bool {
    match (predicate, actual) {
        (Value::Object(wanted), Value::Object(actual_map)) => wanted.iter().all(|(key, value)| {
            actual_map
                .get(key)
                .is_some_and(|actual_value| structurally_matches(value, actual_value))
        }),
        (Value::Array(wanted), Value::Array(actual_items)) => {
            wanted.len() == actual_items.len()
                && wanted
                    .iter()
                    .zip(actual_items)
                    .all(|(w, a)| structurally_matches(w, a))
        },
        (wanted, actual) => wanted == actual,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl PolicyModule for ToolPolicyModule {
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
        let Some(call) = &event.tool_call else {
            return Ok(Decision::allow(Self::NAME));
        };
        let arguments_value = Value::Object(call.arguments.clone());

        for rule in &self.rules {
            if rule.tool != "*" && rule.tool != call.name {
                continue;
            }
            if let Some(when) = &rule.when {
                if !structurally_matches(when, &arguments_value) {
                    continue;
                }
            }
            return Ok(self.apply_rule(rule, &call.name, &call.arguments));
        }

        Ok(match self.default {
            DefaultAction::Allow => {
                Decision::allow_with_reason(Self::NAME, "no rule matched, default allow")
            },
            DefaultAction::Deny => Decision::deny(
                Self::NAME,
                format!("no rule matched {:?}, default deny", call.name),
                Severity::High,
            ),
        })
    }
}
