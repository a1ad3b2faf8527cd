//! Policy modules for the Radius pipeline.
//!
//! Each module is a self-contained predicate: it receives an untyped
//! configuration mapping at construction, declares its phase set and mode
//! as data, and produces exactly one decision per event. The
//! [`registry`] maps configured module names onto constructors and derives
//! the cross-module bindings (tool-policy egress blocks feed the egress
//! guard, the kill-switch marker path is shared with the tripwire and
//! self-defense modules).

pub mod approval_gate;
pub mod audit;
pub mod command_guard;
pub mod egress_guard;
pub mod exec_sandbox;
pub mod fs_guard;
pub mod kill_switch;
pub mod output_dlp;
pub mod rate_budget;
pub mod registry;
pub mod repetition_guard;
pub mod self_defense;
pub mod skill_scanner;
pub mod tool_policy;
pub mod tripwire_guard;
pub mod verdict_provider;

pub use registry::build_modules;

use radius_config::{ConfigError, ConfigResult};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Parse a module's untyped configuration mapping into its typed form.
///
/// # Errors
///
/// Returns [`ConfigError::Schema`] when the mapping does not fit.
pub(crate) fn parse_config<T: DeserializeOwned>(value: &Value) -> ConfigResult<T> {
    serde_json::from_value(value.clone()).map_err(ConfigError::Schema)
}

/// Compile a configured regex, attributing failures to the module.
pub(crate) fn compile_pattern(
    module: &str,
    pattern: &str,
    case_insensitive: bool,
) -> ConfigResult<regex::Regex> {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| ConfigError::InvalidPattern {
            module: module.to_owned(),
            pattern: pattern.to_owned(),
            reason: e.to_string(),
        })
}
