//! Configuration resolver for the Radius runtime.
//!
//! Loads the YAML document, applies profile defaults (resolved through the
//! alias table), deep-merges the user document on top, expands `${VAR}`
//! templates, and normalizes adapter keys so downstream code only ever sees
//! canonical names.

pub mod error;
pub mod profiles;
pub mod resolver;
pub mod types;

pub use error::{ConfigError, ConfigResult};
pub use profiles::Profile;
pub use resolver::{load_config, resolve_config};
pub use types::{
    AdapterSettings, ApprovalConfig, AuditSettings, FailurePolicy, GlobalConfig,
    HttpConnectorConfig, RadiusConfig, TelegramConnectorConfig, UndefinedVarPolicy,
};
