//! Configuration error types.
//!
//! All of these surface at startup and abort initialization — a running
//! pipeline never sees a configuration error.

use thiserror::Error;

/// Errors raised while loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// The path that failed.
        path: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The YAML document failed to parse.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The merged document does not fit the configuration schema.
    #[error("invalid config: {0}")]
    Schema(#[from] serde_json::Error),

    /// An unknown profile name (after alias resolution).
    #[error("unknown profile: {0}")]
    UnknownProfile(String),

    /// A `${NAME}` template referenced an undefined variable with
    /// `onUndefinedTemplateVar: error`.
    #[error("undefined template variable: ${{{0}}}")]
    UndefinedTemplateVar(String),

    /// A module name with no registered factory.
    #[error("unknown module: {0}")]
    UnknownModule(String),

    /// A configured pattern failed to compile.
    #[error("invalid pattern {pattern:?} in module {module}: {reason}")]
    InvalidPattern {
        /// Module the pattern was configured for.
        module: String,
        /// The offending pattern source.
        pattern: String,
        /// Why compilation failed.
        reason: String,
    },

    /// An adapter key naming no known framework.
    #[error("unknown framework: {0}")]
    UnknownFramework(String),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
