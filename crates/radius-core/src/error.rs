//! Core error types.

use thiserror::Error;

/// Errors that can surface from module evaluation or the shared utilities.
///
/// The pipeline never lets these escape: an error raised by an enforce-mode
/// module becomes a synthetic fail-closed deny, and an observe-mode error
/// becomes an alert line.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A policy module failed while evaluating an event.
    #[error("{0}")]
    Evaluation(String),

    /// An outbound HTTP call failed (verdict providers, connectors).
    #[error("http request failed: {0}")]
    Http(String),

    /// Filesystem access failed during canonicalization or digesting.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A configured pattern failed to compile.
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// The offending pattern source.
        pattern: String,
        /// Why compilation failed.
        reason: String,
    },
}

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
