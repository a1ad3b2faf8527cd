//! State store error types.

use thiserror::Error;

/// Errors raised by the state backends.
#[derive(Debug, Error)]
pub enum StateError {
    /// SQLite failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database file location is unusable.
    #[error("state database unavailable at {path}: {reason}")]
    Unavailable {
        /// Configured database path.
        path: String,
        /// Why it could not be opened.
        reason: String,
    },

    /// Filesystem access failed (creating the state directory).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for state operations.
pub type StateResult<T> = Result<T, StateError>;
