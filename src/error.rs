//! Error types for nzbqueue
//!
//! The crate follows a two-level error shape: a top-level [`Error`] with
//! domain-specific variants, plus a crate-wide [`Result`] alias. User-facing
//! edit operations additionally report success as a boolean per the stable
//! edit contract; those paths record details in the job message ring instead
//! of propagating an error.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for nzbqueue operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for nzbqueue
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "dest_dir")
        key: Option<String>,
    },

    /// Invalid NZB file
    #[error("invalid NZB: {0}")]
    InvalidNzb(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Queue or history entry not found
    #[error("entry not found: {0}")]
    NotFound(String),

    /// Persisted queue state is damaged or has an unsupported version
    #[error("disk state error: {0}")]
    DiskState(String),

    /// Incoming-directory scanning error
    #[error("scan error: {0}")]
    Scan(String),

    /// Directory watching error
    #[error("watch error: {0}")]
    Watch(String),

    /// Article transport reported a failure the core cannot recover from
    #[error("transport error: {0}")]
    Transport(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,

    /// A rename target already exists on disk
    #[error("rename target already exists: {0}")]
    TargetExists(PathBuf),

    /// Other error
    #[error("{0}")]
    Other(String),
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts_with_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn config_error_display_includes_message() {
        let err = Error::Config {
            message: "dest_dir must not be empty".to_string(),
            key: Some("dest_dir".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "configuration error: dest_dir must not be empty"
        );
    }
}
