//! Error types for the ContentVault CLI
//!
//! Messages are user-facing and suggest the next step where one exists.

use cv_common::CvError;
use cv_engine::EngineError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// Engine operation failed
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// Checksum or codec failure
    #[error("{0}")]
    Common(#[from] CvError),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check your config file or CV_* environment variables.")]
    Config(String),

    /// A referenced record does not exist
    #[error("Not found: {0}. Run 'cvault sessions' or 'cvault dead-letter list' to see what exists.")]
    NotFound(String),

    /// The export tree does not match its digest
    #[error("Checksum verification failed for '{dir}': expected '{expected}', got '{actual}'. The export may be corrupted or modified.")]
    ChecksumMismatch {
        dir: String,
        expected: String,
        actual: String,
    },

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// Generic anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_errors_keep_their_message() {
        let err: CliError = EngineError::Auth("token expired".into()).into();
        assert_eq!(err.to_string(), "Authentication failed: token expired");
    }

    #[test]
    fn test_messages_suggest_next_step() {
        assert!(CliError::not_found("session abc").to_string().contains("cvault sessions"));
        assert!(CliError::config("bad workers").to_string().contains("CV_*"));
    }
}
