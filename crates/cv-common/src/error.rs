//! Error types for ContentVault

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CvError>;

/// Main error type shared across the workspace
#[derive(Error, Debug)]
pub enum CvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Payload encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Payload decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Unknown content type: {0}")]
    UnknownContentType(String),

    #[error("Unknown session status: {0}")]
    UnknownSessionStatus(String),

    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}
