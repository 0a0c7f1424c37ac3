//! Engine error types
//!
//! Every failure is classified by [`ErrorScope`] so the orchestrator can decide
//! whether to dead-letter a single item, dead-letter an offset range, or stop
//! the whole session.

use cv_common::CvError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// How far a failure reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// One record; recorded in dead letter, siblings continue
    Item,
    /// One claimed offset range; recorded in dead letter, the worker moves on
    Range,
    /// The whole session; workers stop and the session is marked failed
    Session,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Rate limited by remote API: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Remote API rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Store schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    #[error("Processing failed: {source}")]
    Processing {
        #[source]
        source: Box<EngineError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    WorkerFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Common(#[from] CvError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimit {
            message: msg.into(),
            retry_after: None,
        }
    }

    /// Wrap a failure raised inside a batch transform
    pub fn processing(cause: EngineError) -> Self {
        match cause {
            already @ EngineError::Processing { .. } => already,
            other => Self::Processing {
                source: Box::new(other),
            },
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, EngineError::RateLimit { .. })
    }

    pub fn scope(&self) -> ErrorScope {
        match self {
            EngineError::Serialization(_) => ErrorScope::Item,
            EngineError::Common(err) => match err {
                CvError::Serialization(_)
                | CvError::Encode(_)
                | CvError::Decode(_)
                | CvError::UnknownContentType(_) => ErrorScope::Item,
                CvError::Io(_)
                | CvError::Walk(_)
                | CvError::ChecksumMismatch { .. }
                | CvError::UnknownSessionStatus(_)
                | CvError::InvalidTransition { .. } => ErrorScope::Session,
            },
            EngineError::Processing { source } => match source.scope() {
                ErrorScope::Session => ErrorScope::Session,
                ErrorScope::Item | ErrorScope::Range => ErrorScope::Range,
            },
            EngineError::RateLimit { .. } | EngineError::Api { .. } | EngineError::NotFound(_) => {
                ErrorScope::Range
            },
            EngineError::Connectivity(_)
            | EngineError::Auth(_)
            | EngineError::Storage(_)
            | EngineError::Migration(_)
            | EngineError::SchemaTooNew { .. }
            | EngineError::Config(_)
            | EngineError::Cancelled
            | EngineError::WorkerFailed(_)
            | EngineError::Io(_) => ErrorScope::Session,
        }
    }

    /// Short machine-readable label stored with dead-letter entries
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::RateLimit { .. } => "rate_limit",
            EngineError::Connectivity(_) => "connectivity",
            EngineError::Auth(_) => "auth",
            EngineError::Api { .. } => "api",
            EngineError::Serialization(_) => "serialization",
            EngineError::Common(
                CvError::Serialization(_) | CvError::Encode(_) | CvError::Decode(_),
            ) => "serialization",
            EngineError::Storage(_) | EngineError::Migration(_) | EngineError::SchemaTooNew { .. } => {
                "storage"
            }
            EngineError::Processing { .. } => "processing",
            EngineError::Config(_) => "config",
            EngineError::Cancelled => "cancelled",
            EngineError::WorkerFailed(_) => "worker",
            EngineError::NotFound(_) => "not_found",
            EngineError::Common(_) | EngineError::Io(_) => "internal",
        }
    }
}
