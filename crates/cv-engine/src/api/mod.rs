//! Remote platform API boundary
//!
//! The engine talks to the platform only through [`ContentApi`]. The
//! production implementation is [`HttpContentApi`]; tests substitute
//! scripted in-memory fakes.

pub mod endpoints;
mod http;

pub use http::HttpContentApi;

use async_trait::async_trait;
use cv_common::ContentType;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::error::EngineError;

/// Failures reported by a [`ContentApi`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// The platform is throttling requests; the only retryable kind
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Connection failed: {0}")]
    Connectivity(String),

    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }
}

impl From<ApiError> for EngineError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::RateLimited {
                message,
                retry_after,
            } => EngineError::RateLimit {
                message,
                retry_after,
            },
            ApiError::Unauthorized(msg) => EngineError::Auth(msg),
            ApiError::Connectivity(msg) => EngineError::Connectivity(msg),
            ApiError::Rejected { status, message } => EngineError::Api { status, message },
            ApiError::InvalidResponse(msg) => EngineError::Api {
                status: 0,
                message: msg,
            },
        }
    }
}

/// Paginated listing plus create/update calls against one platform instance
#[async_trait]
pub trait ContentApi: Send + Sync {
    /// Records at `[offset, offset + limit)`; an empty page means the listing is exhausted
    async fn list(
        &self,
        content_type: ContentType,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Value>, ApiError>;

    /// Create an object and return its destination identifier
    async fn create(&self, content_type: ContentType, payload: &Value) -> Result<String, ApiError>;

    /// Update an existing object and return its destination identifier
    async fn update(
        &self,
        content_type: ContentType,
        id: &str,
        payload: &Value,
    ) -> Result<String, ApiError>;
}

/// Identifier in a JSON value, accepting strings and integers
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_conversion_preserves_kind() {
        let err: EngineError = ApiError::rate_limited("slow down").into();
        assert!(err.is_rate_limit());

        let err: EngineError = ApiError::Unauthorized("expired".into()).into();
        assert!(matches!(err, EngineError::Auth(_)));

        let err: EngineError = ApiError::Rejected {
            status: 404,
            message: "gone".into(),
        }
        .into();
        assert!(matches!(err, EngineError::Api { status: 404, .. }));
    }

    #[test]
    fn test_id_string() {
        assert_eq!(id_string(&json!("abc")), Some("abc".to_string()));
        assert_eq!(id_string(&json!(42)), Some("42".to_string()));
        assert_eq!(id_string(&json!("")), None);
        assert_eq!(id_string(&json!(null)), None);
        assert_eq!(id_string(&json!({"id": 1})), None);
    }
}
