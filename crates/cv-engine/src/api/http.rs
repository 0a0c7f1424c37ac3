//! HTTP implementation of [`ContentApi`]

use async_trait::async_trait;
use cv_common::ContentType;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{endpoints, id_string, ApiError, ContentApi};
use crate::config::ApiConfig;
use crate::error::{EngineError, Result};

/// JSON REST client with bearer-token auth
#[derive(Debug, Clone)]
pub struct HttpContentApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpContentApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            token,
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::new(
            config.base_url.clone(),
            config.token.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> std::result::Result<Value, ApiError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ApiError::Connectivity(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_for_status(response).await);
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

async fn error_for_status(response: Response) -> ApiError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        status.to_string()
    } else {
        body
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited {
            message,
            retry_after,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized(message),
        _ => ApiError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

/// A page is either a bare array or an envelope with a `data` array
fn page_records(body: Value) -> std::result::Result<Vec<Value>, ApiError> {
    match body {
        Value::Array(records) => Ok(records),
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(records)) => Ok(records),
            _ => Err(ApiError::InvalidResponse("expected an array of records".to_string())),
        },
        _ => Err(ApiError::InvalidResponse("expected an array of records".to_string())),
    }
}

fn destination_id(body: &Value) -> std::result::Result<String, ApiError> {
    body.get("id")
        .or_else(|| body.get("data").and_then(|d| d.get("id")))
        .and_then(id_string)
        .ok_or_else(|| ApiError::InvalidResponse("response carries no id".to_string()))
}

#[async_trait]
impl ContentApi for HttpContentApi {
    async fn list(
        &self,
        content_type: ContentType,
        offset: u64,
        limit: u64,
    ) -> std::result::Result<Vec<Value>, ApiError> {
        let url = endpoints::list_url(&self.base_url, content_type, offset, limit);
        debug!(%url, "Listing content");
        let body = self.send(self.client.get(&url)).await?;
        page_records(body)
    }

    async fn create(
        &self,
        content_type: ContentType,
        payload: &Value,
    ) -> std::result::Result<String, ApiError> {
        let url = endpoints::collection_url(&self.base_url, content_type);
        let body = self.send(self.client.post(&url).json(payload)).await?;
        destination_id(&body)
    }

    async fn update(
        &self,
        content_type: ContentType,
        id: &str,
        payload: &Value,
    ) -> std::result::Result<String, ApiError> {
        let url = endpoints::item_url(&self.base_url, content_type, id);
        let body = self.send(self.client.patch(&url).json(payload)).await?;
        // Some endpoints answer updates with an empty object
        Ok(destination_id(&body).unwrap_or_else(|_| id.to_string()))
    }
}
