//! Engine configuration
//!
//! Layered as: built-in defaults, then an optional TOML file, then `CV_*`
//! environment variables (a `.env` file is honoured), then [`EngineConfig::validate`].
//!
//! ```toml
//! [database]
//! path = "vault.db"
//!
//! [extraction]
//! workers = 8
//! stride = 100
//! content_types = ["model", "dashboard"]
//!
//! [retry.rate_limit]
//! max_attempts = 5
//!
//! [api]
//! base_url = "https://platform.example.com/api/4.0"
//! source_instance = "prod"
//! ```

use cv_common::ContentType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{EngineError, Result};
use crate::retry::{RetryPolicy, RetrySettings, RetryTiming};

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_DATABASE_PATH: &str = "contentvault.db";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;
pub const DEFAULT_WORKERS: usize = 8;
pub const MAX_WORKERS: usize = 64;
pub const DEFAULT_STRIDE: u64 = 100;
pub const DEFAULT_BATCH_SIZE: usize = crate::batch::DEFAULT_BATCH_SIZE;
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 1;
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:19999/api/4.0";
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SOURCE_INSTANCE: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub extraction: ExtractionConfig,
    pub retry: RetryConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DATABASE_PATH),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Concurrent workers per content type
    pub workers: usize,
    /// Page width claimed per range
    pub stride: u64,
    /// Items persisted per transaction
    pub batch_size: usize,
    /// Persist resume data every N completed ranges
    pub checkpoint_interval: u64,
    /// Adopt the latest unfinished checkpoint instead of starting at offset 0
    pub resume: bool,
    /// Soft-delete items the source no longer reports
    pub sweep_deleted: bool,
    pub content_types: Vec<ContentType>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            stride: DEFAULT_STRIDE,
            batch_size: DEFAULT_BATCH_SIZE,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            resume: false,
            sweep_deleted: true,
            content_types: ContentType::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub rate_limit: RetrySettings,
    pub network: RetrySettings,
    pub timing: RetryTiming,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            rate_limit: RetrySettings::rate_limit(),
            network: RetrySettings::network(),
            timing: RetryTiming::Production,
        }
    }
}

impl RetryConfig {
    pub fn rate_limit_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.rate_limit).with_timing(self.timing)
    }

    pub fn network_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.network).with_timing(self.timing)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Bearer token; never written into session snapshots
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub timeout_secs: u64,
    /// Label identifying the platform instance content was extracted from
    pub source_instance: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            token: None,
            timeout_secs: DEFAULT_API_TIMEOUT_SECS,
            source_instance: DEFAULT_SOURCE_INSTANCE.to_string(),
        }
    }
}

impl EngineConfig {
    /// Defaults, optional file, `.env` and environment, validated
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        let config = config.merge_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| EngineError::config(format!("Invalid config: {e}")))
    }

    /// Apply `CV_*` environment overrides
    pub fn merge_env(mut self) -> Result<Self> {
        if let Ok(path) = std::env::var("CV_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(ms) = env_parse("CV_DATABASE_BUSY_TIMEOUT_MS")? {
            self.database.busy_timeout_ms = ms;
        }
        if let Some(n) = env_parse("CV_DATABASE_MAX_CONNECTIONS")? {
            self.database.max_connections = n;
        }
        if let Some(n) = env_parse("CV_WORKERS")? {
            self.extraction.workers = n;
        }
        if let Some(n) = env_parse("CV_STRIDE")? {
            self.extraction.stride = n;
        }
        if let Some(n) = env_parse("CV_BATCH_SIZE")? {
            self.extraction.batch_size = n;
        }
        if let Some(n) = env_parse("CV_CHECKPOINT_INTERVAL")? {
            self.extraction.checkpoint_interval = n;
        }
        if let Some(flag) = env_parse("CV_RESUME")? {
            self.extraction.resume = flag;
        }
        if let Some(flag) = env_parse("CV_SWEEP_DELETED")? {
            self.extraction.sweep_deleted = flag;
        }
        if let Ok(types) = std::env::var("CV_CONTENT_TYPES") {
            self.extraction.content_types = parse_content_types(&types)?;
        }
        if let Some(n) = env_parse("CV_RETRY_MAX_ATTEMPTS")? {
            self.retry.rate_limit.max_attempts = n;
        }
        if let Ok(timing) = std::env::var("CV_RETRY_TIMING") {
            self.retry.timing = match timing.to_lowercase().as_str() {
                "production" => RetryTiming::Production,
                "accelerated" => RetryTiming::Accelerated,
                other => {
                    return Err(EngineError::config(format!("Invalid CV_RETRY_TIMING: {other}")))
                },
            };
        }
        if let Ok(url) = std::env::var("CV_API_BASE_URL") {
            self.api.base_url = url;
        }
        if let Ok(token) = std::env::var("CV_API_TOKEN") {
            self.api.token = Some(token);
        }
        if let Some(secs) = env_parse("CV_API_TIMEOUT_SECS")? {
            self.api.timeout_secs = secs;
        }
        if let Ok(instance) = std::env::var("CV_SOURCE_INSTANCE") {
            self.api.source_instance = instance;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let extraction = &self.extraction;
        if extraction.workers == 0 || extraction.workers > MAX_WORKERS {
            return Err(EngineError::config(format!(
                "workers must be between 1 and {MAX_WORKERS}, got {}",
                extraction.workers
            )));
        }
        if extraction.stride == 0 {
            return Err(EngineError::config("stride must be at least 1"));
        }
        if extraction.batch_size == 0 {
            return Err(EngineError::config("batch_size must be at least 1"));
        }
        if extraction.checkpoint_interval == 0 {
            return Err(EngineError::config("checkpoint_interval must be at least 1"));
        }
        if extraction.content_types.is_empty() {
            return Err(EngineError::config("content_types must not be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(EngineError::config("max_connections must be at least 1"));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(EngineError::config("api.base_url must not be empty"));
        }
        if self.api.source_instance.trim().is_empty() {
            return Err(EngineError::config("api.source_instance must not be empty"));
        }
        self.retry
            .rate_limit
            .validate()
            .map_err(|e| EngineError::config(format!("retry.rate_limit: {e}")))?;
        self.retry
            .network
            .validate()
            .map_err(|e| EngineError::config(format!("retry.network: {e}")))?;
        Ok(())
    }

    /// Serializable view recorded with each session (secrets omitted)
    pub fn snapshot(&self) -> Value {
        serde_json::json!({
            "extraction": &self.extraction,
            "retry": &self.retry,
            "api": {
                "base_url": &self.api.base_url,
                "source_instance": &self.api.source_instance,
            },
        })
    }
}

/// Comma-separated content type names or codes
pub fn parse_content_types(raw: &str) -> Result<Vec<ContentType>> {
    let mut types = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let content_type =
            ContentType::from_str(part).map_err(|e| EngineError::config(e.to_string()))?;
        if !types.contains(&content_type) {
            types.push(content_type);
        }
    }
    Ok(types)
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| EngineError::config(format!("Invalid {key}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}
