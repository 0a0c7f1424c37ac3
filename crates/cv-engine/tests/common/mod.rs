//! Shared fixtures for engine integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use cv_common::ContentType;
use cv_engine::config::EngineConfig;
use cv_engine::models::ContentItem;
use cv_engine::progress::{ProgressReporter, ProgressUpdate};
use cv_engine::retry::RetryTiming;
use cv_engine::{ApiError, ContentApi, Store};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// In-memory platform with scripted failures
#[derive(Default)]
pub struct ScriptedApi {
    records: Mutex<HashMap<ContentType, Vec<Value>>>,
    list_failures: Mutex<HashMap<(ContentType, u64), VecDeque<ApiError>>>,
    rejected_creates: Mutex<HashSet<ContentType>>,
    list_calls: Mutex<Vec<(ContentType, u64, u64)>>,
    created: Mutex<Vec<(ContentType, Value)>>,
    updated: Mutex<Vec<(ContentType, String, Value)>>,
    next_id: AtomicU64,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` plain records with integer ids `0..count`
    pub fn with_items(self, content_type: ContentType, count: u64) -> Self {
        let records = (0..count)
            .map(|i| json!({"id": i, "name": format!("{content_type} {i}")}))
            .collect();
        self.set_records(content_type, records);
        self
    }

    pub fn with_records(self, content_type: ContentType, records: Vec<Value>) -> Self {
        self.set_records(content_type, records);
        self
    }

    pub fn set_records(&self, content_type: ContentType, records: Vec<Value>) {
        self.records.lock().unwrap().insert(content_type, records);
    }

    /// Fail the listing at `offset` with each error in turn, then serve it normally
    pub fn fail_list(&self, content_type: ContentType, offset: u64, errors: Vec<ApiError>) {
        self.list_failures
            .lock()
            .unwrap()
            .insert((content_type, offset), errors.into());
    }

    pub fn reject_creates(&self, content_type: ContentType) {
        self.rejected_creates.lock().unwrap().insert(content_type);
    }

    pub fn list_calls(&self) -> Vec<(ContentType, u64, u64)> {
        self.list_calls.lock().unwrap().clone()
    }

    pub fn list_calls_at(&self, content_type: ContentType, offset: u64) -> usize {
        self.list_calls()
            .iter()
            .filter(|(t, o, _)| *t == content_type && *o == offset)
            .count()
    }

    pub fn created(&self) -> Vec<(ContentType, Value)> {
        self.created.lock().unwrap().clone()
    }

    pub fn updated(&self) -> Vec<(ContentType, String, Value)> {
        self.updated.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentApi for ScriptedApi {
    async fn list(
        &self,
        content_type: ContentType,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Value>, ApiError> {
        self.list_calls
            .lock()
            .unwrap()
            .push((content_type, offset, limit));

        if let Some(queue) = self
            .list_failures
            .lock()
            .unwrap()
            .get_mut(&(content_type, offset))
        {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }

        let records = self.records.lock().unwrap();
        let page = records
            .get(&content_type)
            .map(|all| {
                all.iter()
                    .skip(offset as usize)
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(page)
    }

    async fn create(&self, content_type: ContentType, payload: &Value) -> Result<String, ApiError> {
        if self.rejected_creates.lock().unwrap().contains(&content_type) {
            return Err(ApiError::Rejected {
                status: 422,
                message: "validation failed".into(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.created
            .lock()
            .unwrap()
            .push((content_type, payload.clone()));
        Ok(format!("dest-{id}"))
    }

    async fn update(
        &self,
        content_type: ContentType,
        id: &str,
        payload: &Value,
    ) -> Result<String, ApiError> {
        self.updated
            .lock()
            .unwrap()
            .push((content_type, id.to_string(), payload.clone()));
        Ok(id.to_string())
    }
}

/// Engine settings for tests: accelerated backoff, selected types only
pub fn test_config(content_types: &[ContentType], workers: usize, stride: u64) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.extraction.content_types = content_types.to_vec();
    config.extraction.workers = workers;
    config.extraction.stride = stride;
    config.extraction.batch_size = 16;
    config.retry.timing = RetryTiming::Accelerated;
    config
}

pub async fn memory_store() -> Store {
    Store::open_in_memory().await.unwrap()
}

/// Store one captured item with the given payload
pub async fn seed_item(store: &Store, content_type: ContentType, payload: Value) {
    let id = cv_engine::api::id_string(&payload["id"]).unwrap();
    let bytes = cv_common::codec::serialize(&payload).unwrap();
    let item = ContentItem::new(id, content_type, "", bytes);
    store.content().upsert(&item).await.unwrap();
}

/// Cancels the run on the first progress report
pub struct CancelOnFirstBatch {
    pub token: CancellationToken,
}

impl ProgressReporter for CancelOnFirstBatch {
    fn report(&self, _update: &ProgressUpdate) {
        self.token.cancel();
    }
}
