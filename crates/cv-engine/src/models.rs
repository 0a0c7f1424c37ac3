//! Persisted entities (map to the store's tables)

use chrono::{DateTime, Utc};
use cv_common::{ContentType, SessionStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};

/// One captured platform object (maps to `content_items`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContentItem {
    /// Source-platform identifier
    pub id: String,
    #[sqlx(try_from = "i64")]
    pub content_type: ContentType,
    pub name: String,
    pub owner_id: Option<String>,
    pub owner_email: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Local capture time
    pub synced_at: DateTime<Utc>,
    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
    pub content_size: i64,
    /// Codec-encoded payload
    #[serde(skip)]
    pub content_data: Vec<u8>,
}

impl ContentItem {
    /// New item captured now; `content_size` follows the payload length
    pub fn new(
        id: impl Into<String>,
        content_type: ContentType,
        name: impl Into<String>,
        content_data: Vec<u8>,
    ) -> Self {
        Self {
            id: id.into(),
            content_type,
            name: name.into(),
            owner_id: None,
            owner_email: None,
            created_at: None,
            updated_at: None,
            synced_at: Utc::now(),
            deleted_at: None,
            content_size: content_data.len() as i64,
            content_data,
        }
    }

    pub fn with_owner(mut self, owner_id: Option<String>, owner_email: Option<String>) -> Self {
        self.owner_id = owner_id;
        self.owner_email = owner_email;
        self
    }

    pub fn with_timestamps(
        mut self,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_at = created_at;
        self.updated_at = updated_at;
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Decode the stored payload
    pub fn payload(&self) -> Result<Value> {
        Ok(cv_common::codec::deserialize(&self.content_data)?)
    }
}

/// One orchestrator run (maps to `extraction_sessions`)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExtractionSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[sqlx(try_from = "String")]
    pub status: SessionStatus,
    pub total_items: i64,
    pub error_count: i64,
    #[sqlx(json)]
    pub config_snapshot: Value,
    #[sqlx(json)]
    pub metadata: Value,
    pub error_message: Option<String>,
}

/// Per-content-type resume marker (maps to `checkpoints`)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Checkpoint {
    pub id: i64,
    pub session_id: Option<String>,
    #[sqlx(try_from = "i64")]
    pub content_type: ContentType,
    #[sqlx(json)]
    pub checkpoint_data: Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub item_count: i64,
    pub error_message: Option<String>,
}

impl Checkpoint {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Typed view of `checkpoint_data`
    pub fn data(&self) -> Result<CheckpointData> {
        serde_json::from_value(self.checkpoint_data.clone())
            .map_err(|e| EngineError::serialization(format!("checkpoint {}: {}", self.id, e)))
    }
}

/// Resume state stored in a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CheckpointData {
    pub stride: u64,
    /// Every range below this offset has been persisted
    pub next_offset: u64,
    pub ranges_completed: u64,
}

impl CheckpointData {
    pub fn fresh(stride: u64) -> Self {
        Self {
            stride,
            next_offset: 0,
            ranges_completed: 0,
        }
    }

    pub fn to_value(self) -> Value {
        serde_json::json!({
            "stride": self.stride,
            "next_offset": self.next_offset,
            "ranges_completed": self.ranges_completed,
        })
    }
}

/// Permanently failed item or offset range (maps to `dead_letter_entries`)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeadLetterEntry {
    pub id: i64,
    pub session_id: Option<String>,
    #[sqlx(try_from = "i64")]
    pub content_type: ContentType,
    pub source_id: Option<String>,
    pub range_offset: Option<i64>,
    pub range_limit: Option<i64>,
    pub error_type: String,
    pub error_message: String,
    #[serde(skip)]
    pub payload: Option<Vec<u8>>,
    pub failed_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl DeadLetterEntry {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Insert form of a dead-letter entry
#[derive(Debug, Clone, PartialEq)]
pub struct NewDeadLetter {
    pub session_id: Option<String>,
    pub content_type: ContentType,
    pub source_id: Option<String>,
    pub range: Option<(u64, u64)>,
    pub error_type: String,
    pub error_message: String,
    pub payload: Option<Vec<u8>>,
}

impl NewDeadLetter {
    /// A single record that could not be captured
    pub fn for_item(
        session_id: Option<&str>,
        content_type: ContentType,
        source_id: Option<String>,
        error: &EngineError,
        payload: Option<Vec<u8>>,
    ) -> Self {
        Self {
            session_id: session_id.map(str::to_string),
            content_type,
            source_id,
            range: None,
            error_type: error.kind().to_string(),
            error_message: error.to_string(),
            payload,
        }
    }

    /// A whole offset window that could not be fetched or processed
    pub fn for_range(
        session_id: Option<&str>,
        content_type: ContentType,
        offset: u64,
        limit: u64,
        error: &EngineError,
    ) -> Self {
        Self {
            session_id: session_id.map(str::to_string),
            content_type,
            source_id: None,
            range: Some((offset, limit)),
            error_type: error.kind().to_string(),
            error_message: error.to_string(),
            payload: None,
        }
    }
}

/// Source-to-destination identifier translation (maps to `id_mappings`)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdMapping {
    pub source_instance: String,
    #[sqlx(try_from = "i64")]
    pub content_type: ContentType,
    pub source_id: String,
    pub destination_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-type item totals for `content_stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentStats {
    pub content_type: ContentType,
    pub active: i64,
    pub deleted: i64,
    pub total_bytes: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_item_derives_size() {
        let bytes = cv_common::codec::serialize(&json!({"id": "1"})).unwrap();
        let item = ContentItem::new("1", ContentType::Dashboard, "Revenue", bytes.clone());
        assert_eq!(item.content_size, bytes.len() as i64);
        assert!(!item.is_deleted());
        assert_eq!(item.payload().unwrap(), json!({"id": "1"}));
    }

    #[test]
    fn test_checkpoint_data_value() {
        let data = CheckpointData {
            stride: 100,
            next_offset: 300,
            ranges_completed: 3,
        };
        let parsed: CheckpointData = serde_json::from_value(data.to_value()).unwrap();
        assert_eq!(parsed, data);
    }
}
