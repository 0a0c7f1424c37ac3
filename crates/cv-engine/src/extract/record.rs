//! Decoding of raw listing records into [`ContentItem`]s

use chrono::{DateTime, Utc};
use cv_common::ContentType;
use serde_json::Value;

use crate::api::id_string;
use crate::error::{EngineError, Result};
use crate::models::ContentItem;

/// Turn one listing record into a storable item. Failures are item-scoped.
pub fn decode_record(content_type: ContentType, record: &Value) -> Result<ContentItem> {
    let Value::Object(fields) = record else {
        return Err(EngineError::serialization(format!(
            "{content_type} record is not an object"
        )));
    };

    let id = fields
        .get("id")
        .and_then(id_string)
        .ok_or_else(|| EngineError::serialization(format!("{content_type} record has no id")))?;

    let name = fields
        .get("name")
        .or_else(|| fields.get("title"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let owner_id = fields
        .get("owner_id")
        .or_else(|| fields.get("user_id"))
        .and_then(id_string);
    let owner_email = fields
        .get("owner_email")
        .or_else(|| fields.get("user_email"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let created_at = timestamp(fields.get("created_at"), "created_at", &id)?;
    let updated_at = timestamp(fields.get("updated_at"), "updated_at", &id)?;

    let content_data = cv_common::codec::serialize(record)?;

    Ok(ContentItem::new(id, content_type, name, content_data)
        .with_owner(owner_id, owner_email)
        .with_timestamps(created_at, updated_at))
}

/// Source identifier of a record, if it has a usable one
pub fn record_id(record: &Value) -> Option<String> {
    record.get("id").and_then(id_string)
}

fn timestamp(value: Option<&Value>, field: &str, id: &str) -> Result<Option<DateTime<Utc>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => DateTime::parse_from_rfc3339(raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| EngineError::serialization(format!("{field} of {id}: {e}"))),
        Some(other) => Err(EngineError::serialization(format!(
            "{field} of {id} is not a timestamp: {other}"
        ))),
    }
}
