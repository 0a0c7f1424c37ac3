use chrono::{DateTime, Utc};
use cv_common::ContentType;
use sqlx::sqlite::{SqliteConnection, SqlitePool};

use crate::coordinator::OffsetRange;
use crate::error::Result;
use crate::models::{DeadLetterEntry, NewDeadLetter};
use crate::restore::RESTORE_ERROR_TYPE;

const ENTRY_COLUMNS: &str = "id, session_id, content_type, source_id, range_offset, range_limit, \
                             error_type, error_message, payload, failed_at, resolved_at";

/// Selection for listing dead-letter entries
#[derive(Debug, Clone, Default)]
pub struct DeadLetterFilter {
    pub content_type: Option<ContentType>,
    pub session_id: Option<String>,
    pub include_resolved: bool,
    pub limit: Option<i64>,
}

pub struct DeadLetterRepo<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DeadLetterRepo<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, entry: &NewDeadLetter) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        insert_entry(&mut conn, entry, Utc::now()).await
    }

    pub async fn get(&self, id: i64) -> Result<Option<DeadLetterEntry>> {
        let entry = sqlx::query_as::<_, DeadLetterEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM dead_letter_entries WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(entry)
    }

    /// Oldest failures first
    pub async fn list(&self, filter: &DeadLetterFilter) -> Result<Vec<DeadLetterEntry>> {
        let entries = sqlx::query_as::<_, DeadLetterEntry>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS} FROM dead_letter_entries
            WHERE (?1 IS NULL OR content_type = ?1)
              AND (?2 IS NULL OR session_id = ?2)
              AND (?3 OR resolved_at IS NULL)
            ORDER BY id
            LIMIT ?4
            "#
        ))
        .bind(filter.content_type.map(ContentType::code))
        .bind(filter.session_id.as_deref())
        .bind(filter.include_resolved)
        .bind(filter.limit.unwrap_or(-1))
        .fetch_all(self.pool)
        .await?;

        Ok(entries)
    }

    pub async fn count(&self, content_type: Option<ContentType>, include_resolved: bool) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM dead_letter_entries
            WHERE (?1 IS NULL OR content_type = ?1) AND (?2 OR resolved_at IS NULL)
            "#,
        )
        .bind(content_type.map(ContentType::code))
        .bind(include_resolved)
        .fetch_one(self.pool)
        .await?;

        Ok(count)
    }

    /// Mark an entry as handled; returns false if it was missing or already resolved
    pub async fn mark_resolved(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE dead_letter_entries SET resolved_at = ?1 WHERE id = ?2 AND resolved_at IS NULL",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete resolved entries
    pub async fn purge_resolved(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM dead_letter_entries WHERE resolved_at IS NOT NULL")
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

pub(crate) async fn insert_entry(
    conn: &mut SqliteConnection,
    entry: &NewDeadLetter,
    failed_at: DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO dead_letter_entries (
            session_id, content_type, source_id, range_offset, range_limit,
            error_type, error_message, payload, failed_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(entry.session_id.as_deref())
    .bind(entry.content_type.code())
    .bind(entry.source_id.as_deref())
    .bind(entry.range.map(|(offset, _)| offset as i64))
    .bind(entry.range.map(|(_, limit)| limit as i64))
    .bind(&entry.error_type)
    .bind(&entry.error_message)
    .bind(entry.payload.as_deref())
    .bind(failed_at)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Resolve open extraction entries once the item has been captured.
/// Restoration failures stay open: capturing again does not replay them.
pub(crate) async fn resolve_item(
    conn: &mut SqliteConnection,
    content_type: ContentType,
    source_id: &str,
    resolved_at: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE dead_letter_entries SET resolved_at = ?1
        WHERE content_type = ?2 AND source_id = ?3 AND resolved_at IS NULL
          AND error_type <> ?4
        "#,
    )
    .bind(resolved_at)
    .bind(content_type.code())
    .bind(source_id)
    .bind(RESTORE_ERROR_TYPE)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Resolve open range-level entries for a window that has now been fetched
pub(crate) async fn resolve_range(
    conn: &mut SqliteConnection,
    content_type: ContentType,
    range: OffsetRange,
    resolved_at: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE dead_letter_entries SET resolved_at = ?1
        WHERE content_type = ?2 AND source_id IS NULL
          AND range_offset = ?3 AND range_limit = ?4 AND resolved_at IS NULL
        "#,
    )
    .bind(resolved_at)
    .bind(content_type.code())
    .bind(range.offset as i64)
    .bind(range.limit as i64)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}
