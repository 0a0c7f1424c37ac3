use chrono::{DateTime, Utc};
use cv_common::ContentType;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::Row;

use crate::error::Result;
use crate::models::{ContentItem, ContentStats};

const ITEM_COLUMNS: &str = "id, content_type, name, owner_id, owner_email, created_at, updated_at, \
                            synced_at, deleted_at, content_size, content_data";

/// Paging and visibility options for listing content
#[derive(Debug, Clone, Copy)]
pub struct ContentQuery {
    pub include_deleted: bool,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ContentQuery {
    fn default() -> Self {
        Self {
            include_deleted: false,
            limit: 1_000,
            offset: 0,
        }
    }
}

pub struct ContentRepo<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ContentRepo<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or overwrite one item in its own transaction
    pub async fn upsert(&self, item: &ContentItem) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_item(&mut tx, item).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, id: &str, content_type: ContentType) -> Result<Option<ContentItem>> {
        let item = sqlx::query_as::<_, ContentItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM content_items WHERE id = ?1 AND content_type = ?2"
        ))
        .bind(id)
        .bind(content_type.code())
        .fetch_optional(self.pool)
        .await?;

        Ok(item)
    }

    /// Items of one type ordered by identifier
    pub async fn list(
        &self,
        content_type: ContentType,
        query: ContentQuery,
    ) -> Result<Vec<ContentItem>> {
        let items = sqlx::query_as::<_, ContentItem>(&format!(
            r#"
            SELECT {ITEM_COLUMNS}
            FROM content_items
            WHERE content_type = ?1 AND (?2 OR deleted_at IS NULL)
            ORDER BY id
            LIMIT ?3 OFFSET ?4
            "#
        ))
        .bind(content_type.code())
        .bind(query.include_deleted)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(self.pool)
        .await?;

        Ok(items)
    }

    pub async fn count(&self, content_type: ContentType, include_deleted: bool) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM content_items
            WHERE content_type = ?1 AND (?2 OR deleted_at IS NULL)
            "#,
        )
        .bind(content_type.code())
        .bind(include_deleted)
        .fetch_one(self.pool)
        .await?;

        Ok(count)
    }

    /// Soft-delete one item; returns whether a live row was marked
    pub async fn soft_delete(&self, id: &str, content_type: ContentType) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE content_items SET deleted_at = ?1
            WHERE id = ?2 AND content_type = ?3 AND deleted_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .bind(content_type.code())
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete live items of a type that were not refreshed since `seen_before`
    pub async fn soft_delete_missing(
        &self,
        content_type: ContentType,
        seen_before: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE content_items SET deleted_at = ?1
            WHERE content_type = ?2 AND deleted_at IS NULL AND synced_at < ?3
            "#,
        )
        .bind(Utc::now())
        .bind(content_type.code())
        .bind(seen_before)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Most recent capture time among live items of a type
    pub async fn last_sync_timestamp(
        &self,
        content_type: ContentType,
    ) -> Result<Option<DateTime<Utc>>> {
        let last: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MAX(synced_at) FROM content_items WHERE content_type = ?1 AND deleted_at IS NULL",
        )
        .bind(content_type.code())
        .fetch_one(self.pool)
        .await?;

        Ok(last)
    }

    /// Totals for every type that has at least one row
    pub async fn stats(&self) -> Result<Vec<ContentStats>> {
        let rows = sqlx::query(
            r#"
            SELECT content_type,
                   SUM(CASE WHEN deleted_at IS NULL THEN 1 ELSE 0 END) AS active,
                   SUM(CASE WHEN deleted_at IS NULL THEN 0 ELSE 1 END) AS deleted,
                   SUM(content_size) AS total_bytes
            FROM content_items
            GROUP BY content_type
            ORDER BY content_type
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        let mut stats = Vec::with_capacity(rows.len());
        for row in rows {
            let content_type = ContentType::from_code(row.get::<i64, _>("content_type"))?;
            stats.push(ContentStats {
                content_type,
                active: row.get("active"),
                deleted: row.get("deleted"),
                total_bytes: row.get("total_bytes"),
                last_synced_at: self.last_sync_timestamp(content_type).await?,
            });
        }
        Ok(stats)
    }
}

/// Upsert keyed on `(id, content_type)`; a re-reported item is live again
pub(crate) async fn upsert_item(conn: &mut SqliteConnection, item: &ContentItem) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO content_items (
            id, content_type, name, owner_id, owner_email, created_at, updated_at,
            synced_at, deleted_at, content_size, content_data
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?10)
        ON CONFLICT(id, content_type) DO UPDATE SET
            name = excluded.name,
            owner_id = excluded.owner_id,
            owner_email = excluded.owner_email,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            synced_at = excluded.synced_at,
            deleted_at = NULL,
            content_size = excluded.content_size,
            content_data = excluded.content_data
        "#,
    )
    .bind(&item.id)
    .bind(item.content_type.code())
    .bind(&item.name)
    .bind(&item.owner_id)
    .bind(&item.owner_email)
    .bind(item.created_at)
    .bind(item.updated_at)
    .bind(item.synced_at)
    .bind(item.content_data.len() as i64)
    .bind(&item.content_data)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
