use chrono::Utc;
use cv_common::ContentType;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::types::Json;

use crate::error::{EngineError, Result};
use crate::models::{Checkpoint, CheckpointData, ContentItem};

const CHECKPOINT_COLUMNS: &str = "id, session_id, content_type, checkpoint_data, started_at, \
                                  completed_at, item_count, error_message";

pub struct CheckpointRepo<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CheckpointRepo<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a checkpoint; fails if the session already has an open one for the type
    pub async fn open(
        &self,
        session_id: Option<&str>,
        content_type: ContentType,
        data: &CheckpointData,
    ) -> Result<Checkpoint> {
        let result = sqlx::query(
            r#"
            INSERT INTO checkpoints (session_id, content_type, checkpoint_data, started_at, item_count)
            VALUES (?1, ?2, ?3, ?4, 0)
            "#,
        )
        .bind(session_id)
        .bind(content_type.code())
        .bind(Json(data))
        .bind(Utc::now())
        .execute(self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("checkpoint {id}")))
    }

    pub async fn get(&self, id: i64) -> Result<Option<Checkpoint>> {
        let checkpoint = sqlx::query_as::<_, Checkpoint>(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(checkpoint)
    }

    /// Newest unfinished checkpoint for a type, from any session
    pub async fn latest_incomplete(&self, content_type: ContentType) -> Result<Option<Checkpoint>> {
        let checkpoint = sqlx::query_as::<_, Checkpoint>(&format!(
            r#"
            SELECT {CHECKPOINT_COLUMNS} FROM checkpoints
            WHERE content_type = ?1 AND completed_at IS NULL
            ORDER BY started_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(content_type.code())
        .fetch_optional(self.pool)
        .await?;

        Ok(checkpoint)
    }

    /// Re-parent an unfinished checkpoint to a new session for resuming
    pub async fn adopt(&self, id: i64, session_id: &str) -> Result<Checkpoint> {
        let result = sqlx::query(
            r#"
            UPDATE checkpoints SET session_id = ?1, error_message = NULL
            WHERE id = ?2 AND completed_at IS NULL
            "#,
        )
        .bind(session_id)
        .bind(id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound(format!("open checkpoint {id}")));
        }
        self.get(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("checkpoint {id}")))
    }

    /// Store resume data; never moves `next_offset` backwards
    pub async fn advance(&self, id: i64, data: &CheckpointData) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE checkpoints SET checkpoint_data = ?1
            WHERE id = ?2
              AND completed_at IS NULL
              AND COALESCE(json_extract(checkpoint_data, '$.next_offset'), 0) <= ?3
            "#,
        )
        .bind(Json(data))
        .bind(id)
        .bind(data.next_offset as i64)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Durable signal that the content type finished in this session
    pub async fn complete(&self, id: i64, data: &CheckpointData) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE checkpoints SET completed_at = ?1, checkpoint_data = ?2, error_message = NULL
            WHERE id = ?3 AND completed_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(Json(data))
        .bind(id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound(format!("open checkpoint {id}")));
        }
        Ok(())
    }

    /// Record why a checkpoint stopped; it stays open so a later run can resume it
    pub async fn fail(&self, id: i64, message: &str) -> Result<()> {
        sqlx::query("UPDATE checkpoints SET error_message = ?1 WHERE id = ?2")
            .bind(message)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<Checkpoint>> {
        let checkpoints = sqlx::query_as::<_, Checkpoint>(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints WHERE session_id = ?1 ORDER BY id"
        ))
        .bind(session_id)
        .fetch_all(self.pool)
        .await?;

        Ok(checkpoints)
    }
}

/// Whether the item was already captured since the checkpoint opened
pub(crate) async fn holds_item(
    conn: &mut SqliteConnection,
    id: i64,
    item: &ContentItem,
) -> Result<bool> {
    let held: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT 1 FROM content_items c
        JOIN checkpoints k ON k.id = ?1
        WHERE c.id = ?2 AND c.content_type = ?3 AND c.synced_at >= k.started_at
        "#,
    )
    .bind(id)
    .bind(&item.id)
    .bind(item.content_type.code())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(held.is_some())
}

pub(crate) async fn add_items(conn: &mut SqliteConnection, id: i64, delta: i64) -> Result<()> {
    let result = sqlx::query("UPDATE checkpoints SET item_count = item_count + ?1 WHERE id = ?2")
        .bind(delta)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(EngineError::NotFound(format!("checkpoint {id}")));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::Store;
    use serde_json::json;

    async fn session(store: &Store) -> String {
        store.sessions().create(&json!({}), &json!({})).await.unwrap().id
    }

    #[tokio::test]
    async fn test_one_open_checkpoint_per_session_and_type() {
        let store = Store::open_in_memory().await.unwrap();
        let session_id = session(&store).await;
        let repo = store.checkpoints();
        let data = CheckpointData::fresh(100);

        let first = repo.open(Some(&session_id), ContentType::Model, &data).await.unwrap();
        assert!(repo.open(Some(&session_id), ContentType::Model, &data).await.is_err());
        // Other types are independent
        repo.open(Some(&session_id), ContentType::Folder, &data).await.unwrap();

        // Once completed, a new one may open
        repo.complete(first.id, &data).await.unwrap();
        repo.open(Some(&session_id), ContentType::Model, &data).await.unwrap();

        assert_eq!(repo.list_for_session(&session_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_advance_is_monotonic() {
        let store = Store::open_in_memory().await.unwrap();
        let session_id = session(&store).await;
        let repo = store.checkpoints();
        let checkpoint = repo
            .open(Some(&session_id), ContentType::User, &CheckpointData::fresh(10))
            .await
            .unwrap();

        let ahead = CheckpointData { stride: 10, next_offset: 50, ranges_completed: 5 };
        let behind = CheckpointData { stride: 10, next_offset: 30, ranges_completed: 3 };
        assert!(repo.advance(checkpoint.id, &ahead).await.unwrap());
        assert!(!repo.advance(checkpoint.id, &behind).await.unwrap());

        let stored = repo.get(checkpoint.id).await.unwrap().unwrap();
        assert_eq!(stored.data().unwrap(), ahead);
    }

    #[tokio::test]
    async fn test_latest_incomplete_and_adopt() {
        let store = Store::open_in_memory().await.unwrap();
        let old_session = session(&store).await;
        let new_session = session(&store).await;
        let repo = store.checkpoints();

        let open = repo
            .open(Some(&old_session), ContentType::Dashboard, &CheckpointData::fresh(10))
            .await
            .unwrap();
        repo.fail(open.id, "connection reset").await.unwrap();

        let found = repo.latest_incomplete(ContentType::Dashboard).await.unwrap().unwrap();
        assert_eq!(found.id, open.id);
        assert_eq!(found.error_message.as_deref(), Some("connection reset"));
        assert!(repo.latest_incomplete(ContentType::Model).await.unwrap().is_none());

        let adopted = repo.adopt(open.id, &new_session).await.unwrap();
        assert_eq!(adopted.session_id.as_deref(), Some(new_session.as_str()));
        assert!(adopted.error_message.is_none());

        repo.complete(open.id, &CheckpointData::fresh(10)).await.unwrap();
        assert!(repo.latest_incomplete(ContentType::Dashboard).await.unwrap().is_none());
        assert!(repo.adopt(open.id, &old_session).await.is_err());
        assert!(repo.complete(open.id, &CheckpointData::fresh(10)).await.is_err());
    }
}
