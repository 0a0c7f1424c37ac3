use chrono::Utc;
use cv_common::{CvError, SessionStatus};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::ExtractionSession;

const SESSION_COLUMNS: &str = "id, started_at, completed_at, status, total_items, error_count, \
                               config_snapshot, metadata, error_message";

pub struct SessionRepo<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SessionRepo<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a pending session with a fresh identifier
    pub async fn create(&self, config_snapshot: &Value, metadata: &Value) -> Result<ExtractionSession> {
        let session = ExtractionSession {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            completed_at: None,
            status: SessionStatus::Pending,
            total_items: 0,
            error_count: 0,
            config_snapshot: config_snapshot.clone(),
            metadata: metadata.clone(),
            error_message: None,
        };

        sqlx::query(
            r#"
            INSERT INTO extraction_sessions (
                id, started_at, status, total_items, error_count, config_snapshot, metadata
            )
            VALUES (?1, ?2, ?3, 0, 0, ?4, ?5)
            "#,
        )
        .bind(&session.id)
        .bind(session.started_at)
        .bind(session.status.as_str())
        .bind(sqlx::types::Json(&session.config_snapshot))
        .bind(sqlx::types::Json(&session.metadata))
        .execute(self.pool)
        .await?;

        Ok(session)
    }

    pub async fn start(&self, id: &str) -> Result<()> {
        self.transition(id, SessionStatus::Running, None).await
    }

    /// Move a session into a terminal state
    pub async fn finish(&self, id: &str, status: SessionStatus, error: Option<&str>) -> Result<()> {
        if !status.is_terminal() {
            return Err(CvError::InvalidTransition {
                from: "any".to_string(),
                to: status.as_str().to_string(),
            }
            .into());
        }
        self.transition(id, status, error).await
    }

    async fn transition(&self, id: &str, next: SessionStatus, error: Option<&str>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM extraction_sessions WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let current: SessionStatus = current
            .ok_or_else(|| EngineError::NotFound(format!("session {id}")))?
            .parse()?;

        if !current.can_transition_to(next) {
            return Err(CvError::InvalidTransition {
                from: current.as_str().to_string(),
                to: next.as_str().to_string(),
            }
            .into());
        }

        let completed_at = next.is_terminal().then(Utc::now);
        sqlx::query(
            r#"
            UPDATE extraction_sessions
            SET status = ?1,
                completed_at = COALESCE(?2, completed_at),
                error_message = COALESCE(?3, error_message)
            WHERE id = ?4
            "#,
        )
        .bind(next.as_str())
        .bind(completed_at)
        .bind(error)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<ExtractionSession>> {
        let session = sqlx::query_as::<_, ExtractionSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM extraction_sessions WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(session)
    }

    /// Most recent sessions first
    pub async fn list(&self, limit: i64) -> Result<Vec<ExtractionSession>> {
        let sessions = sqlx::query_as::<_, ExtractionSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM extraction_sessions ORDER BY started_at DESC LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(sessions)
    }

    pub async fn increment_counters(&self, id: &str, items: i64, errors: i64) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        add_counters(&mut conn, id, items, errors).await
    }

    pub async fn set_metadata(&self, id: &str, metadata: &Value) -> Result<()> {
        let result = sqlx::query("UPDATE extraction_sessions SET metadata = ?1 WHERE id = ?2")
            .bind(sqlx::types::Json(metadata))
            .bind(id)
            .execute(self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound(format!("session {id}")));
        }
        Ok(())
    }
}

pub(crate) async fn add_counters(
    conn: &mut SqliteConnection,
    id: &str,
    items: i64,
    errors: i64,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE extraction_sessions
        SET total_items = total_items + ?1, error_count = error_count + ?2
        WHERE id = ?3
        "#,
    )
    .bind(items)
    .bind(errors)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(EngineError::NotFound(format!("session {id}")));
    }
    Ok(())
}
