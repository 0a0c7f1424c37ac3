//! Durable store backed by SQLite
//!
//! One [`Store`] owns the connection pool. Each table family lives in its own
//! module with a small repository type borrowed from the store:
//!
//! - [`ContentRepo`]: captured content items
//! - [`SessionRepo`]: extraction sessions
//! - [`CheckpointRepo`]: per-content-type resume markers
//! - [`DeadLetterRepo`]: permanently failed items and ranges
//! - [`MappingRepo`]: source-to-destination identifier mappings
//!
//! Work that must land atomically (a fetched batch plus its checkpoint
//! progress) goes through [`Store::persist_batch`], which runs every
//! statement inside one transaction.

mod checkpoints;
mod content;
mod dead_letter;
mod mappings;
mod sessions;

pub use checkpoints::CheckpointRepo;
pub use content::{ContentQuery, ContentRepo};
pub use dead_letter::{DeadLetterFilter, DeadLetterRepo};
pub use mappings::MappingRepo;
pub use sessions::SessionRepo;

use chrono::Utc;
use cv_common::ContentType;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::coordinator::OffsetRange;
use crate::error::{EngineError, Result};
use crate::models::{ContentItem, NewDeadLetter};

/// Highest schema version this build understands
pub const SUPPORTED_SCHEMA_VERSION: i64 = 1;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Everything written for one chunk of a fetched page
#[derive(Debug, Clone, Copy)]
pub struct BatchWrite<'a> {
    pub session_id: &'a str,
    pub content_type: ContentType,
    pub checkpoint_id: i64,
    pub items: &'a [ContentItem],
    pub dead_letters: &'a [NewDeadLetter],
    /// Set on the last chunk of a range; resolves earlier failures of that range
    pub completed_range: Option<OffsetRange>,
}

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the store file, then check and migrate the schema
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        info!(path = %config.path.display(), "Opened content store");
        Self::from_pool(pool).await
    }

    /// Private in-memory store on a single connection
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let found = read_schema_version(&pool).await?;
        if found > SUPPORTED_SCHEMA_VERSION {
            return Err(EngineError::SchemaTooNew {
                found,
                supported: SUPPORTED_SCHEMA_VERSION,
            });
        }

        MIGRATOR.run(&pool).await?;
        debug!(previous_version = found, "Store schema up to date");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn content(&self) -> ContentRepo<'_> {
        ContentRepo::new(&self.pool)
    }

    pub fn sessions(&self) -> SessionRepo<'_> {
        SessionRepo::new(&self.pool)
    }

    pub fn checkpoints(&self) -> CheckpointRepo<'_> {
        CheckpointRepo::new(&self.pool)
    }

    pub fn dead_letters(&self) -> DeadLetterRepo<'_> {
        DeadLetterRepo::new(&self.pool)
    }

    pub fn mappings(&self) -> MappingRepo<'_> {
        MappingRepo::new(&self.pool)
    }

    pub async fn schema_version(&self) -> Result<i64> {
        read_schema_version(&self.pool).await
    }

    /// Let SQLite refresh its planner statistics
    pub async fn optimize(&self) -> Result<()> {
        sqlx::query("PRAGMA optimize").execute(&self.pool).await?;
        Ok(())
    }

    /// Persist one chunk and advance its checkpoint and session counters
    /// in a single transaction
    pub async fn persist_batch(&self, batch: BatchWrite<'_>) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // Items re-fetched after a crash are already held by the checkpoint
        let mut captured = 0;
        for item in batch.items {
            if !checkpoints::holds_item(&mut tx, batch.checkpoint_id, item).await? {
                captured += 1;
            }
            content::upsert_item(&mut tx, item).await?;
            dead_letter::resolve_item(&mut tx, item.content_type, &item.id, now).await?;
        }

        for entry in batch.dead_letters {
            dead_letter::insert_entry(&mut tx, entry, now).await?;
        }

        if let Some(range) = batch.completed_range {
            dead_letter::resolve_range(&mut tx, batch.content_type, range, now).await?;
        }

        checkpoints::add_items(&mut tx, batch.checkpoint_id, captured).await?;
        sessions::add_counters(
            &mut tx,
            batch.session_id,
            batch.items.len() as i64,
            batch.dead_letters.len() as i64,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn read_schema_version(pool: &SqlitePool) -> Result<i64> {
    let exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
    )
    .fetch_one(pool)
    .await?;

    if exists == 0 {
        return Ok(0);
    }

    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::CheckpointData;
    use serde_json::json;
    use tempfile::TempDir;

    pub(crate) fn item(id: &str, content_type: ContentType) -> ContentItem {
        let bytes = cv_common::codec::serialize(&json!({"id": id, "title": id})).unwrap();
        ContentItem::new(id, content_type, id, bytes)
    }

    #[tokio::test]
    async fn test_open_file_store_sets_schema_version() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("nested/vault.db"),
            ..DatabaseConfig::default()
        };

        let store = Store::open(&config).await.unwrap();
        assert_eq!(store.schema_version().await.unwrap(), SUPPORTED_SCHEMA_VERSION);
        store.optimize().await.unwrap();
        store.close().await;

        // Reopening an existing store is a no-op migration
        let store = Store::open(&config).await.unwrap();
        assert_eq!(store.schema_version().await.unwrap(), SUPPORTED_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_newer_schema_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("vault.db"),
            ..DatabaseConfig::default()
        };

        let store = Store::open(&config).await.unwrap();
        sqlx::query("INSERT INTO schema_version (version) VALUES (99)")
            .execute(store.pool())
            .await
            .unwrap();
        store.close().await;

        let err = Store::open(&config).await.unwrap_err();
        assert!(matches!(err, EngineError::SchemaTooNew { found: 99, .. }));
    }

    #[tokio::test]
    async fn test_persist_batch_is_atomic_unit() {
        let store = Store::open_in_memory().await.unwrap();
        let session = store.sessions().create(&json!({}), &json!({})).await.unwrap();
        let checkpoint = store
            .checkpoints()
            .open(Some(&session.id), ContentType::Model, &CheckpointData::fresh(10))
            .await
            .unwrap();

        let items = vec![item("1", ContentType::Model), item("2", ContentType::Model)];
        let failed = NewDeadLetter::for_item(
            Some(&session.id),
            ContentType::Model,
            Some("3".into()),
            &EngineError::serialization("missing id"),
            None,
        );

        store
            .persist_batch(BatchWrite {
                session_id: &session.id,
                content_type: ContentType::Model,
                checkpoint_id: checkpoint.id,
                items: &items,
                dead_letters: std::slice::from_ref(&failed),
                completed_range: None,
            })
            .await
            .unwrap();

        assert_eq!(store.content().count(ContentType::Model, false).await.unwrap(), 2);
        let checkpoint = store.checkpoints().get(checkpoint.id).await.unwrap().unwrap();
        assert_eq!(checkpoint.item_count, 2);
        let session = store.sessions().get(&session.id).await.unwrap().unwrap();
        assert_eq!(session.total_items, 2);
        assert_eq!(session.error_count, 1);
        assert_eq!(store.dead_letters().count(Some(ContentType::Model), false).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_persist_batch_rolls_back_on_failure() {
        let store = Store::open_in_memory().await.unwrap();
        let items = vec![item("1", ContentType::Model)];

        // Unknown checkpoint id: advancing it fails and nothing is kept
        let err = store
            .persist_batch(BatchWrite {
                session_id: "missing",
                content_type: ContentType::Model,
                checkpoint_id: 404,
                items: &items,
                dead_letters: &[],
                completed_range: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::NotFound(_)));
        assert_eq!(store.content().count(ContentType::Model, true).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_successful_capture_resolves_dead_letter() {
        let store = Store::open_in_memory().await.unwrap();
        let session = store.sessions().create(&json!({}), &json!({})).await.unwrap();
        let checkpoint = store
            .checkpoints()
            .open(Some(&session.id), ContentType::Folder, &CheckpointData::fresh(10))
            .await
            .unwrap();

        store
            .dead_letters()
            .record(&NewDeadLetter::for_item(
                Some(&session.id),
                ContentType::Folder,
                Some("7".into()),
                &EngineError::serialization("bad"),
                None,
            ))
            .await
            .unwrap();
        store
            .dead_letters()
            .record(&NewDeadLetter::for_range(
                Some(&session.id),
                ContentType::Folder,
                0,
                10,
                &EngineError::rate_limited("429"),
            ))
            .await
            .unwrap();

        let items = vec![item("7", ContentType::Folder)];
        store
            .persist_batch(BatchWrite {
                session_id: &session.id,
                content_type: ContentType::Folder,
                checkpoint_id: checkpoint.id,
                items: &items,
                dead_letters: &[],
                completed_range: Some(OffsetRange { offset: 0, limit: 10 }),
            })
            .await
            .unwrap();

        assert_eq!(store.dead_letters().count(Some(ContentType::Folder), false).await.unwrap(), 0);
        assert_eq!(store.dead_letters().count(Some(ContentType::Folder), true).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_recapture_keeps_restore_failures_open() {
        let store = Store::open_in_memory().await.unwrap();
        let session = store.sessions().create(&json!({}), &json!({})).await.unwrap();
        let checkpoint = store
            .checkpoints()
            .open(Some(&session.id), ContentType::Model, &CheckpointData::fresh(10))
            .await
            .unwrap();

        let rejected = NewDeadLetter {
            error_type: crate::restore::RESTORE_ERROR_TYPE.to_string(),
            ..NewDeadLetter::for_item(
                None,
                ContentType::Model,
                Some("1".into()),
                &EngineError::Api { status: 422, message: "name taken".into() },
                None,
            )
        };
        store.dead_letters().record(&rejected).await.unwrap();
        store
            .dead_letters()
            .record(&NewDeadLetter::for_item(
                Some(&session.id),
                ContentType::Model,
                Some("1".into()),
                &EngineError::serialization("bad"),
                None,
            ))
            .await
            .unwrap();

        let items = vec![item("1", ContentType::Model)];
        store
            .persist_batch(BatchWrite {
                session_id: &session.id,
                content_type: ContentType::Model,
                checkpoint_id: checkpoint.id,
                items: &items,
                dead_letters: &[],
                completed_range: None,
            })
            .await
            .unwrap();

        let open = store
            .dead_letters()
            .list(&DeadLetterFilter::default())
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].error_type, crate::restore::RESTORE_ERROR_TYPE);
    }

    #[tokio::test]
    async fn test_repersisted_items_are_counted_once() {
        let store = Store::open_in_memory().await.unwrap();
        let session = store.sessions().create(&json!({}), &json!({})).await.unwrap();
        let checkpoint = store
            .checkpoints()
            .open(Some(&session.id), ContentType::Dashboard, &CheckpointData::fresh(10))
            .await
            .unwrap();

        let first = vec![item("1", ContentType::Dashboard), item("2", ContentType::Dashboard)];
        let second = vec![
            item("2", ContentType::Dashboard),
            item("3", ContentType::Dashboard),
            item("3", ContentType::Dashboard),
        ];
        for items in [&first, &second] {
            store
                .persist_batch(BatchWrite {
                    session_id: &session.id,
                    content_type: ContentType::Dashboard,
                    checkpoint_id: checkpoint.id,
                    items,
                    dead_letters: &[],
                    completed_range: None,
                })
                .await
                .unwrap();
        }

        let checkpoint = store.checkpoints().get(checkpoint.id).await.unwrap().unwrap();
        assert_eq!(checkpoint.item_count, 3);
        assert_eq!(store.content().count(ContentType::Dashboard, false).await.unwrap(), 3);
    }
}
