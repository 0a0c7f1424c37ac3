use chrono::Utc;
use cv_common::ContentType;
use sqlx::sqlite::SqlitePool;

use crate::error::Result;
use crate::models::IdMapping;

pub struct MappingRepo<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MappingRepo<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(
        &self,
        source_instance: &str,
        content_type: ContentType,
        source_id: &str,
    ) -> Result<Option<String>> {
        let destination: Option<String> = sqlx::query_scalar(
            r#"
            SELECT destination_id FROM id_mappings
            WHERE source_instance = ?1 AND content_type = ?2 AND source_id = ?3
            "#,
        )
        .bind(source_instance)
        .bind(content_type.code())
        .bind(source_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(destination)
    }

    /// Record or replace the destination identifier for a source item
    pub async fn upsert(
        &self,
        source_instance: &str,
        content_type: ContentType,
        source_id: &str,
        destination_id: &str,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO id_mappings (
                source_instance, content_type, source_id, destination_id, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(source_instance, content_type, source_id) DO UPDATE SET
                destination_id = excluded.destination_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(source_instance)
        .bind(content_type.code())
        .bind(source_id)
        .bind(destination_id)
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    pub async fn list(
        &self,
        source_instance: &str,
        content_type: Option<ContentType>,
    ) -> Result<Vec<IdMapping>> {
        let mappings = sqlx::query_as::<_, IdMapping>(
            r#"
            SELECT source_instance, content_type, source_id, destination_id, created_at, updated_at
            FROM id_mappings
            WHERE source_instance = ?1 AND (?2 IS NULL OR content_type = ?2)
            ORDER BY content_type, source_id
            "#,
        )
        .bind(source_instance)
        .bind(content_type.map(ContentType::code))
        .fetch_all(self.pool)
        .await?;

        Ok(mappings)
    }

    /// Drop every mapping recorded for an instance
    pub async fn clear(&self, source_instance: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM id_mappings WHERE source_instance = ?1")
            .bind(source_instance)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[tokio::test]
    async fn test_mapping_upsert_and_scope() {
        let store = Store::open_in_memory().await.unwrap();
        let repo = store.mappings();

        assert!(repo.get("prod", ContentType::Model, "m1").await.unwrap().is_none());

        repo.upsert("prod", ContentType::Model, "m1", "900").await.unwrap();
        repo.upsert("prod", ContentType::Model, "m1", "901").await.unwrap();
        repo.upsert("prod", ContentType::Dashboard, "m1", "5").await.unwrap();
        repo.upsert("staging", ContentType::Model, "m1", "77").await.unwrap();

        assert_eq!(
            repo.get("prod", ContentType::Model, "m1").await.unwrap().as_deref(),
            Some("901")
        );
        assert_eq!(repo.list("prod", None).await.unwrap().len(), 2);
        assert_eq!(repo.list("prod", Some(ContentType::Model)).await.unwrap().len(), 1);

        assert_eq!(repo.clear("prod").await.unwrap(), 2);
        assert!(repo.list("prod", None).await.unwrap().is_empty());
        assert_eq!(
            repo.get("staging", ContentType::Model, "m1").await.unwrap().as_deref(),
            Some("77")
        );
    }
}
