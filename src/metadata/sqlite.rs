//! SQLite-backed metadata store.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

use super::{MetadataError, MetadataResult, MetadataStore};
use crate::models::{MediaItem, NewMediaItem};

const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Clone)]
pub struct SqliteMetadataStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Statements are idempotent, so this is safe
    /// to run against an already-initialized database.
    pub async fn migrate(&self) -> MetadataResult<()> {
        let statements = INIT_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!(statements = statements.len(), "running schema migration");

        for stmt in statements {
            debug!(sql = stmt, "executing migration statement");
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn create(&self, item: NewMediaItem) -> MetadataResult<MediaItem> {
        let row = sqlx::query_as::<_, MediaItem>(
            r#"
            INSERT INTO media_items (title, poster_key, stream_key, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id, title, poster_key, stream_key, created_at
            "#,
        )
        .bind(&item.title)
        .bind(item.poster_key.as_str())
        .bind(item.stream_key.as_str())
        .bind(item.created_at)
        .fetch_one(&*self.db)
        .await?;
        Ok(row)
    }

    async fn find_all(&self) -> MetadataResult<Vec<MediaItem>> {
        let rows = sqlx::query_as::<_, MediaItem>(
            "SELECT id, title, poster_key, stream_key, created_at
             FROM media_items ORDER BY id ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    async fn find_by_id(&self, id: i64) -> MetadataResult<MediaItem> {
        sqlx::query_as::<_, MediaItem>(
            "SELECT id, title, poster_key, stream_key, created_at
             FROM media_items WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => MetadataError::NotFound(id),
            other => MetadataError::Sqlx(other),
        })
    }

    async fn delete(&self, item: &MediaItem) -> MetadataResult<bool> {
        let result = sqlx::query("DELETE FROM media_items WHERE id = ?")
            .bind(item.id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> MetadataResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ObjectKey;
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> SqliteMetadataStore {
        // One connection: every `sqlite::memory:` connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteMetadataStore::new(Arc::new(pool));
        store.migrate().await.unwrap();
        store
    }

    fn new_item(title: &str) -> NewMediaItem {
        NewMediaItem {
            title: title.to_string(),
            poster_key: ObjectKey::derive("poster.png"),
            stream_key: ObjectKey::derive("movie.mp4"),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_then_find() {
        let store = memory_store().await;
        let draft = new_item("Alpha");
        let created = store.create(draft.clone()).await.unwrap();
        assert_eq!(created.title, "Alpha");
        assert_eq!(created.stream_key, draft.stream_key.as_str());

        let fetched = store.find_by_id(created.id).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(store.find_all().await.unwrap(), vec![created]);
    }

    #[tokio::test]
    async fn missing_id_is_not_found() {
        let store = memory_store().await;
        assert!(matches!(
            store.find_by_id(42).await,
            Err(MetadataError::NotFound(42))
        ));
    }

    #[tokio::test]
    async fn second_delete_reports_absent_row() {
        let store = memory_store().await;
        let created = store.create(new_item("Alpha")).await.unwrap();
        assert!(store.delete(&created).await.unwrap());
        assert!(!store.delete(&created).await.unwrap());
        assert!(store.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ids_are_not_reused() {
        let store = memory_store().await;
        let first = store.create(new_item("One")).await.unwrap();
        store.delete(&first).await.unwrap();
        let second = store.create(new_item("Two")).await.unwrap();
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn migrate_is_repeatable() {
        let store = memory_store().await;
        store.migrate().await.unwrap();
        store.ping().await.unwrap();
    }
}
