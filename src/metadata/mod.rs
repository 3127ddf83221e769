//! Metadata storage: one row per media item.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{MediaItem, NewMediaItem};

pub mod sqlite;

pub use sqlite::SqliteMetadataStore;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("media item {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a record and return it with its assigned id.
    async fn create(&self, item: NewMediaItem) -> MetadataResult<MediaItem>;

    /// Every record, oldest first.
    async fn find_all(&self) -> MetadataResult<Vec<MediaItem>>;

    /// Returns `MetadataError::NotFound` when no row has this id.
    async fn find_by_id(&self, id: i64) -> MetadataResult<MediaItem>;

    /// Remove the record. `Ok(false)` means it was already gone.
    async fn delete(&self, item: &MediaItem) -> MetadataResult<bool>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> MetadataResult<()>;
}
