//! Upload, list, stream and delete orchestration across the object store
//! (blobs) and the metadata store (records).
//!
//! There is no transaction spanning the two stores. Writes go blobs first,
//! record last; deletes go blobs first, record last. A failure part way
//! leaves either orphaned blobs (no record points at them) or a record whose
//! blobs are partly gone. Neither is rolled back: the failure is returned with
//! a [`ConsistencyWarning`] describing the leftover state, the warning is
//! logged, and `reconcile` sweeps orphans later. A failed delete is safe to
//! retry because blob deletion is idempotent.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashSet, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    metadata::{MetadataError, MetadataStore},
    models::{MediaItem, MediaView, NewMediaItem, ObjectKey, UploadFile, UploadRequest},
    storage::{ObjectStore, ObjectStoreError, QueryOverrides, signing::encode_component},
};

const STREAM_ROUTE: &str = "stream";
const POSTER_ROUTE: &str = "posters";

/// Static knobs of the registry, fixed at startup.
#[derive(Clone, Debug)]
pub struct RegistrySettings {
    pub media_bucket: String,
    pub poster_bucket: String,
    /// Origin used to build `posterURL` / `streamURL`, e.g. `http://localhost:8000`.
    pub public_base_url: String,
    pub stream_url_ttl: Duration,
    pub poster_url_ttl: Duration,
    /// Forced `Content-Type` on stream URLs, if any.
    pub stream_content_type: Option<String>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            media_bucket: "movies".into(),
            poster_bucket: "posters".into(),
            public_base_url: "http://localhost:8000".into(),
            stream_url_ttl: Duration::from_secs(10 * 60),
            poster_url_ttl: Duration::from_secs(60 * 60),
            stream_content_type: Some("video/mp4".into()),
        }
    }
}

/// A blob address.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct BlobRef {
    pub bucket: String,
    pub key: String,
}

impl BlobRef {
    fn new(bucket: &str, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.into(),
        }
    }
}

/// Known cross-store inconsistency left behind by a failed operation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsistencyWarning {
    /// Blobs stored with no record referencing them.
    OrphanedBlobs { blobs: Vec<BlobRef> },
    /// A record whose listed blobs have already been deleted.
    DanglingRecord { id: i64, missing: Vec<BlobRef> },
}

impl ConsistencyWarning {
    fn emit(&self, operation: &'static str) {
        match self {
            ConsistencyWarning::OrphanedBlobs { blobs } => {
                for blob in blobs {
                    warn!(
                        operation,
                        consistency = "orphaned_blob",
                        bucket = %blob.bucket,
                        key = %blob.key,
                        "blob left without a metadata record; reconcile will remove it"
                    );
                }
            }
            ConsistencyWarning::DanglingRecord { id, missing } => {
                warn!(
                    operation,
                    consistency = "dangling_record",
                    media_id = id,
                    missing = missing.len(),
                    "metadata record references deleted blobs; retry the delete"
                );
            }
        }
    }
}

/// Which collaborator failed.
#[derive(Debug, Error)]
pub enum StoreSource {
    #[error(transparent)]
    Objects(#[from] ObjectStoreError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("{what} not found")]
    NotFound { what: String },
    #[error("{operation} failed: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreSource,
        warning: Option<ConsistencyWarning>,
    },
}

impl RegistryError {
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::Validation { .. } => "validation",
            RegistryError::NotFound { .. } => "not_found",
            RegistryError::Store { .. } => "store_failure",
        }
    }

    fn validation(field: &'static str, message: impl Into<String>) -> Self {
        RegistryError::Validation {
            field,
            message: message.into(),
        }
    }

    fn store(
        operation: &'static str,
        source: impl Into<StoreSource>,
        warning: Option<ConsistencyWarning>,
    ) -> Self {
        RegistryError::Store {
            operation,
            source: source.into(),
            warning,
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Clone, Copy, Debug)]
pub struct ReconcileOptions {
    /// Orphans younger than this are left alone; their upload may still be
    /// about to write its record.
    pub grace: Duration,
    pub dry_run: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60 * 60),
            dry_run: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// Blobs found across both buckets.
    pub scanned: usize,
    /// Blobs referenced by a record.
    pub referenced: usize,
    /// Orphans old enough to remove (removed unless dry-run).
    pub orphaned: Vec<BlobRef>,
    pub removed: usize,
    pub skipped_recent: usize,
    /// Orphans whose key does not carry a timestamp; never removed.
    pub skipped_unrecognized: usize,
    pub failed: usize,
}

/// The upload/retrieve/delete orchestrator. Cheap to clone; holds no mutable
/// state of its own.
#[derive(Clone)]
pub struct MediaRegistry {
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    settings: Arc<RegistrySettings>,
}

impl MediaRegistry {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            objects,
            metadata,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Store both files, then record the item.
    ///
    /// Validation happens before any store is touched. The files are owned by
    /// `request` and released when this returns, on every path.
    pub async fn upload(&self, request: UploadRequest) -> RegistryResult<MediaView> {
        let UploadRequest {
            title,
            media,
            poster,
        } = request;

        let title = title.trim();
        if title.is_empty() {
            return Err(RegistryError::validation("title", "Movie title is required"));
        }
        let media = media.ok_or_else(|| RegistryError::validation("movie", "Movie file is required"))?;
        let poster =
            poster.ok_or_else(|| RegistryError::validation("poster", "Poster image is required"))?;

        let settings = &self.settings;
        let stream_key = ObjectKey::derive(&media.filename);
        let poster_key = ObjectKey::derive(&poster.filename);

        if let Err(source) = self.put_file(&settings.media_bucket, &stream_key, media).await {
            error!(
                operation = "upload",
                bucket = %settings.media_bucket,
                key = %stream_key,
                error_kind = "store_failure",
                error = %source,
                "failed to store media file"
            );
            return Err(RegistryError::store("upload media", source, None));
        }
        info!(operation = "upload", bucket = %settings.media_bucket, key = %stream_key, "media file stored");

        if let Err(source) = self.put_file(&settings.poster_bucket, &poster_key, poster).await {
            error!(
                operation = "upload",
                bucket = %settings.poster_bucket,
                key = %poster_key,
                error_kind = "store_failure",
                error = %source,
                "failed to store poster"
            );
            let warning = ConsistencyWarning::OrphanedBlobs {
                blobs: vec![BlobRef::new(&settings.media_bucket, stream_key.as_str())],
            };
            warning.emit("upload");
            return Err(RegistryError::store("upload poster", source, Some(warning)));
        }
        info!(operation = "upload", bucket = %settings.poster_bucket, key = %poster_key, "poster stored");

        let draft = NewMediaItem {
            title: title.to_string(),
            poster_key: poster_key.clone(),
            stream_key: stream_key.clone(),
            created_at: Utc::now(),
        };
        let created = match self.metadata.create(draft).await {
            Ok(created) => created,
            Err(source) => {
                error!(
                    operation = "upload",
                    error_kind = "store_failure",
                    error = %source,
                    "failed to save media metadata"
                );
                let warning = ConsistencyWarning::OrphanedBlobs {
                    blobs: vec![
                        BlobRef::new(&settings.media_bucket, stream_key.into_string()),
                        BlobRef::new(&settings.poster_bucket, poster_key.into_string()),
                    ],
                };
                warning.emit("upload");
                return Err(RegistryError::store("save metadata", source, Some(warning)));
            }
        };

        info!(operation = "upload", media_id = created.id, title = %created.title, "media registered");
        Ok(self.view(&created))
    }

    /// Every recorded item. The metadata store is the only source of truth
    /// for listing; buckets are never enumerated here.
    pub async fn list(&self) -> RegistryResult<Vec<MediaView>> {
        let items = self.metadata.find_all().await.map_err(|source| {
            error!(operation = "list", error_kind = "store_failure", error = %source, "failed to fetch media");
            RegistryError::store("list media", source, None)
        })?;
        Ok(items.iter().map(|item| self.view(item)).collect())
    }

    pub async fn get(&self, id: i64) -> RegistryResult<MediaView> {
        let item = self.find(id, "get").await?;
        Ok(self.view(&item))
    }

    /// Signed, short-lived URL for a media object.
    pub async fn stream_url(&self, name: &str) -> RegistryResult<String> {
        if name.trim().is_empty() {
            return Err(RegistryError::validation("name", "Movie name is required"));
        }
        let mut overrides = QueryOverrides::new();
        if let Some(content_type) = &self.settings.stream_content_type {
            overrides.insert("response-content-type".into(), content_type.clone());
        }
        self.presign(
            "stream",
            &self.settings.media_bucket,
            name,
            self.settings.stream_url_ttl,
            &overrides,
        )
        .await
    }

    /// Signed URL for a poster; lives longer than a stream URL since posters
    /// are re-fetched throughout a browsing session.
    pub async fn poster_url(&self, name: &str) -> RegistryResult<String> {
        if name.trim().is_empty() {
            return Err(RegistryError::validation("name", "Poster name is required"));
        }
        self.presign(
            "poster",
            &self.settings.poster_bucket,
            name,
            self.settings.poster_url_ttl,
            &QueryOverrides::new(),
        )
        .await
    }

    /// Remove both blobs, then the record. Returns the removed record.
    pub async fn delete(&self, id: i64) -> RegistryResult<MediaItem> {
        let item = self.find(id, "delete").await?;
        let settings = &self.settings;

        let blobs = [
            BlobRef::new(&settings.media_bucket, item.stream_object().into_string()),
            BlobRef::new(&settings.poster_bucket, item.poster_object().into_string()),
        ];
        for (done, blob) in blobs.iter().enumerate() {
            match self.objects.delete(&blob.bucket, &blob.key).await {
                Ok(()) | Err(ObjectStoreError::ObjectNotFound { .. }) => {
                    info!(operation = "delete", media_id = id, bucket = %blob.bucket, key = %blob.key, "blob removed");
                }
                Err(source) => {
                    error!(
                        operation = "delete",
                        media_id = id,
                        bucket = %blob.bucket,
                        key = %blob.key,
                        error_kind = "store_failure",
                        error = %source,
                        "failed to delete blob; record kept for retry"
                    );
                    let warning = (done > 0).then(|| ConsistencyWarning::DanglingRecord {
                        id,
                        missing: blobs[..done].to_vec(),
                    });
                    if let Some(warning) = &warning {
                        warning.emit("delete");
                    }
                    return Err(RegistryError::store("delete blob", source, warning));
                }
            }
        }

        match self.metadata.delete(&item).await {
            Ok(true) => info!(operation = "delete", media_id = id, "media record removed"),
            Ok(false) => info!(
                operation = "delete",
                media_id = id,
                "media record already removed by a concurrent delete"
            ),
            Err(source) => {
                error!(
                    operation = "delete",
                    media_id = id,
                    error_kind = "store_failure",
                    error = %source,
                    "failed to delete media record"
                );
                let warning = ConsistencyWarning::DanglingRecord {
                    id,
                    missing: blobs.to_vec(),
                };
                warning.emit("delete");
                return Err(RegistryError::store("delete metadata", source, Some(warning)));
            }
        }

        Ok(item)
    }

    /// Create any missing bucket, optionally opening it for anonymous reads.
    pub async fn ensure_buckets(&self, public_read: bool) -> RegistryResult<()> {
        for bucket in [&self.settings.media_bucket, &self.settings.poster_bucket] {
            let exists = self
                .objects
                .bucket_exists(bucket)
                .await
                .map_err(|source| RegistryError::store("check bucket", source, None))?;
            if exists {
                info!(operation = "ensure_buckets", bucket = %bucket, "bucket already exists");
            } else {
                self.objects
                    .create_bucket(bucket)
                    .await
                    .map_err(|source| RegistryError::store("create bucket", source, None))?;
                info!(operation = "ensure_buckets", bucket = %bucket, "bucket created");
            }

            if public_read {
                match self.objects.set_public_read_policy(bucket).await {
                    Ok(()) => {
                        info!(operation = "ensure_buckets", bucket = %bucket, "bucket is public-read")
                    }
                    Err(ObjectStoreError::Unsupported(reason)) => {
                        warn!(
                        operation = "ensure_buckets",
                        bucket = %bucket,
                        reason,
                        "cannot make bucket public-read"
                    )
                    }
                    Err(source) => {
                        return Err(RegistryError::store("set bucket policy", source, None));
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn reconcile(&self, options: ReconcileOptions) -> RegistryResult<ReconcileReport> {
        self.reconcile_at(Utc::now(), options).await
    }

    /// Find blobs that no record references and remove those older than the
    /// grace period.
    pub async fn reconcile_at(
        &self,
        now: DateTime<Utc>,
        options: ReconcileOptions,
    ) -> RegistryResult<ReconcileReport> {
        let settings = &self.settings;
        let mut stored = Vec::new();
        for bucket in [&settings.media_bucket, &settings.poster_bucket] {
            let keys = self
                .objects
                .list(bucket)
                .await
                .map_err(|source| RegistryError::store("list bucket", source, None))?;
            stored.extend(keys.into_iter().map(|key| BlobRef::new(bucket, key)));
        }

        // Records are read after the buckets so that any blob listed above
        // whose upload has since completed is seen as referenced.
        let items = self
            .metadata
            .find_all()
            .await
            .map_err(|source| RegistryError::store("list media", source, None))?;
        let referenced: HashSet<BlobRef> = items
            .iter()
            .flat_map(|item| {
                [
                    BlobRef::new(&settings.media_bucket, item.stream_key.clone()),
                    BlobRef::new(&settings.poster_bucket, item.poster_key.clone()),
                ]
            })
            .collect();

        let grace = chrono::Duration::from_std(options.grace).unwrap_or(chrono::Duration::MAX);
        let mut report = ReconcileReport {
            scanned: stored.len(),
            ..ReconcileReport::default()
        };

        for blob in stored {
            if referenced.contains(&blob) {
                report.referenced += 1;
                continue;
            }
            let Some(parsed) = ObjectKey::parse(&blob.key) else {
                report.skipped_unrecognized += 1;
                continue;
            };
            if now.signed_duration_since(parsed.created_at) < grace {
                report.skipped_recent += 1;
                continue;
            }

            if !options.dry_run {
                match self.objects.delete(&blob.bucket, &blob.key).await {
                    Ok(()) => {
                        report.removed += 1;
                        info!(operation = "reconcile", bucket = %blob.bucket, key = %blob.key, "orphan removed");
                    }
                    Err(err) => {
                        report.failed += 1;
                        error!(
                            operation = "reconcile",
                            bucket = %blob.bucket,
                            key = %blob.key,
                            error_kind = "store_failure",
                            error = %err,
                            "failed to remove orphan"
                        );
                    }
                }
            }
            report.orphaned.push(blob);
        }

        info!(
            operation = "reconcile",
            scanned = report.scanned,
            orphaned = report.orphaned.len(),
            removed = report.removed,
            dry_run = options.dry_run,
            "reconcile finished"
        );
        Ok(report)
    }

    /// Public projection of a record with display URLs.
    pub fn view(&self, item: &MediaItem) -> MediaView {
        MediaView {
            id: item.id,
            title: item.title.clone(),
            poster_url: self.public_url(POSTER_ROUTE, &item.poster_key),
            stream_url: self.public_url(STREAM_ROUTE, &item.stream_key),
            created_at: item.created_at,
        }
    }

    fn public_url(&self, route: &str, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.settings.public_base_url.trim_end_matches('/'),
            route,
            encode_component(key)
        )
    }

    async fn find(&self, id: i64, operation: &'static str) -> RegistryResult<MediaItem> {
        match self.metadata.find_by_id(id).await {
            Ok(item) => Ok(item),
            Err(MetadataError::NotFound(_)) => Err(RegistryError::NotFound {
                what: format!("media item {}", id),
            }),
            Err(source) => {
                error!(operation, media_id = id, error_kind = "store_failure", error = %source, "failed to look up media");
                Err(RegistryError::store("find media", source, None))
            }
        }
    }

    async fn put_file(
        &self,
        bucket: &str,
        key: &ObjectKey,
        file: UploadFile,
    ) -> Result<(), ObjectStoreError> {
        let size = file.size;
        let content_type = file.content_type.clone();
        let (body, _spool) = file.into_body();
        self.objects
            .put(bucket, key.as_str(), body, size, content_type.as_deref())
            .await
    }

    async fn presign(
        &self,
        operation: &'static str,
        bucket: &str,
        key: &str,
        ttl: Duration,
        overrides: &QueryOverrides,
    ) -> RegistryResult<String> {
        match self.objects.presigned_get(bucket, key, ttl, overrides).await {
            Ok(url) => Ok(url),
            Err(ObjectStoreError::ObjectNotFound { .. }) => Err(RegistryError::NotFound {
                what: format!("object `{}`", key),
            }),
            Err(ObjectStoreError::InvalidObjectKey(_)) => Err(RegistryError::validation(
                "name",
                format!("`{}` is not a valid object name", key),
            )),
            Err(source) => {
                error!(
                    operation,
                    bucket,
                    key,
                    error_kind = "store_failure",
                    error = %source,
                    "failed to generate signed url"
                );
                Err(RegistryError::store("presign url", source, None))
            }
        }
    }
}
