//! Object storage backends.
//!
//! The registry talks to blob storage only through [`ObjectStore`]. Two
//! backends are provided:
//! - [`local::LocalObjectStore`] keeps objects on disk and signs its own
//!   download URLs, served by `GET /objects/{bucket}/{*key}`.
//! - [`s3::S3ObjectStore`] talks to any S3-compatible endpoint (MinIO, AWS).

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::{collections::BTreeMap, io, pin::Pin, time::Duration};
use thiserror::Error;

pub mod local;
pub mod s3;
pub mod signing;

pub use local::LocalObjectStore;
pub use s3::S3ObjectStore;
pub use signing::UrlSigner;

/// Owned stream of object bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Response header overrides baked into a presigned URL
/// (`response-content-type`, `response-content-disposition`).
pub type QueryOverrides = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("declared size {declared} does not match {actual} bytes received")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("invalid url lifetime: {0}")]
    InvalidTtl(String),
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ObjectStoreError {
    /// True when the error means the addressed object or bucket is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ObjectStoreError::ObjectNotFound { .. } | ObjectStoreError::BucketNotFound(_)
        )
    }
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// Durable blob storage organized into named buckets.
///
/// Implementations must make `delete` idempotent: removing an object that is
/// already gone returns `Ok(())`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `bucket/key`. `size` is the declared length.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        size: u64,
        content_type: Option<&str>,
    ) -> ObjectStoreResult<()>;

    /// Remove `bucket/key`. Absent objects are not an error.
    async fn delete(&self, bucket: &str, key: &str) -> ObjectStoreResult<()>;

    /// Every key currently stored in `bucket`, in lexicographic order.
    async fn list(&self, bucket: &str) -> ObjectStoreResult<Vec<String>>;

    /// A read-only URL for one object, valid for `ttl`.
    async fn presigned_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
        overrides: &QueryOverrides,
    ) -> ObjectStoreResult<String>;

    async fn bucket_exists(&self, bucket: &str) -> ObjectStoreResult<bool>;

    async fn create_bucket(&self, bucket: &str) -> ObjectStoreResult<()>;

    /// Allow anonymous reads of every object in `bucket`.
    async fn set_public_read_policy(&self, bucket: &str) -> ObjectStoreResult<()>;
}
