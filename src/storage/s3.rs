//! S3-compatible backend (MinIO, AWS S3, …) built on `rust-s3`.
//!
//! Buckets are addressed path-style so a plain MinIO endpoint such as
//! `http://localhost:9000` works without DNS tricks.

use async_trait::async_trait;
use s3::{
    Bucket, BucketConfiguration, Region, creds::Credentials, error::S3Error,
};
use std::{collections::HashMap, time::Duration};
use tokio_util::io::StreamReader;
use tracing::debug;

use super::{
    ByteStream, ObjectStore, ObjectStoreError, ObjectStoreResult, QueryOverrides,
    signing::validate_ttl,
};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Clone)]
pub struct S3ObjectStore {
    region: Region,
    credentials: Credentials,
}

impl S3ObjectStore {
    /// `endpoint` is the base URL of the S3 API, e.g. `http://localhost:9000`.
    pub fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
    ) -> ObjectStoreResult<Self> {
        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|err| ObjectStoreError::Backend(format!("invalid credentials: {}", err)))?;
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        };
        Ok(Self {
            region,
            credentials,
        })
    }

    fn bucket(&self, name: &str) -> ObjectStoreResult<Box<Bucket>> {
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())
            .map_err(backend)?;
        Ok(Box::new(bucket.with_path_style()))
    }
}

fn backend(err: S3Error) -> ObjectStoreError {
    ObjectStoreError::Backend(err.to_string())
}

/// Map an S3 error for `bucket/key`, turning 404 responses into not-found.
fn classify(err: S3Error, bucket: &str, key: &str) -> ObjectStoreError {
    match err {
        S3Error::HttpFailWithBody(404, body) if body.contains("NoSuchBucket") => {
            ObjectStoreError::BucketNotFound(bucket.to_string())
        }
        S3Error::HttpFailWithBody(404, _) => ObjectStoreError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        },
        other => backend(other),
    }
}

/// S3 answers 204 for absent keys; some gateways answer 404. Either way the
/// object is gone.
fn deleted_or_absent(err: S3Error, bucket: &str, key: &str) -> ObjectStoreResult<()> {
    match classify(err, bucket, key) {
        ObjectStoreError::ObjectNotFound { .. } => Ok(()),
        other => Err(other),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        size: u64,
        content_type: Option<&str>,
    ) -> ObjectStoreResult<()> {
        let handle = self.bucket(bucket)?;
        let mut reader = StreamReader::new(body);
        handle
            .put_object_stream_with_content_type(
                &mut reader,
                key,
                content_type.unwrap_or(DEFAULT_CONTENT_TYPE),
            )
            .await
            .map_err(|err| classify(err, bucket, key))?;
        debug!(bucket, key, size, "uploaded object to s3");
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> ObjectStoreResult<()> {
        let handle = self.bucket(bucket)?;
        match handle.delete_object(key).await {
            Ok(_) => Ok(()),
            Err(err) => deleted_or_absent(err, bucket, key),
        }
    }

    async fn list(&self, bucket: &str) -> ObjectStoreResult<Vec<String>> {
        let handle = self.bucket(bucket)?;
        let pages = handle
            .list(String::new(), None)
            .await
            .map_err(|err| classify(err, bucket, ""))?;
        let mut keys: Vec<String> = pages
            .into_iter()
            .flat_map(|page| page.contents.into_iter().map(|object| object.key))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn presigned_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
        overrides: &QueryOverrides,
    ) -> ObjectStoreResult<String> {
        let ttl_secs = validate_ttl(ttl)?;
        let handle = self.bucket(bucket)?;
        let queries: HashMap<String, String> = overrides
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let queries = if queries.is_empty() { None } else { Some(queries) };
        handle
            .presign_get(key, ttl_secs, queries)
            .await
            .map_err(|err| classify(err, bucket, key))
    }

    async fn bucket_exists(&self, bucket: &str) -> ObjectStoreResult<bool> {
        self.bucket(bucket)?.exists().await.map_err(backend)
    }

    async fn create_bucket(&self, bucket: &str) -> ObjectStoreResult<()> {
        let response = Bucket::create_with_path_style(
            bucket,
            self.region.clone(),
            self.credentials.clone(),
            BucketConfiguration::default(),
        )
        .await
        .map_err(backend)?;
        if !response.success() {
            return Err(ObjectStoreError::Backend(format!(
                "create bucket `{}` failed with status {}: {}",
                bucket, response.response_code, response.response_text
            )));
        }
        Ok(())
    }

    async fn set_public_read_policy(&self, _bucket: &str) -> ObjectStoreResult<()> {
        Err(ObjectStoreError::Unsupported(
            "bucket policies must be configured on the S3 endpoint",
        ))
    }
}
