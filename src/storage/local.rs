//! src/storage/local.rs
//!
//! LocalObjectStore keeps object payloads on local disk, sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`. A bucket is a directory; a
//! bucket is public-read when it contains a `.public-read` marker file.
//! Download URLs are signed by [`UrlSigner`] and served by this process.

use async_trait::async_trait;
use futures::StreamExt;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

use super::{
    ByteStream, ObjectStore, ObjectStoreError, ObjectStoreResult, QueryOverrides, UrlSigner,
};

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const PUBLIC_MARKER: &str = ".public-read";
const TMP_PREFIX: &str = ".tmp-";

#[derive(Clone)]
pub struct LocalObjectStore {
    /// Base directory on disk where buckets live.
    base_path: PathBuf,

    /// Signs the download URLs handed out by `presigned_get`.
    signer: UrlSigner,
}

impl LocalObjectStore {
    pub fn new(base_path: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            base_path: base_path.into(),
            signer,
        }
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects keys that begin with `/`, contain `..`, or contain control
    /// characters or backslashes.
    fn ensure_key_safe(key: &str) -> ObjectStoreResult<()> {
        let bad = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.contains("..")
            || key.split('/').any(|segment| segment.is_empty())
            || key.bytes().any(|b| b.is_ascii_control() || b == b'\\');
        if bad {
            return Err(ObjectStoreError::InvalidObjectKey(key.to_string()));
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    fn ensure_bucket_name_safe(name: &str) -> ObjectStoreResult<()> {
        let invalid = |reason: &str| ObjectStoreError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }

        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }

        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }

        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }

        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }

        Ok(())
    }

    /// Physical folder of a bucket. Does not check for existence.
    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Two-level shard identifiers for an object key.
    ///
    /// Uses MD5(bucket/key) and returns the first two bytes as lowercase
    /// hexadecimal strings (00–ff). Reduces file count per directory.
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Fully-qualified payload path for `bucket/key`, after validating both.
    /// Parent directories may not exist yet.
    pub fn object_path(&self, bucket: &str, key: &str) -> ObjectStoreResult<PathBuf> {
        Self::ensure_bucket_name_safe(bucket)?;
        Self::ensure_key_safe(key)?;
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        for segment in key.split('/') {
            path.push(segment);
        }
        Ok(path)
    }

    /// Return the bucket folder, or `BucketNotFound` if it is missing.
    async fn require_bucket(&self, bucket: &str) -> ObjectStoreResult<PathBuf> {
        Self::ensure_bucket_name_safe(bucket)?;
        let root = self.bucket_root(bucket);
        match fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => Ok(root),
            Ok(_) => Err(ObjectStoreError::BucketNotFound(bucket.to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(ObjectStoreError::BucketNotFound(bucket.to_string()))
            }
            Err(err) => Err(ObjectStoreError::Io(err)),
        }
    }

    /// Path of an existing object, for serving its bytes.
    pub async fn readable_path(&self, bucket: &str, key: &str) -> ObjectStoreResult<PathBuf> {
        self.require_bucket(bucket).await?;
        let path = self.object_path(bucket, key)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(not_found(bucket, key)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(not_found(bucket, key)),
            Err(err) => Err(ObjectStoreError::Io(err)),
        }
    }

    /// Whether anonymous reads are allowed in `bucket`.
    pub async fn is_public(&self, bucket: &str) -> bool {
        if Self::ensure_bucket_name_safe(bucket).is_err() {
            return false;
        }
        fs::try_exists(self.bucket_root(bucket).join(PUBLIC_MARKER))
            .await
            .unwrap_or(false)
    }

    /// Recursively remove empty directories up to the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!(path = %current.display(), error = %err, "failed to prune directory");
                    break;
                }
            }
        }
    }

    /// Write `body` to a temp file next to `final_path`, then rename.
    async fn write_atomically(
        &self,
        final_path: &Path,
        mut body: ByteStream,
        declared: u64,
    ) -> ObjectStoreResult<()> {
        let parent = final_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            ObjectStoreError::Io(io::Error::other("object path missing parent directory"))
        })?;
        let tmp_path = parent.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));
        let mut file = create_in(&parent, &tmp_path).await?;

        let result = async {
            let mut written: u64 = 0;
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                written += chunk.len() as u64;
                file.write_all(&chunk).await?;
            }
            if written != declared {
                return Err(ObjectStoreError::SizeMismatch {
                    declared,
                    actual: written,
                });
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok::<(), ObjectStoreError>(())
        }
        .await;
        drop(file);

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        if let Err(err) = fs::rename(&tmp_path, final_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(final_path).await?;
                fs::rename(&tmp_path, final_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ObjectStoreError::Io(err));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    /// Stream an object to disk. The payload only becomes visible once it has
    /// been fully written, fsynced and renamed into place.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        size: u64,
        _content_type: Option<&str>,
    ) -> ObjectStoreResult<()> {
        self.require_bucket(bucket).await?;
        let path = self.object_path(bucket, key)?;
        self.write_atomically(&path, body, size).await?;
        debug!(bucket, key, size, path = %path.display(), "object stored");
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> ObjectStoreResult<()> {
        let bucket_root = self.require_bucket(bucket).await?;
        let file_path = self.object_path(bucket, key)?;
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!(bucket, key, path = %file_path.display(), "object removed"),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(bucket, key, path = %file_path.display(), "object already missing");
                return Ok(());
            }
            Err(err) => return Err(ObjectStoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }

    /// Walk the shard directories and rebuild keys from the paths found
    /// below `{shard}/{shard}/`. In-flight temp files are skipped.
    async fn list(&self, bucket: &str) -> ObjectStoreResult<Vec<String>> {
        let root = self.require_bucket(bucket).await?;
        let mut keys = Vec::new();
        let mut pending: Vec<(PathBuf, usize)> = vec![(root, 0)];

        while let Some((dir, depth)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // Pruned concurrently by a delete.
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(ObjectStoreError::Io(err)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };
                if name.starts_with(TMP_PREFIX) || name == PUBLIC_MARKER {
                    continue;
                }
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push((entry.path(), depth + 1));
                } else if file_type.is_file() && depth >= 2 {
                    if let Some(key) = key_from_path(&entry.path(), &self.bucket_root(bucket)) {
                        keys.push(key);
                    }
                }
            }
        }

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
        self.readable_path(bucket, key).await?;
        self.signer.sign(bucket, key, ttl, overrides)
    }

    async fn bucket_exists(&self, bucket: &str) -> ObjectStoreResult<bool> {
        match self.require_bucket(bucket).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::BucketNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> ObjectStoreResult<()> {
        Self::ensure_bucket_name_safe(bucket)?;
        fs::create_dir_all(self.bucket_root(bucket)).await?;
        Ok(())
    }

    async fn set_public_read_policy(&self, bucket: &str) -> ObjectStoreResult<()> {
        let root = self.require_bucket(bucket).await?;
        fs::write(root.join(PUBLIC_MARKER), b"").await?;
        Ok(())
    }
}

/// Create `path` inside `dir`, creating `dir` first. A delete in the same
/// shard may prune `dir` in between, so a missing directory is retried once.
async fn create_in(dir: &Path, path: &Path) -> io::Result<File> {
    fs::create_dir_all(dir).await?;
    match File::create(path).await {
        Err(err) if err.kind() == ErrorKind::NotFound => {
            fs::create_dir_all(dir).await?;
            File::create(path).await
        }
        other => other,
    }
}

fn not_found(bucket: &str, key: &str) -> ObjectStoreError {
    ObjectStoreError::ObjectNotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

/// Rebuild a key from `bucket_root/{shard}/{shard}/{segments...}`.
fn key_from_path(path: &Path, bucket_root: &Path) -> Option<String> {
    let relative = path.strip_prefix(bucket_root).ok()?;
    let segments = relative
        .components()
        .skip(2)
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Check if a string matches IPv4-like dotted decimal form.
/// Rejects names formatted like `1.2.3.4`.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|segment| {
        !segment.is_empty()
            && segment.len() <= 3
            && segment.chars().all(|c| c.is_ascii_digit())
            && segment.parse::<u8>().is_ok()
    })
}
