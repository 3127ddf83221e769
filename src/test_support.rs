//! In-memory stores with failure injection, shared by unit tests.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::{
    collections::{BTreeMap, HashSet},
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use crate::{
    metadata::{MetadataError, MetadataResult, MetadataStore},
    models::{MediaItem, NewMediaItem},
    services::registry::{MediaRegistry, RegistrySettings},
    storage::{ByteStream, ObjectStore, ObjectStoreError, ObjectStoreResult, QueryOverrides},
};

fn injected() -> ObjectStoreError {
    ObjectStoreError::Backend("injected failure".into())
}

#[derive(Default)]
struct Buckets {
    objects: BTreeMap<String, BTreeMap<String, Bytes>>,
    public: HashSet<String>,
    failing_puts: HashSet<String>,
    failing_deletes: HashSet<String>,
}

/// Object store backed by a map. Every successful put or delete counts as a
/// mutation.
#[derive(Default)]
pub struct MemoryObjectStore {
    state: Mutex<Buckets>,
    mutations: AtomicUsize,
    fail_presign: AtomicBool,
}

impl MemoryObjectStore {
    pub fn with_buckets(names: &[&str]) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock().unwrap();
            for name in names {
                state.objects.insert(name.to_string(), BTreeMap::new());
            }
        }
        store
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(bucket)?
            .get(key)
            .map(|data| String::from_utf8_lossy(data).into_owned())
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Place an object without counting it as a mutation.
    pub fn put_raw(&self, bucket: &str, key: &str, data: &'static str) {
        let mut state = self.state.lock().unwrap();
        state
            .objects
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), Bytes::from_static(data.as_bytes()));
    }

    pub fn bucket_names(&self) -> Vec<String> {
        self.state.lock().unwrap().objects.keys().cloned().collect()
    }

    pub fn is_public(&self, bucket: &str) -> bool {
        self.state.lock().unwrap().public.contains(bucket)
    }

    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn fail_puts_to(&self, bucket: &str) {
        self.state.lock().unwrap().failing_puts.insert(bucket.to_string());
    }

    pub fn fail_deletes_in(&self, bucket: &str) {
        self.state.lock().unwrap().failing_deletes.insert(bucket.to_string());
    }

    pub fn fail_presign(&self, on: bool) {
        self.fail_presign.store(on, Ordering::SeqCst);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.failing_puts.clear();
        state.failing_deletes.clear();
        self.fail_presign.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        mut body: ByteStream,
        size: u64,
        _content_type: Option<&str>,
    ) -> ObjectStoreResult<()> {
        if self.state.lock().unwrap().failing_puts.contains(bucket) {
            return Err(injected());
        }
        let mut data = BytesMut::new();
        while let Some(chunk) = body.next().await {
            data.extend_from_slice(&chunk?);
        }
        if data.len() as u64 != size {
            return Err(ObjectStoreError::SizeMismatch {
                declared: size,
                actual: data.len() as u64,
            });
        }

        let mut state = self.state.lock().unwrap();
        let objects = state
            .objects
            .get_mut(bucket)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(bucket.to_string()))?;
        objects.insert(key.to_string(), data.freeze());
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> ObjectStoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_deletes.contains(bucket) {
            return Err(injected());
        }
        if let Some(objects) = state.objects.get_mut(bucket) {
            if objects.remove(key).is_some() {
                self.mutations.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    async fn list(&self, bucket: &str) -> ObjectStoreResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .ok_or_else(|| ObjectStoreError::BucketNotFound(bucket.to_string()))
    }

    async fn presigned_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
        overrides: &QueryOverrides,
    ) -> ObjectStoreResult<String> {
        if self.fail_presign.load(Ordering::SeqCst) {
            return Err(injected());
        }
        let state = self.state.lock().unwrap();
        let objects = state
            .objects
            .get(bucket)
            .ok_or_else(|| ObjectStoreError::BucketNotFound(bucket.to_string()))?;
        if !objects.contains_key(key) {
            return Err(ObjectStoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        let mut url = format!("memory://{}/{}?ttl={}", bucket, key, ttl.as_secs());
        for (name, value) in overrides {
            url.push_str(&format!("&{}={}", name, value));
        }
        Ok(url)
    }

    async fn bucket_exists(&self, bucket: &str) -> ObjectStoreResult<bool> {
        Ok(self.state.lock().unwrap().objects.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> ObjectStoreResult<()> {
        self.state
            .lock()
            .unwrap()
            .objects
            .entry(bucket.to_string())
            .or_default();
        Ok(())
    }

    async fn set_public_read_policy(&self, bucket: &str) -> ObjectStoreResult<()> {
        self.state.lock().unwrap().public.insert(bucket.to_string());
        Ok(())
    }
}

/// Metadata store backed by a vector.
#[derive(Default)]
pub struct MemoryMetadataStore {
    rows: Mutex<Vec<MediaItem>>,
    next_id: AtomicI64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    vanish_on_delete: AtomicBool,
}

fn unavailable() -> MetadataError {
    MetadataError::Sqlx(sqlx::Error::PoolTimedOut)
}

impl MemoryMetadataStore {
    pub fn rows(&self) -> Vec<MediaItem> {
        self.rows.lock().unwrap().clone()
    }

    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    /// Make `delete` behave as if another request removed the row first.
    pub fn vanish_on_delete(&self, on: bool) {
        self.vanish_on_delete.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create(&self, item: NewMediaItem) -> MetadataResult<MediaItem> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let row = MediaItem {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            title: item.title,
            poster_key: item.poster_key.into_string(),
            stream_key: item.stream_key.into_string(),
            created_at: item.created_at,
        };
        self.rows.lock().unwrap().push(row.clone());
        Ok(row)
    }

    async fn find_all(&self) -> MetadataResult<Vec<MediaItem>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self.rows())
    }

    async fn find_by_id(&self, id: i64) -> MetadataResult<MediaItem> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.id == id)
            .cloned()
            .ok_or(MetadataError::NotFound(id))
    }

    async fn delete(&self, item: &MediaItem) -> MetadataResult<bool> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|row| row.id != item.id);
        if self.vanish_on_delete.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(rows.len() < before)
    }

    async fn ping(&self) -> MetadataResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }
}

/// A registry with default settings over fresh in-memory stores whose
/// buckets already exist.
pub fn memory_registry() -> (MediaRegistry, Arc<MemoryObjectStore>, Arc<MemoryMetadataStore>) {
    let settings = RegistrySettings::default();
    let objects = Arc::new(MemoryObjectStore::with_buckets(&[
        settings.media_bucket.as_str(),
        settings.poster_bucket.as_str(),
    ]));
    let metadata = Arc::new(MemoryMetadataStore::default());
    let registry = MediaRegistry::new(objects.clone(), metadata.clone(), settings);
    (registry, objects, metadata)
}

/// Formatted log output captured while the returned guard is alive.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Route this thread's `tracing` events into a buffer.
pub fn capture_logs() -> (tracing::subscriber::DefaultGuard, LogCapture) {
    let capture = LogCapture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(move || writer.clone())
        .finish();
    (tracing::subscriber::set_default(subscriber), capture)
}
