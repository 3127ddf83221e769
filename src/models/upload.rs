//! Uploaded file parts handed to the registry.

use bytes::Bytes;
use futures::{StreamExt, stream};
use std::{fmt, io, path::Path};
use tempfile::TempPath;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::storage::ByteStream;

/// A single file part of an upload request.
///
/// If the part was spooled to disk, the temporary file is owned here and is
/// removed when the value is dropped, whichever way the upload ends.
pub struct UploadFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub size: u64,
    body: ByteStream,
    _spool: Option<TempPath>,
}

impl UploadFile {
    /// Wrap an in-memory payload.
    pub fn from_bytes(
        filename: impl Into<String>,
        content_type: Option<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        let data = data.into();
        let size = data.len() as u64;
        Self {
            filename: filename.into(),
            content_type,
            size,
            body: Box::pin(stream::once(async move { Ok::<_, io::Error>(data) })),
            _spool: None,
        }
    }

    /// Open a spooled temporary file for streaming. The file is deleted once
    /// the returned value (and therefore the stream) is dropped.
    pub async fn from_spool(
        filename: impl Into<String>,
        content_type: Option<String>,
        spool: TempPath,
    ) -> io::Result<Self> {
        let path: &Path = spool.as_ref();
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(Self {
            filename: filename.into(),
            content_type,
            size,
            body: ReaderStream::new(file).boxed(),
            _spool: Some(spool),
        })
    }

    /// Split off the byte stream. The spool guard, if any, is returned with
    /// it so the caller keeps the backing file alive while streaming.
    pub fn into_body(self) -> (ByteStream, Option<TempPath>) {
        (self.body, self._spool)
    }
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .field("spooled", &self._spool.is_some())
            .finish()
    }
}

/// Input of the upload operation. Files are optional so that a missing part is
/// reported as a validation error by the registry rather than by the decoder.
#[derive(Debug, Default)]
pub struct UploadRequest {
    pub title: String,
    pub media: Option<UploadFile>,
    pub poster: Option<UploadFile>,
}
