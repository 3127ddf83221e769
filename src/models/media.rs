//! Media metadata records and their public projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::object_key::ObjectKey;

/// One uploaded media asset as stored in the metadata store.
///
/// Both keys are raw bucket-relative object keys, never URLs, so the delete
/// path can address the blobs without parsing anything back.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct MediaItem {
    /// Store-assigned identifier. Never reused.
    pub id: i64,

    /// Human-readable title, non-empty.
    pub title: String,

    /// Key of the poster blob in the poster bucket.
    pub poster_key: String,

    /// Key of the media blob in the media bucket.
    pub stream_key: String,

    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl MediaItem {
    pub fn poster_object(&self) -> ObjectKey {
        ObjectKey::from_stored(self.poster_key.clone())
    }

    pub fn stream_object(&self) -> ObjectKey {
        ObjectKey::from_stored(self.stream_key.clone())
    }
}

/// A record about to be inserted; the store assigns `id`.
#[derive(Clone, Debug)]
pub struct NewMediaItem {
    pub title: String,
    pub poster_key: ObjectKey,
    pub stream_key: ObjectKey,
    pub created_at: DateTime<Utc>,
}

/// What clients see: the record with display URLs in place of raw keys.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaView {
    pub id: i64,
    pub title: String,
    #[serde(rename = "posterURL")]
    pub poster_url: String,
    #[serde(rename = "streamURL")]
    pub stream_url: String,
    pub created_at: DateTime<Utc>,
}
