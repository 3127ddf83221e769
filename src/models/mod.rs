//! Core data models for the media registry.
//!
//! `MediaItem` maps to the `media_items` table via `sqlx::FromRow`;
//! `MediaView` is the JSON shape returned to clients.

pub mod media;
pub mod object_key;
pub mod upload;

pub use media::{MediaItem, MediaView, NewMediaItem};
pub use object_key::ObjectKey;
pub use upload::{UploadFile, UploadRequest};
