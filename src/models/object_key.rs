//! Object keys for uploaded blobs.
//!
//! A key has the shape `{unix_millis}-{token}-{filename}`. The token is a fresh
//! UUIDv4 (32 lowercase hex characters) so two uploads of the same filename in
//! the same millisecond still land on different keys.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const TOKEN_LEN: usize = 32;
const MAX_FILENAME_LEN: usize = 200;
const FALLBACK_FILENAME: &str = "upload";

/// Bucket-relative address of a single blob.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

/// Components recovered from a key produced by [`ObjectKey::derive`].
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedKey<'a> {
    pub created_at: DateTime<Utc>,
    pub token: &'a str,
    pub filename: &'a str,
}

impl ObjectKey {
    /// Derive a new key for `filename` stamped with the current time.
    pub fn derive(filename: &str) -> Self {
        Self::derive_at(Utc::now(), filename)
    }

    /// Derive a key with an explicit timestamp. The token is still random.
    pub fn derive_at(now: DateTime<Utc>, filename: &str) -> Self {
        let token = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}-{}-{}",
            now.timestamp_millis(),
            token,
            sanitize_filename(filename)
        ))
    }

    /// Wrap a key read back from a store without re-deriving it.
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Split a stored key into its parts. Returns `None` for keys that were
    /// not produced by `derive` (for example objects written out of band).
    pub fn parse(raw: &str) -> Option<ParsedKey<'_>> {
        let (millis, rest) = raw.split_once('-')?;
        if millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let millis: i64 = millis.parse().ok()?;
        if rest.len() < TOKEN_LEN + 1 {
            return None;
        }
        let (token, filename) = rest.split_at(TOKEN_LEN);
        if !token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return None;
        }
        let filename = filename.strip_prefix('-')?;
        if filename.is_empty() {
            return None;
        }
        let created_at = Utc.timestamp_millis_opt(millis).single()?;
        Some(ParsedKey {
            created_at,
            token,
            filename,
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Reduce a client-supplied filename to something safe to embed in a key.
///
/// Keeps only the last path segment, maps anything outside letters, digits,
/// `-`, `_`, `.` and space to `_`, collapses `..` runs and strips leading dots.
pub fn sanitize_filename(raw: &str) -> String {
    let last = raw.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(raw).trim();

    let mapped: String = last
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut collapsed = String::with_capacity(mapped.len());
    for c in mapped.chars() {
        if c == '.' && collapsed.ends_with('.') {
            continue;
        }
        collapsed.push(c);
    }

    let trimmed = collapsed.trim_start_matches('.').trim();
    let mut out = String::new();
    for c in trimmed.chars() {
        if out.len() + c.len_utf8() > MAX_FILENAME_LEN {
            break;
        }
        out.push(c);
    }

    if out.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        out
    }
}
