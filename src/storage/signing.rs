//! Capability URLs for the local backend.
//!
//! A signed URL looks like
//! `{base}/objects/{bucket}/{key}?expires={unix_secs}&signature={mac}[&response-…=…]`
//! where `mac` is HMAC-SHA256 over the method, bucket, key, expiry and the
//! sorted response overrides, encoded as unpadded URL-safe base64.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

use super::{ObjectStoreError, ObjectStoreResult, QueryOverrides};

type HmacSha256 = Hmac<Sha256>;

/// Longest lifetime accepted for a presigned URL (seven days, as on S3).
pub const MAX_URL_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub const EXPIRES_PARAM: &str = "expires";
pub const SIGNATURE_PARAM: &str = "signature";

/// Overrides a signed URL may carry. Anything else is rejected at signing time.
pub const ALLOWED_OVERRIDES: [&str; 2] = ["response-content-type", "response-content-disposition"];

const QUERY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');
const PATH: &AsciiSet = &QUERY.remove(b'/');

/// Percent-encode a key for use in a URL path; `/` is kept as a separator.
pub fn encode_path(key: &str) -> String {
    utf8_percent_encode(key, PATH).to_string()
}

/// Percent-encode a query value or a single path segment (`/` is escaped).
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, QUERY).to_string()
}

/// Check a URL lifetime and return it in whole seconds.
pub fn validate_ttl(ttl: Duration) -> ObjectStoreResult<u32> {
    if ttl.is_zero() {
        return Err(ObjectStoreError::InvalidTtl("must be positive".into()));
    }
    if ttl > MAX_URL_TTL {
        return Err(ObjectStoreError::InvalidTtl(format!(
            "{}s exceeds the {}s maximum",
            ttl.as_secs(),
            MAX_URL_TTL.as_secs()
        )));
    }
    Ok(ttl.as_secs().max(1) as u32)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("url has expired")]
    Expired,
    #[error("url signature is missing or invalid")]
    Invalid,
}

#[derive(Clone)]
pub struct UrlSigner {
    /// Keyed once; cloned per signature.
    keyed: HmacSha256,
    base_url: String,
}

impl UrlSigner {
    /// `base_url` is the externally reachable origin of this service,
    /// e.g. `http://localhost:8000`.
    pub fn new(secret: impl AsRef<[u8]>, base_url: impl Into<String>) -> ObjectStoreResult<Self> {
        let keyed = HmacSha256::new_from_slice(secret.as_ref())
            .map_err(|err| ObjectStoreError::Backend(format!("invalid signing secret: {}", err)))?;
        Ok(Self {
            keyed,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn sign(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
        overrides: &QueryOverrides,
    ) -> ObjectStoreResult<String> {
        self.sign_at(Utc::now(), bucket, key, ttl, overrides)
    }

    /// Build a signed URL as of `now`.
    pub fn sign_at(
        &self,
        now: DateTime<Utc>,
        bucket: &str,
        key: &str,
        ttl: Duration,
        overrides: &QueryOverrides,
    ) -> ObjectStoreResult<String> {
        let ttl_secs = validate_ttl(ttl)?;
        if let Some(name) = overrides
            .keys()
            .find(|name| !ALLOWED_OVERRIDES.contains(&name.as_str()))
        {
            return Err(ObjectStoreError::Backend(format!(
                "unsupported url override `{}`",
                name
            )));
        }

        let expires = now.timestamp() + i64::from(ttl_secs);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(bucket, key, expires, overrides));

        let mut url = format!(
            "{}/objects/{}/{}?{}={}&{}={}",
            self.base_url,
            encode_path(bucket),
            encode_path(key),
            EXPIRES_PARAM,
            expires,
            SIGNATURE_PARAM,
            signature
        );
        for (name, value) in overrides {
            url.push('&');
            url.push_str(name);
            url.push('=');
            url.push_str(&encode_component(value));
        }
        Ok(url)
    }

    pub fn verify(
        &self,
        bucket: &str,
        key: &str,
        expires: i64,
        signature: &str,
        overrides: &QueryOverrides,
    ) -> Result<(), SignatureError> {
        self.verify_at(Utc::now(), bucket, key, expires, signature, overrides)
    }

    /// Check a signature as of `now`. The signature is checked before the
    /// expiry so a forged URL never reports itself as merely expired.
    pub fn verify_at(
        &self,
        now: DateTime<Utc>,
        bucket: &str,
        key: &str,
        expires: i64,
        signature: &str,
        overrides: &QueryOverrides,
    ) -> Result<(), SignatureError> {
        let provided = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SignatureError::Invalid)?;

        let mut mac = self.keyed.clone();
        mac.update(canonical(bucket, key, expires, overrides).as_bytes());
        mac.verify_slice(&provided)
            .map_err(|_| SignatureError::Invalid)?;

        if now.timestamp() >= expires {
            return Err(SignatureError::Expired);
        }
        Ok(())
    }

    fn mac(&self, bucket: &str, key: &str, expires: i64, overrides: &QueryOverrides) -> Vec<u8> {
        let mut mac = self.keyed.clone();
        mac.update(canonical(bucket, key, expires, overrides).as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

fn canonical(bucket: &str, key: &str, expires: i64, overrides: &QueryOverrides) -> String {
    let query = overrides
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("&");
    format!("GET\n{}\n{}\n{}\n{}", bucket, key, expires, query)
}
