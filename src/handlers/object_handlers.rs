//! Signed object downloads for the local backend.
//!
//! Bodies are streamed from disk by `tower-http`'s `ServeFile`, which also
//! answers `Range` and conditional requests so players can seek.

use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    http::{HeaderName, HeaderValue, header},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, warn};

use crate::{
    errors::AppError,
    state::AppState,
    storage::{
        QueryOverrides,
        signing::{ALLOWED_OVERRIDES, EXPIRES_PARAM, SIGNATURE_PARAM},
    },
};

/// `GET /objects/{bucket}/{*key}?expires=..&signature=..`
///
/// Objects in a public-read bucket are served without a signature.
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    request: Request<Body>,
) -> Result<Response, AppError> {
    let store = state
        .local
        .as_ref()
        .ok_or_else(|| AppError::not_found("objects are not served by this instance"))?;

    let overrides: QueryOverrides = query
        .iter()
        .filter(|(name, _)| ALLOWED_OVERRIDES.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    if !store.is_public(&bucket).await {
        let expires = query
            .get(EXPIRES_PARAM)
            .and_then(|value| value.parse::<i64>().ok())
            .ok_or_else(|| AppError::forbidden("url signature is missing or invalid"))?;
        let signature = query
            .get(SIGNATURE_PARAM)
            .ok_or_else(|| AppError::forbidden("url signature is missing or invalid"))?;
        if let Err(err) = store
            .signer()
            .verify(&bucket, &key, expires, signature, &overrides)
        {
            warn!(bucket = %bucket, key = %key, error = %err, "rejected object request");
            return Err(err.into());
        }
    }

    let path = store.readable_path(&bucket, &key).await?;
    debug!(bucket = %bucket, key = %key, "serving object");

    let mut response = match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    };

    if response.status().is_success() {
        let headers = response.headers_mut();
        for (name, header_name) in [
            ("response-content-type", header::CONTENT_TYPE),
            ("response-content-disposition", header::CONTENT_DISPOSITION),
        ] {
            apply_override(headers, &overrides, name, header_name);
        }
    }
    Ok(response)
}

fn apply_override(
    headers: &mut axum::http::HeaderMap,
    overrides: &QueryOverrides,
    name: &str,
    header_name: HeaderName,
) {
    if let Some(value) = overrides
        .get(name)
        .and_then(|value| HeaderValue::from_str(value).ok())
    {
        headers.insert(header_name, value);
    }
}
