//! Defines routes for the movie catalogue.
//!
//! ## Structure
//! - **Catalogue endpoints**
//!   - `POST   /upload`       : multipart upload (`title`, `movie`, `poster`)
//!   - `GET    /movies`       : list every item
//!   - `GET    /movies/{id}`  : one item
//!   - `DELETE /movies/{id}`  : remove an item and its files
//!
//! - **Retrieval endpoints**
//!   - `GET /stream/{name}`   : 302 to a signed media URL
//!   - `GET /posters/{name}`  : 302 to a signed poster URL
//!   - `GET /objects/{bucket}/{*key}`: signed download (local backend)
//!
//! The wildcard `*key` allows nested keys like `2025/poster.png`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        media_handlers::{
            delete_media, get_media, list_media, poster_image, stream_media, upload_media,
        },
        object_handlers::get_object,
    },
    state::AppState,
};
use anyhow::{Context, Result};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Cross-cutting HTTP settings.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Frontend origin allowed by CORS.
    pub cors_origin: String,
    pub max_upload_bytes: u64,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            cors_origin: "http://localhost:3000".into(),
            max_upload_bytes: 5 * 1024 * 1024 * 1024,
        }
    }
}

/// Build the router without shared state attached.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/upload", post(upload_media))
        .route("/movies", get(list_media))
        .route("/movies/{id}", get(get_media).delete(delete_media))
        .route("/stream/{name}", get(stream_media))
        .route("/posters/{name}", get(poster_image))
        .route("/objects/{bucket}/{*key}", get(get_object))
}

/// The complete application: routes, state and middleware.
pub fn app(state: AppState, options: &RouterOptions) -> Result<Router> {
    let origin = options
        .cors_origin
        .parse::<HeaderValue>()
        .with_context(|| format!("invalid CORS origin `{}`", options.cors_origin))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::RANGE])
        .expose_headers([header::CONTENT_LENGTH, header::CONTENT_TYPE]);

    let body_limit = usize::try_from(options.max_upload_bytes).unwrap_or(usize::MAX);

    Ok(routes()
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}
