//! HTTP handlers for the movie catalogue.
//!
//! Upload bodies are spooled to temporary files part by part, so memory use
//! stays flat regardless of file size.

use axum::{
    Json,
    extract::{
        Multipart, Path, State,
        multipart::{Field, MultipartError},
    },
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Serialize;
use tempfile::NamedTempFile;
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::debug;

use crate::{
    errors::AppError,
    models::{MediaView, UploadFile, UploadRequest},
    state::AppState,
};

#[derive(Serialize)]
pub struct UploadResponse {
    pub message: &'static str,
    #[serde(flatten)]
    pub media: MediaView,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// `POST /upload` with multipart fields `title`, `movie` and `poster`.
pub async fn upload_media(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut request = UploadRequest::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("title") => request.title = field.text().await.map_err(multipart_error)?,
            Some("movie") => request.media = spool(field).await?,
            Some("poster") => request.poster = spool(field).await?,
            other => debug!(field = ?other, "ignoring unexpected multipart field"),
        }
    }

    let media = state.registry.upload(request).await?;
    Ok(Json(UploadResponse {
        message: "Movie uploaded successfully",
        media,
    }))
}

/// `GET /movies`
pub async fn list_media(State(state): State<AppState>) -> Result<Json<Vec<MediaView>>, AppError> {
    Ok(Json(state.registry.list().await?))
}

/// `GET /movies/{id}`
pub async fn get_media(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MediaView>, AppError> {
    Ok(Json(state.registry.get(id).await?))
}

/// `DELETE /movies/{id}`
pub async fn delete_media(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    state.registry.delete(id).await?;
    Ok(Json(MessageResponse {
        message: "Movie deleted successfully",
    }))
}

/// `GET /stream/{name}` redirects to a short-lived signed URL.
pub async fn stream_media(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let url = state.registry.stream_url(&name).await?;
    Ok(found(url))
}

/// `GET /posters/{name}`
pub async fn poster_image(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let url = state.registry.poster_url(&name).await?;
    Ok(found(url))
}

fn found(url: String) -> impl IntoResponse {
    (
        StatusCode::FOUND,
        [(header::LOCATION, url), (header::CACHE_CONTROL, "no-store".to_string())],
    )
}

/// Copy one file field to a temporary file. A field with no filename and no
/// bytes (an empty file input) counts as absent.
async fn spool(mut field: Field<'_>) -> Result<Option<UploadFile>, AppError> {
    let filename = field.file_name().unwrap_or_default().to_string();
    let content_type = field.content_type().map(str::to_string);

    let temp = NamedTempFile::new()
        .map_err(|err| AppError::internal(format!("could not create spool file: {}", err)))?
        .into_temp_path();
    let mut file = File::create(&temp)
        .await
        .map_err(|err| AppError::internal(format!("could not open spool file: {}", err)))?;

    let mut written: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        written += chunk.len() as u64;
        file.write_all(&chunk)
            .await
            .map_err(|err| AppError::internal(format!("could not write spool file: {}", err)))?;
    }
    file.flush()
        .await
        .map_err(|err| AppError::internal(format!("could not write spool file: {}", err)))?;
    drop(file);

    if filename.is_empty() && written == 0 {
        return Ok(None);
    }
    let upload = UploadFile::from_spool(filename, content_type, temp)
        .await
        .map_err(|err| AppError::internal(format!("could not reopen spool file: {}", err)))?;
    Ok(Some(upload))
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), "validation", err.body_text())
}
