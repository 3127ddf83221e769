use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::fmt;

use crate::{
    services::registry::{ConsistencyWarning, RegistryError},
    storage::{ObjectStoreError, signing::SignatureError},
};

/// HTTP-facing error. Carries the JSON body fields alongside the status.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
    pub field: Option<&'static str>,
    pub warning: Option<ConsistencyWarning>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, kind: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: msg.into(),
            field: None,
            warning: None,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "store_failure", msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", msg)
    }

    fn body(&self) -> Value {
        let mut body = json!({
            "error": self.message,
            "kind": self.kind,
            "status": self.status.as_u16(),
        });
        if let Some(field) = self.field {
            body["field"] = json!(field);
        }
        if let Some(warning) = &self.warning {
            body["warning"] = json!(warning);
        }
        body
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body())).into_response()
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        let message = err.to_string();
        let kind = err.kind();
        match err {
            RegistryError::Validation { field, .. } => Self {
                field: Some(field),
                ..Self::new(StatusCode::BAD_REQUEST, kind, message)
            },
            RegistryError::NotFound { .. } => Self::new(StatusCode::NOT_FOUND, kind, message),
            RegistryError::Store { warning, .. } => Self {
                warning,
                ..Self::new(StatusCode::INTERNAL_SERVER_ERROR, kind, message)
            },
        }
    }
}

impl From<ObjectStoreError> for AppError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::ObjectNotFound { .. } | ObjectStoreError::BucketNotFound(_) => {
                AppError::not_found(err.to_string())
            }
            ObjectStoreError::InvalidObjectKey(_) | ObjectStoreError::InvalidBucketName { .. } => {
                AppError::bad_request(err.to_string())
            }
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<SignatureError> for AppError {
    fn from(err: SignatureError) -> Self {
        AppError::forbidden(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
