use crate::services::{
    storage_service::StorageError,
    upload_service::{RejectReason, UploadError},
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Message keys returned to clients. Failure details only go to the log.
pub mod messages {
    pub const INVALID_FORMAT: &str = "api.media.invalidFormat";
    pub const NOT_CREATED: &str = "api.media.notCreated";
    pub const NOT_FOUND: &str = "api.media.notFound";
    pub const NOT_DELETED: &str = "api.media.notDeleted";
    pub const FILE_UNDEFINED: &str = "api.file.undefined";
    pub const INVALID_REQUEST: &str = "api.request.invalid";
    pub const INTERNAL: &str = "api.internal";
}

/// An HTTP-facing error: a status plus a stable message key.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn invalid_format() -> Self {
        Self::bad_request(messages::INVALID_FORMAT)
    }

    pub fn not_created() -> Self {
        Self::internal(messages::NOT_CREATED)
    }

    pub fn media_not_found() -> Self {
        Self::not_found(messages::NOT_FOUND)
    }

    pub fn not_deleted() -> Self {
        Self::internal(messages::NOT_DELETED)
    }

    pub fn file_undefined() -> Self {
        Self::bad_request(messages::FILE_UNDEFINED)
    }

    pub fn invalid_request() -> Self {
        Self::bad_request(messages::INVALID_REQUEST)
    }

    pub fn from_delete(err: StorageError) -> Self {
        match err {
            StorageError::MediaNotFound(_) => AppError::media_not_found(),
            other => {
                tracing::error!(error = %other, "failed to delete media");
                AppError::not_deleted()
            }
        }
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
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "internal error");
        AppError::internal(messages::INTERNAL)
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Rejected(RejectReason::MissingFile) => AppError::file_undefined(),
            UploadError::Rejected(_) | UploadError::Image(_) => AppError::invalid_format(),
            UploadError::Storage(_) | UploadError::Task(_) => AppError::not_created(),
        }
    }
}

/// Lookups and reads. Deletion maps its own failures in
/// [`AppError::from_delete`].
impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::MediaNotFound(_) | StorageError::FileNotFound(_) => {
                AppError::media_not_found()
            }
            StorageError::InvalidFilename => AppError::media_not_found(),
            other => {
                tracing::error!(error = %other, "storage failure");
                AppError::internal(messages::INTERNAL)
            }
        }
    }
}
