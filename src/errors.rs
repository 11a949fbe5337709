use crate::services::{
    download_service::DownloadError,
    object_store::ObjectStoreError,
    staging::StagingError,
    upload_service::UploadError,
    user_store::UserStoreError,
};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
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

impl From<ObjectStoreError> for AppError {
    fn from(err: ObjectStoreError) -> Self {
        match &err {
            ObjectStoreError::BucketNotFound(_) | ObjectStoreError::ObjectNotFound { .. } => {
                AppError::not_found(err.to_string())
            }
            ObjectStoreError::InvalidBucketName { .. } | ObjectStoreError::InvalidObjectKey(_) => {
                AppError::bad_request(err.to_string())
            }
            _ => AppError::internal(err.to_string()),
        }
    }
}

impl From<UserStoreError> for AppError {
    fn from(err: UserStoreError) -> Self {
        match &err {
            UserStoreError::UserNotFound(_) | UserStoreError::UploadNotListed { .. } => {
                AppError::not_found(err.to_string())
            }
            UserStoreError::Sqlx(_) => AppError::internal(err.to_string()),
        }
    }
}

impl From<StagingError> for AppError {
    fn from(err: StagingError) -> Self {
        match &err {
            StagingError::InvalidPath(_) | StagingError::Zip(_) => {
                AppError::bad_request(err.to_string())
            }
            _ => AppError::internal(err.to_string()),
        }
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::EmptyBatch | UploadError::InvalidUser(_) => {
                AppError::bad_request(err.to_string())
            }
            UploadError::Staging(inner) => inner.into(),
            UploadError::Store(inner) => inner.into(),
            UploadError::Users(inner) => inner.into(),
        }
    }
}

impl From<DownloadError> for AppError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::Staging(inner) => inner.into(),
            DownloadError::Store(inner) => AppError::internal(inner.to_string()),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}
