//! HTTP handlers that move files: batch upload, batch download as a zip,
//! and in-place object metadata replacement.

use crate::{
    errors::AppError,
    models::object::ObjectMetadata,
    services::upload_service::{UploadError, UploadFile},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, rejection::JsonRejection},
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{error, info};

pub const FILES_NOT_FOUND_HEADER: HeaderName = HeaderName::from_static("x-files-not-found");
const DOWNLOAD_DISPOSITION: &str = "attachment; filename=\"datasets.zip\"";
const INCORRECT_INPUT: &str = "Incorrect input format";

/// Body of `POST /download`.
#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub files: Option<Vec<String>>,
}

/// `POST /download` — zip every requested key that exists.
///
/// The archive is the response body; the number of keys that were not found
/// travels in the `x-files-not-found` header.
pub async fn download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Ok(Json(DownloadRequest { files: Some(files) })) = payload else {
        return Err(AppError::bad_request(INCORRECT_INPUT));
    };

    let outcome = state.downloads.download(&state.bucket, &files).await?;
    let Some(archive) = outcome.archive else {
        return Err(AppError::internal("requested file(s) not found"));
    };

    // the open handle keeps the unlinked archive readable while it streams
    let (file, path) = archive.into_parts();
    path.close().map_err(|err| AppError::internal(err.to_string()))?;
    let length = file.metadata().map(|m| m.len()).ok();
    let stream = ReaderStream::new(tokio::fs::File::from_std(file));

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static(DOWNLOAD_DISPOSITION),
    );
    if let Some(length) = length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    headers.insert(FILES_NOT_FOUND_HEADER, HeaderValue::from(outcome.not_found));

    info!(
        "sending archive with {} file(s), {} not found",
        outcome.fetched, outcome.not_found
    );
    Ok(response)
}

/// Fields collected from an upload form.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub files: Vec<UploadFile>,
    pub user: Option<String>,
    pub metadata: ObjectMetadata,
    pub description: String,
}

impl UploadForm {
    /// Read every multipart field. `files` (or `files[]`) may repeat;
    /// `metadata` must be a JSON object of strings.
    pub async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = UploadForm::default();
        let mut saw_files_field = false;
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "files" | "files[]" => {
                    saw_files_field = true;
                    let filename = field.file_name().unwrap_or_default().to_string();
                    let bytes = field.bytes().await?;
                    // browsers send an empty part when no file was picked
                    if filename.is_empty() && bytes.is_empty() {
                        continue;
                    }
                    form.files.push(UploadFile { filename, bytes });
                }
                "user" => form.user = Some(field.text().await?),
                "metadata" => {
                    let text = field.text().await?;
                    if !text.trim().is_empty() {
                        form.metadata = serde_json::from_str(&text).map_err(|err| {
                            AppError::bad_request(format!("invalid metadata: {}", err))
                        })?;
                    }
                }
                "description" => form.description = field.text().await?,
                _ => {}
            }
        }
        if !saw_files_field {
            return Err(AppError::bad_request(INCORRECT_INPUT));
        }
        Ok(form)
    }
}

/// `POST /upload` — stage and store one batch for a user.
///
/// Answers `true` on success and `false` when the object or user store
/// failed, whatever the store said; input problems are 400s.
pub async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<bool>, AppError> {
    let form = UploadForm::read(multipart).await?;
    let Some(user) = form.user.filter(|u| !u.trim().is_empty()) else {
        return Err(AppError::bad_request(INCORRECT_INPUT));
    };

    match state
        .uploads
        .upload(user.trim(), form.files, &form.metadata, &form.description)
        .await
    {
        Ok(receipt) => {
            info!(
                "stored {} object(s) for {} under {}",
                receipt.keys.len(),
                user,
                receipt.upload_id
            );
            Ok(Json(true))
        }
        Err(err) => {
            let store_failed = matches!(err, UploadError::Store(_) | UploadError::Users(_));
            let app_err = AppError::from(err);
            if app_err.status.is_client_error() && !store_failed {
                return Err(app_err);
            }
            error!("upload for {} failed: {}", user, app_err);
            Ok(Json(false))
        }
    }
}

/// `POST /metadata/{bucket}/{key}/{metadata}` — replace an object's metadata.
/// `metadata` is a JSON object of strings; it replaces, never merges.
pub async fn update_metadata(
    State(state): State<AppState>,
    Path((bucket, key, metadata)): Path<(String, String, String)>,
) -> Result<Json<bool>, AppError> {
    let metadata: ObjectMetadata = serde_json::from_str(&metadata)
        .map_err(|err| AppError::bad_request(format!("invalid metadata: {}", err)))?;
    state
        .objects
        .replace_metadata(&bucket, &key, &metadata)
        .await?;
    info!("replaced metadata of {}/{}", bucket, key);
    Ok(Json(true))
}
