//! Upload pipeline: stage a batch of files (expanding zip archives), copy the
//! staged tree into the bucket under one `<username>-<timestamp>` prefix, and
//! record the batch as owned by the uploader.
//!
//! A batch is all-or-nothing. If any object write or the ownership record
//! fails, the objects already written for the batch are deleted again.

use crate::{
    models::{object::ObjectMetadata, user::is_valid_username},
    services::{
        listing::FOLDER_TIMESTAMP_FORMAT,
        object_store::{ObjectStore, ObjectStoreError},
        staging::{ARCHIVE_EXTENSION, StagingArea, StagingError},
        user_store::{UserStore, UserStoreError},
    },
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload contains no files")]
    EmptyBatch,
    #[error("invalid username `{0}`")]
    InvalidUser(String),
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error(transparent)]
    Store(#[from] ObjectStoreError),
    #[error(transparent)]
    Users(#[from] UserStoreError),
}

pub type UploadResult<T> = Result<T, UploadError>;

/// One file of an upload request.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub bytes: Bytes,
}

/// What a successful batch produced.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    /// Key prefix (without the trailing `/`) shared by every object of the batch.
    pub upload_id: String,
    pub keys: Vec<String>,
}

#[derive(Clone)]
pub struct UploadPipeline {
    objects: Arc<dyn ObjectStore>,
    users: Arc<dyn UserStore>,
    staging: StagingArea,
    bucket: String,
}

impl UploadPipeline {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        users: Arc<dyn UserStore>,
        staging: StagingArea,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            objects,
            users,
            staging,
            bucket: bucket.into(),
        }
    }

    /// Upload `files` for `username`, stamped with the current time.
    pub async fn upload(
        &self,
        username: &str,
        files: Vec<UploadFile>,
        metadata: &ObjectMetadata,
        description: &str,
    ) -> UploadResult<UploadReceipt> {
        self.upload_at(username, files, metadata, description, Utc::now())
            .await
    }

    pub async fn upload_at(
        &self,
        username: &str,
        files: Vec<UploadFile>,
        metadata: &ObjectMetadata,
        description: &str,
        now: DateTime<Utc>,
    ) -> UploadResult<UploadReceipt> {
        if !is_valid_username(username) {
            return Err(UploadError::InvalidUser(username.to_string()));
        }
        if files.is_empty() {
            return Err(UploadError::EmptyBatch);
        }

        let upload_id = upload_id(username, now);
        let staging = self.staging.acquire(&upload_id).await?;

        for file in files {
            if file.filename.to_ascii_lowercase().ends_with(ARCHIVE_EXTENSION) {
                debug!("expanding archive {}", file.filename);
                staging.extract_archive(file.bytes).await?;
            } else {
                staging.write_file(&file.filename, &file.bytes).await?;
            }
        }

        let staged = staging.files().await?;
        if staged.is_empty() {
            return Err(UploadError::EmptyBatch);
        }

        let mut written = Vec::with_capacity(staged.len());
        for (path, relative) in staged {
            let key = format!("{}/{}", upload_id, relative);
            let put = async {
                let body = Bytes::from(fs::read(&path).await?);
                self.objects
                    .put_object(&self.bucket, &key, body, metadata)
                    .await
            }
            .await;
            if let Err(err) = put {
                self.rollback(&written).await;
                return Err(err.into());
            }
            written.push(key);
        }

        if let Err(err) = self
            .users
            .record_upload(username, &upload_id, description)
            .await
        {
            self.rollback(&written).await;
            return Err(err.into());
        }

        debug!(
            "uploaded {} object(s) for {} under {}",
            written.len(),
            username,
            upload_id
        );
        Ok(UploadReceipt {
            upload_id,
            keys: written,
        })
    }

    /// Best-effort removal of the objects of a failed batch.
    async fn rollback(&self, keys: &[String]) {
        let results = join_all(
            keys.iter()
                .map(|key| self.objects.delete_object(&self.bucket, key)),
        )
        .await;
        for (key, result) in keys.iter().zip(results) {
            if let Err(err) = result {
                warn!("could not roll back {}: {}", key, err);
            }
        }
    }
}

/// `<username>-<dd-mm-yyyy-HH-MM-SS>`.
pub fn upload_id(username: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}", username, at.format(FOLDER_TIMESTAMP_FORMAT))
}
