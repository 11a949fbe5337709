//! Download pipeline: fetch a list of keys into a staging directory and
//! compress whatever was found into a single zip archive.
//!
//! Missing keys are the normal case and only counted, as are keys that cannot
//! be laid out on disk next to the others (`a` and `a/b`). Any other store
//! failure aborts the request.

use crate::services::{
    object_store::{ObjectStore, ObjectStoreError, ensure_key_safe},
    staging::{StagingArea, StagingError},
};
use std::{collections::HashSet, sync::Arc};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Staging(#[from] StagingError),
    #[error(transparent)]
    Store(#[from] ObjectStoreError),
}

pub type DownloadResult<T> = Result<T, DownloadError>;

/// Result of one download request.
#[derive(Debug)]
pub struct DownloadOutcome {
    /// The zip archive, or `None` when no key resolved.
    pub archive: Option<NamedTempFile>,
    pub fetched: usize,
    pub not_found: usize,
}

#[derive(Clone)]
pub struct DownloadPipeline {
    objects: Arc<dyn ObjectStore>,
    staging: StagingArea,
}

impl DownloadPipeline {
    pub fn new(objects: Arc<dyn ObjectStore>, staging: StagingArea) -> Self {
        Self { objects, staging }
    }

    pub async fn download(&self, bucket: &str, keys: &[String]) -> DownloadResult<DownloadOutcome> {
        let staging = self.staging.acquire("download").await?;

        let mut seen = HashSet::new();
        let mut fetched = 0;
        let mut not_found = 0;
        for key in keys {
            if !seen.insert(key.as_str()) {
                debug!("ignoring repeated key {}", key);
                continue;
            }
            if ensure_key_safe(key).is_err() {
                warn!("skipping unsafe key {:?}", key);
                not_found += 1;
                continue;
            }
            match self.objects.get_object(bucket, key).await {
                Ok(body) => match staging.write_file(key, &body).await {
                    Ok(_) => fetched += 1,
                    Err(err) => {
                        warn!("cannot stage {} next to the other requested keys: {}", key, err);
                        not_found += 1;
                    }
                },
                Err(err) if err.is_not_found() => {
                    debug!("requested key {} not found", key);
                    not_found += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }

        let archive = if fetched > 0 {
            Some(staging.archive(self.staging.root()).await?)
        } else {
            None
        };

        info!(
            "download of {} key(s): {} fetched, {} not found",
            seen.len(),
            fetched,
            not_found
        );
        Ok(DownloadOutcome {
            archive,
            fetched,
            not_found,
        })
    }
}
