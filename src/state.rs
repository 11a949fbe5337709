//! Shared state carried to every handler.

use crate::services::{
    download_service::DownloadPipeline,
    object_store::ObjectStore,
    staging::StagingArea,
    upload_service::UploadPipeline,
    user_store::UserStore,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub objects: Arc<dyn ObjectStore>,
    pub users: Arc<dyn UserStore>,
    pub staging: StagingArea,
    pub uploads: UploadPipeline,
    pub downloads: DownloadPipeline,
    /// Bucket holding the datasets.
    pub bucket: String,
    pub page_size: usize,
    /// Default folder filter for listings; `None` lists everything.
    pub listing_folder: Option<String>,
}

impl AppState {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        users: Arc<dyn UserStore>,
        staging: StagingArea,
        bucket: impl Into<String>,
        page_size: usize,
        listing_folder: Option<String>,
    ) -> Self {
        let bucket = bucket.into();
        Self {
            uploads: UploadPipeline::new(
                objects.clone(),
                users.clone(),
                staging.clone(),
                bucket.clone(),
            ),
            downloads: DownloadPipeline::new(objects.clone(), staging.clone()),
            objects,
            users,
            staging,
            bucket,
            page_size,
            listing_folder,
        }
    }
}

/// A fully wired state over an in-memory database and a temp directory.
#[cfg(test)]
pub async fn test_state(page_size: usize) -> (tempfile::TempDir, AppState) {
    use crate::{
        db::test_pool,
        services::{local_store::LocalObjectStore, user_store::SqliteUserStore},
    };

    let dir = tempfile::tempdir().unwrap();
    let pool = test_pool().await;
    let objects = LocalObjectStore::new(pool.clone(), dir.path().join("objects"));
    objects.ensure_bucket("datasets").await.unwrap();
    let state = AppState::new(
        Arc::new(objects),
        Arc::new(SqliteUserStore::new(pool)),
        StagingArea::new(dir.path().join("staging")),
        "datasets",
        page_size,
        None,
    );
    (dir, state)
}
