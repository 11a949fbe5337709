//! Routes of the dataset gateway.
//!
//! ## Structure
//! - **Browsing**
//!   - `GET  /` — bucket names
//!   - `GET  /display_files`, `GET /next_page?token=…` — paged file listing
//!   - `GET  /display_folders` — upload folders
//!   - `GET  /search?q=…` — key search
//!
//! - **Transfers**
//!   - `POST /upload` — multipart batch upload
//!   - `POST /download` — zip of the requested keys
//!   - `POST /metadata/{bucket}/{key}/{metadata}` — replace object metadata
//!
//! - **Users and uploads**
//!   - `POST /adduser`, `GET /getUserType/{username}`
//!   - `GET  /getUploads/{username}`, `GET /getDownloadedSets/{username}`
//!   - `POST /deleteSet/{username}/{filename}`, `POST /grantAccess/{username}/{upload_id}`
//!   - `GET  /fetchDescription/{filename}`, `/updateDescription/…`
//!
//! Object keys contain `/`, so the metadata route matches them percent-encoded
//! as a single segment.

use crate::{
    handlers::{
        bucket_handlers::{display_files, display_folders, list_buckets, next_page, search},
        health_handlers::{healthz, readyz},
        transfer_handlers::{download, update_metadata, upload},
        user_handlers::{
            add_user, delete_set, fetch_description, get_downloaded_sets, get_uploads,
            get_user_type, grant_access, update_description, update_description_in_path,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Uploads carry whole datasets; the default 2 MiB body limit is far too small.
const UPLOAD_BODY_LIMIT: usize = 1024 * 1024 * 1024;

/// Build the router; the caller attaches [`AppState`] with `with_state`.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // browsing
        .route("/", get(list_buckets))
        .route("/display_files", get(display_files))
        .route("/next_page", get(next_page))
        .route("/display_folders", get(display_folders))
        .route("/search", get(search))
        // transfers
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/download", post(download))
        .route("/metadata/{bucket}/{key}/{metadata}", post(update_metadata))
        // users and uploads
        .route("/adduser", post(add_user))
        .route("/getUploads/{username}", get(get_uploads))
        .route("/getDownloadedSets/{username}", get(get_downloaded_sets))
        .route("/getUserType/{username}", get(get_user_type))
        .route("/deleteSet/{username}/{filename}", post(delete_set))
        .route("/grantAccess/{username}/{upload_id}", post(grant_access))
        .route("/fetchDescription/{filename}", get(fetch_description))
        .route("/updateDescription/{filename}", post(update_description))
        .route(
            "/updateDescription/{filename}/{description}",
            get(update_description_in_path),
        )
}
