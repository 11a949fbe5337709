//! HTTP handlers for browsing the dataset bucket: bucket names, paged file
//! listings, upload folders and key search.

use crate::{
    errors::AppError,
    models::entry::FileEntry,
    services::listing::{self, EntryPage, FolderListingError},
    state::AppState,
};
use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderName, HeaderValue},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::debug;

pub const IS_TRUNCATED_HEADER: HeaderName = HeaderName::from_static("x-is-truncated");
pub const NEXT_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-next-continuation-token");

/// Query params accepted by the listing endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListingQuery {
    /// Cursor from the previous page's `x-next-continuation-token` header.
    pub token: Option<String>,
    /// Only show entries under this top-level folder.
    pub folder: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

/// `GET /` — names of every visible bucket.
pub async fn list_buckets(State(state): State<AppState>) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.objects.list_buckets().await?))
}

/// `GET /display_files` — first page of the bucket.
pub async fn display_files(
    State(state): State<AppState>,
    Query(q): Query<ListingQuery>,
) -> Result<Response, AppError> {
    let folder = q.folder.or_else(|| state.listing_folder.clone());
    let page = listing::list_page(
        state.objects.as_ref(),
        &state.bucket,
        state.page_size,
        None,
        folder.as_deref(),
    )
    .await?;
    listing_response(page)
}

/// `GET /next_page?token=…` — the page after the one that issued `token`.
pub async fn next_page(
    State(state): State<AppState>,
    Query(q): Query<ListingQuery>,
) -> Result<Response, AppError> {
    let Some(token) = q.token.filter(|t| !t.is_empty()) else {
        return Err(AppError::bad_request("No files to show"));
    };
    let folder = q.folder.or_else(|| state.listing_folder.clone());
    let page = listing::list_page(
        state.objects.as_ref(),
        &state.bucket,
        state.page_size,
        Some(&token),
        folder.as_deref(),
    )
    .await?;
    listing_response(page)
}

/// `GET /display_folders` — upload folders with the `<username>-` part removed.
pub async fn display_folders(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, AppError> {
    let prefixes = listing::top_level_prefixes(state.objects.as_ref(), &state.bucket).await?;
    match listing::folder_names(&prefixes) {
        Ok(names) => Ok(Json(names)),
        Err(FolderListingError::NoPrefixes) => Err(AppError::not_found(format!(
            "no folders found in bucket `{}`",
            state.bucket
        ))),
        Err(FolderListingError::UnexpectedKeySchema(prefix)) => Err(AppError::internal(format!(
            "folder `{}` does not follow the `username-` key schema",
            prefix
        ))),
    }
}

/// `GET /search?q=…` — every object whose key contains `q`.
pub async fn search(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<FileEntry>>, AppError> {
    let Some(needle) = q.q.filter(|n| !n.is_empty()) else {
        return Err(AppError::bad_request("missing search parameter `q`"));
    };
    let found = listing::search(state.objects.as_ref(), &state.bucket, &needle).await?;
    debug!("search {:?} matched {} object(s)", needle, found.len());
    Ok(Json(found.iter().map(listing::file_entry).collect()))
}

fn listing_response(page: EntryPage) -> Result<Response, AppError> {
    if page.store_page_empty {
        return Err(AppError::internal("Bucket is empty"));
    }

    let mut response = Json(page.entries).into_response();
    let headers = response.headers_mut();
    headers.insert(
        IS_TRUNCATED_HEADER,
        HeaderValue::from_static(if page.is_truncated { "true" } else { "false" }),
    );
    if let Some(token) = page.next_token {
        // base64url output is always a valid header value
        if let Ok(value) = HeaderValue::from_str(&token) {
            headers.insert(NEXT_TOKEN_HEADER, value);
        }
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::object::ObjectMetadata, state::test_state};
    use axum::http::StatusCode;
    use bytes::Bytes;

    async fn seed(state: &AppState, keys: &[&str]) {
        for key in keys {
            state
                .objects
                .put_object(&state.bucket, key, Bytes::from_static(b"x"), &ObjectMetadata::new())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn next_page_without_cursor_is_a_client_error() {
        let (_dir, state) = test_state(100).await;
        let err = next_page(State(state), Query(ListingQuery::default()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "No files to show");
    }

    #[tokio::test]
    async fn cursor_travels_through_headers() {
        let (_dir, state) = test_state(2).await;
        seed(&state, &["bob-1/a.txt", "bob-1/b.txt", "bob-1/c.txt"]).await;

        let first = display_files(State(state.clone()), Query(ListingQuery::default()))
            .await
            .unwrap();
        assert_eq!(first.headers()[&IS_TRUNCATED_HEADER], "true");
        let token = first.headers()[&NEXT_TOKEN_HEADER]
            .to_str()
            .unwrap()
            .to_string();

        let second = next_page(
            State(state),
            Query(ListingQuery {
                token: Some(token),
                folder: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(second.headers()[&IS_TRUNCATED_HEADER], "false");
        assert!(second.headers().get(&NEXT_TOKEN_HEADER).is_none());
    }

    #[tokio::test]
    async fn empty_bucket_reports_an_error() {
        let (_dir, state) = test_state(100).await;
        let err = display_files(State(state.clone()), Query(ListingQuery::default()))
            .await
            .unwrap_err();
        assert_eq!(err.message, "Bucket is empty");

        let err = display_folders(State(state)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn folders_and_buckets() {
        let (_dir, state) = test_state(100).await;
        seed(&state, &["alice-01-03-2024-10-00-00/a.txt", "bob-02-03-2024-11-00-00/b.txt"]).await;

        let Json(folders) = display_folders(State(state.clone())).await.unwrap();
        assert_eq!(folders, ["01-03-2024-10-00-00", "02-03-2024-11-00-00"]);

        let Json(buckets) = list_buckets(State(state.clone())).await.unwrap();
        assert_eq!(buckets, ["datasets"]);

        seed(&state, &["stray/file.txt"]).await;
        let err = display_folders(State(state)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn search_requires_a_needle() {
        let (_dir, state) = test_state(100).await;
        seed(&state, &["bob-1/scan.png", "bob-1/notes.txt"]).await;

        let err = search(State(state.clone()), Query(SearchQuery { q: None }))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let Json(found) = search(
            State(state),
            Query(SearchQuery {
                q: Some("scan".into()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "scan.png");
    }
}
