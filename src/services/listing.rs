//! Listing, pagination, folder discovery and search over the dataset bucket.
//!
//! The pagination cursor never lives on the server: each page hands the
//! client an opaque token, and the client sends it back for the next page.

use crate::{
    models::{entry::FileEntry, object::StoredObject},
    services::object_store::{ListObjectsParams, ObjectStore, ObjectStoreError, ObjectStoreResult},
};
use base64::{Engine as _, engine::general_purpose};
use chrono::NaiveDateTime;
use std::collections::BTreeSet;
use tracing::debug;

/// Timestamp layout of the `<username>-<timestamp>` upload folder.
pub const FOLDER_TIMESTAMP_FORMAT: &str = "%d-%m-%Y-%H-%M-%S";
/// Rendered length of [`FOLDER_TIMESTAMP_FORMAT`], e.g. `28-02-2024-16-29-16`.
const FOLDER_TIMESTAMP_LEN: usize = 19;

const KEY_DELIMITER: &str = "/";
const SCAN_PAGE_SIZE: usize = 1000;

/// One page of entries plus the cursor the client needs for the next one.
#[derive(Debug)]
pub struct EntryPage {
    pub entries: Vec<FileEntry>,
    pub is_truncated: bool,
    /// Encoded continuation token, present only when truncated.
    pub next_token: Option<String>,
    /// Whether the store page itself had no objects at all.
    pub store_page_empty: bool,
}

/// Fetch one page of the bucket and shape it into entries.
///
/// `token` is a cursor previously returned by this function. When `folder`
/// is set, only objects whose first key segment equals it are kept; the
/// page size still counts every object the store returned.
pub async fn list_page(
    store: &dyn ObjectStore,
    bucket: &str,
    page_size: usize,
    token: Option<&str>,
    folder: Option<&str>,
) -> ObjectStoreResult<EntryPage> {
    let params = ListObjectsParams {
        continuation_token: token.map(decode_continuation_token),
        max_keys: page_size,
        ..Default::default()
    };
    let result = store.list_objects(bucket, params).await?;

    let store_page_empty = result.objects.is_empty();
    let entries = result
        .objects
        .iter()
        .filter(|obj| folder.is_none_or(|f| obj.key.split('/').next() == Some(f)))
        .map(file_entry)
        .collect();
    let next_token = if result.is_truncated {
        result
            .next_continuation_token
            .as_deref()
            .map(encode_continuation_token)
    } else {
        None
    };

    Ok(EntryPage {
        entries,
        is_truncated: next_token.is_some(),
        next_token,
        store_page_empty,
    })
}

/// Shape a stored object into the row the dataset browser shows.
pub fn file_entry(obj: &StoredObject) -> FileEntry {
    let segments: Vec<&str> = obj.key.split('/').collect();
    let (name, location) = match segments.split_last() {
        Some((last, rest)) => (last.to_string(), rest.join("/")),
        None => (obj.key.clone(), String::new()),
    };
    let file_type = name.split('.').nth(1).map(str::to_owned);

    let parsed = obj.owner_prefix().and_then(parse_upload_folder);
    if parsed.is_none() {
        debug!("no uploader information in key {}", obj.key);
    }
    let (uploaded_by, uploaded_on) = match parsed {
        Some((user, time)) => (Some(user), Some(time)),
        None => (None, None),
    };

    FileEntry {
        name,
        location,
        file_type,
        last_modified: obj.last_modified,
        size: obj.size_bytes,
        uploaded_by,
        uploaded_on,
    }
}

/// Split an upload folder `<username>-<dd-mm-yyyy-HH-MM-SS>` into its parts.
///
/// The timestamp is taken from the right, so usernames may contain `-`.
pub fn parse_upload_folder(folder: &str) -> Option<(String, NaiveDateTime)> {
    let (user, stamp) = split_upload_folder(folder)?;
    let time = NaiveDateTime::parse_from_str(stamp, FOLDER_TIMESTAMP_FORMAT).ok()?;
    Some((user.to_string(), time))
}

fn split_upload_folder(folder: &str) -> Option<(&str, &str)> {
    let split = folder.len().checked_sub(FOLDER_TIMESTAMP_LEN + 1)?;
    let (user, rest) = folder.split_at_checked(split)?;
    let stamp = rest.strip_prefix('-')?;
    if user.is_empty() {
        return None;
    }
    Some((user, stamp))
}

#[derive(Debug, PartialEq, Eq)]
pub enum FolderListingError {
    /// The bucket has no top-level prefixes at all.
    NoPrefixes,
    /// A prefix does not start with `<username>-`.
    UnexpectedKeySchema(String),
}

/// Every distinct top-level prefix of the bucket, across all pages.
pub async fn top_level_prefixes(
    store: &dyn ObjectStore,
    bucket: &str,
) -> ObjectStoreResult<Vec<String>> {
    let mut prefixes = BTreeSet::new();
    let mut token = None;
    loop {
        let result = store
            .list_objects(
                bucket,
                ListObjectsParams {
                    delimiter: Some(KEY_DELIMITER.into()),
                    continuation_token: token.take(),
                    max_keys: SCAN_PAGE_SIZE,
                    ..Default::default()
                },
            )
            .await?;
        prefixes.extend(result.common_prefixes);
        match result.next_continuation_token {
            Some(next) if result.is_truncated => token = Some(next),
            _ => break,
        }
    }
    Ok(prefixes.into_iter().collect())
}

/// Strip `<username>-` and the trailing delimiter from each prefix.
pub fn folder_names(prefixes: &[String]) -> Result<Vec<String>, FolderListingError> {
    if prefixes.is_empty() {
        return Err(FolderListingError::NoPrefixes);
    }
    prefixes
        .iter()
        .map(|prefix| {
            let trimmed = prefix.trim_end_matches(KEY_DELIMITER);
            if parse_upload_folder(trimmed).is_some() {
                if let Some((_, stamp)) = split_upload_folder(trimmed) {
                    return Ok(stamp.to_string());
                }
            }
            match trimmed.split_once('-') {
                Some((_, rest)) => Ok(rest.trim().to_string()),
                None => Err(FolderListingError::UnexpectedKeySchema(prefix.clone())),
            }
        })
        .collect()
}

/// Every object whose key contains `needle`, scanning the whole bucket.
pub async fn search(
    store: &dyn ObjectStore,
    bucket: &str,
    needle: &str,
) -> Result<Vec<StoredObject>, ObjectStoreError> {
    let mut matches = Vec::new();
    let mut token = None;
    loop {
        let result = store
            .list_objects(
                bucket,
                ListObjectsParams {
                    continuation_token: token.take(),
                    max_keys: SCAN_PAGE_SIZE,
                    ..Default::default()
                },
            )
            .await?;
        matches.extend(
            result
                .objects
                .into_iter()
                .filter(|obj| obj.key.contains(needle)),
        );
        match result.next_continuation_token {
            Some(next) if result.is_truncated => token = Some(next),
            _ => break,
        }
    }
    Ok(matches)
}

fn encode_continuation_token(token: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(token)
}

fn decode_continuation_token(token: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::test_pool, models::object::ObjectMetadata, services::local_store::LocalObjectStore,
    };
    use bytes::Bytes;
    use chrono::{Datelike, Timelike};

    async fn store_with(keys: &[&str]) -> (tempfile::TempDir, LocalObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(test_pool().await, dir.path());
        store.ensure_bucket("datasets").await.unwrap();
        for key in keys {
            store
                .put_object("datasets", key, Bytes::from_static(b"abc"), &ObjectMetadata::new())
                .await
                .unwrap();
        }
        (dir, store)
    }

    fn object(key: &str) -> StoredObject {
        StoredObject {
            key: key.into(),
            size_bytes: 42,
            last_modified: None,
            etag: None,
            metadata: ObjectMetadata::new(),
        }
    }

    #[test]
    fn entry_from_uploaded_key() {
        let entry = file_entry(&object("test_user-28-02-2024-16-29-16/scans/left.png"));
        assert_eq!(entry.name, "left.png");
        assert_eq!(entry.location, "test_user-28-02-2024-16-29-16/scans");
        assert_eq!(entry.file_type.as_deref(), Some("png"));
        assert_eq!(entry.size, 42);
        assert_eq!(entry.uploaded_by.as_deref(), Some("test_user"));
        let on = entry.uploaded_on.unwrap();
        assert_eq!((on.day(), on.month(), on.year()), (28, 2, 2024));
        assert_eq!((on.hour(), on.minute(), on.second()), (16, 29, 16));
    }

    #[test]
    fn entry_without_folder_convention_has_no_uploader() {
        let entry = file_entry(&object("misc/readme"));
        assert_eq!(entry.name, "readme");
        assert_eq!(entry.location, "misc");
        assert_eq!(entry.file_type, None);
        assert!(entry.uploaded_by.is_none());
        assert!(entry.uploaded_on.is_none());

        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("UploadedBy").is_none());
        assert!(json.get("Type").is_some());
    }

    #[test]
    fn folder_parsing() {
        assert!(parse_upload_folder("bob-01-02-2024-03-04-05").is_some());
        assert!(parse_upload_folder("bob-yesterday").is_none());
        assert!(parse_upload_folder("-01-02-2024-03-04-05").is_none());
        assert!(parse_upload_folder("bob").is_none());

        let (user, on) = parse_upload_folder("john-doe-01-02-2024-03-04-05").unwrap();
        assert_eq!(user, "john-doe");
        assert_eq!((on.day(), on.hour()), (1, 3));
    }

    #[test]
    fn folder_names_strip_username() {
        let prefixes = vec![
            "alice-01-03-2024-10-00-00/".to_string(),
            "bob-02-03-2024-11-00-00/".to_string(),
            "john-doe-03-03-2024-12-00-00/".to_string(),
        ];
        assert_eq!(
            folder_names(&prefixes).unwrap(),
            ["01-03-2024-10-00-00", "02-03-2024-11-00-00", "03-03-2024-12-00-00"]
        );
        assert_eq!(folder_names(&[]), Err(FolderListingError::NoPrefixes));
        assert_eq!(
            folder_names(&["plain/".to_string()]),
            Err(FolderListingError::UnexpectedKeySchema("plain/".into()))
        );
    }

    #[test]
    fn tokens_round_trip_and_tolerate_raw_values() {
        let encoded = encode_continuation_token("bob-1/a b.txt");
        assert!(!encoded.contains('/'));
        assert_eq!(decode_continuation_token(&encoded), "bob-1/a b.txt");
        assert_eq!(decode_continuation_token("not base64!"), "not base64!");
    }

    #[tokio::test]
    async fn pages_follow_the_client_cursor() {
        let keys: Vec<String> = (0..5).map(|i| format!("bob-1/f{i}.txt")).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let (_dir, store) = store_with(&refs).await;

        let first = list_page(&store, "datasets", 2, None, None).await.unwrap();
        assert_eq!(first.entries.len(), 2);
        assert!(first.is_truncated);

        let second = list_page(&store, "datasets", 2, first.next_token.as_deref(), None)
            .await
            .unwrap();
        let names: Vec<_> = second.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["f2.txt", "f3.txt"]);

        let third = list_page(&store, "datasets", 2, second.next_token.as_deref(), None)
            .await
            .unwrap();
        assert_eq!(third.entries.len(), 1);
        assert!(!third.is_truncated);
        assert!(third.next_token.is_none());
    }

    #[tokio::test]
    async fn folder_filter_keeps_one_upload() {
        let (_dir, store) = store_with(&["alice-1/a.txt", "bob-1/b.txt", "bob-1/c.txt"]).await;
        let page = list_page(&store, "datasets", 100, None, Some("bob-1"))
            .await
            .unwrap();
        let names: Vec<_> = page.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["b.txt", "c.txt"]);
        assert!(!page.store_page_empty);
    }

    #[tokio::test]
    async fn prefixes_and_search_scan_the_bucket() {
        let (_dir, store) =
            store_with(&["alice-1/a.txt", "alice-1/x/b.csv", "bob-2/b.txt", "loose.txt"]).await;

        assert_eq!(
            top_level_prefixes(&store, "datasets").await.unwrap(),
            ["alice-1/", "bob-2/"]
        );

        let found: Vec<String> = search(&store, "datasets", "b.")
            .await
            .unwrap()
            .into_iter()
            .map(|obj| obj.key)
            .collect();
        assert_eq!(found, ["alice-1/x/b.csv", "bob-2/b.txt"]);
    }
}
