//! LocalObjectStore: the object store backed by SQLite for metadata and
//! local disk for object payloads. Payloads are sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`.

use crate::{
    models::object::{ObjectMetadata, StoredObject},
    services::object_store::{
        ListObjectsParams, ListObjectsResult, ObjectStore, ObjectStoreError, ObjectStoreResult,
        ensure_key_safe,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// Row shape of the `objects` table.
#[derive(FromRow)]
struct ObjectRow {
    key: String,
    size_bytes: i64,
    etag: Option<String>,
    last_modified: DateTime<Utc>,
    metadata: String,
}

impl ObjectRow {
    fn into_object(self) -> ObjectStoreResult<StoredObject> {
        Ok(StoredObject {
            key: self.key,
            size_bytes: self.size_bytes,
            last_modified: Some(self.last_modified),
            etag: self.etag,
            metadata: serde_json::from_str(&self.metadata)?,
        })
    }
}

#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    fn ensure_bucket_name_safe(&self, name: &str) -> ObjectStoreResult<()> {
        let invalid = |reason: &str| ObjectStoreError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("..") {
            return Err(invalid("cannot contain consecutive dots"));
        }
        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard identifiers: the first two bytes of MD5(bucket/key) as hex.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Create the bucket row and directory if they do not exist yet.
    pub async fn ensure_bucket(&self, name: &str) -> ObjectStoreResult<()> {
        self.ensure_bucket_name_safe(name)?;
        fs::create_dir_all(self.bucket_root(name)).await?;
        sqlx::query("INSERT OR IGNORE INTO buckets (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(Utc::now())
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    async fn require_bucket(&self, bucket: &str) -> ObjectStoreResult<()> {
        self.ensure_bucket_name_safe(bucket)?;
        let found: Option<String> = sqlx::query_scalar("SELECT name FROM buckets WHERE name = ?")
            .bind(bucket)
            .fetch_optional(&*self.db)
            .await?;
        match found {
            Some(_) => Ok(()),
            None => Err(ObjectStoreError::BucketNotFound(bucket.to_string())),
        }
    }

    /// Write bytes to a temp file next to the target, fsync, then rename into place.
    async fn write_payload(&self, file_path: &Path, body: &[u8]) -> ObjectStoreResult<()> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            ObjectStoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(body).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, file_path).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }
        Ok(())
    }

    /// Recursively remove empty directories up to the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn list_buckets(&self) -> ObjectStoreResult<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM buckets ORDER BY name ASC")
            .fetch_all(&*self.db)
            .await?;
        Ok(names)
    }

    /// List objects following S3 ListObjectsV2 rules: prefix filtering,
    /// delimiter grouping, continuation tokens, lexicographical ordering.
    async fn list_objects(
        &self,
        bucket: &str,
        params: ListObjectsParams,
    ) -> ObjectStoreResult<ListObjectsResult> {
        self.require_bucket(bucket).await?;
        let max_keys = params.max_keys.clamp(1, 1000);
        let fetch_limit = max_keys + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT key, size_bytes, etag, last_modified, metadata FROM objects WHERE bucket = ",
        );
        builder.push_bind(bucket);

        if let Some(prefix) = &params.prefix {
            builder.push(" AND substr(key, 1, length(");
            builder.push_bind(prefix.clone());
            builder.push(")) = ");
            builder.push_bind(prefix.clone());
        }
        if let Some(token) = &params.continuation_token {
            builder.push(" AND key > ");
            builder.push_bind(token.clone());
        }

        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<ObjectRow> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut is_truncated = false;
        let mut next_continuation_token = None;
        if rows.len() == fetch_limit {
            rows.pop();
            next_continuation_token = rows.last().map(|row| row.key.clone());
            is_truncated = true;
        }

        let mut objects = Vec::new();
        let mut common_prefixes = BTreeSet::new();
        for row in rows {
            if let Some(delim) = &params.delimiter {
                if let Some(prefix) =
                    compute_common_prefix(&row.key, params.prefix.as_deref(), delim)
                {
                    common_prefixes.insert(prefix);
                    continue;
                }
            }
            objects.push(row.into_object()?);
        }

        Ok(ListObjectsResult {
            objects,
            common_prefixes: common_prefixes.into_iter().collect(),
            is_truncated,
            next_continuation_token,
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> ObjectStoreResult<Bytes> {
        ensure_key_safe(key)?;
        self.require_bucket(bucket).await?;
        let not_found = || ObjectStoreError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };

        let exists: Option<String> =
            sqlx::query_scalar("SELECT key FROM objects WHERE bucket = ? AND key = ?")
                .bind(bucket)
                .bind(key)
                .fetch_optional(&*self.db)
                .await?;
        if exists.is_none() {
            return Err(not_found());
        }

        match fs::read(self.object_path(bucket, key)).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(not_found()),
            Err(err) => Err(ObjectStoreError::Io(err)),
        }
    }

    /// Write the payload durably, then upsert the metadata row (S3-like
    /// overwrite semantics). The payload is removed again if the row write fails.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: &ObjectMetadata,
    ) -> ObjectStoreResult<()> {
        ensure_key_safe(key)?;
        self.require_bucket(bucket).await?;

        let file_path = self.object_path(bucket, key);
        self.write_payload(&file_path, &body).await?;

        let etag = format!("{:x}", md5::compute(&body));
        let result = sqlx::query(
            r#"
            INSERT INTO objects (bucket, key, size_bytes, etag, last_modified, metadata)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                metadata = excluded.metadata
            "#,
        )
        .bind(bucket)
        .bind(key)
        .bind(body.len() as i64)
        .bind(&etag)
        .bind(Utc::now())
        .bind(serde_json::to_string(metadata)?)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => {
                debug!("stored {} bytes at {}/{}", body.len(), bucket, key);
                Ok(())
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(ObjectStoreError::Sqlx(err))
            }
        }
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> ObjectStoreResult<()> {
        ensure_key_safe(key)?;
        self.require_bucket(bucket).await?;

        sqlx::query("DELETE FROM objects WHERE bucket = ? AND key = ?")
            .bind(bucket)
            .bind(key)
            .execute(&*self.db)
            .await?;

        let file_path = self.object_path(bucket, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(ObjectStoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }

    async fn replace_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> ObjectStoreResult<()> {
        ensure_key_safe(key)?;
        self.require_bucket(bucket).await?;

        let result = sqlx::query(
            "UPDATE objects SET metadata = ?, last_modified = ? WHERE bucket = ? AND key = ?",
        )
        .bind(serde_json::to_string(metadata)?)
        .bind(Utc::now())
        .bind(bucket)
        .bind(key)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ObjectStoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

/// Compute a synthetic "common prefix" for S3 list semantics.
///
/// Used only when a delimiter is provided. Returns Some(prefix) if the key
/// belongs to a grouped prefix, otherwise None.
fn compute_common_prefix(
    key: &str,
    requested_prefix: Option<&str>,
    delimiter: &str,
) -> Option<String> {
    let after_prefix = match requested_prefix {
        Some(prefix) => key.strip_prefix(prefix)?,
        None => key,
    };

    let pos = after_prefix.find(delimiter)?;
    let mut combined = String::new();
    if let Some(prefix) = requested_prefix {
        combined.push_str(prefix);
    }
    combined.push_str(&after_prefix[..pos + delimiter.len()]);
    Some(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    async fn store() -> (tempfile::TempDir, LocalObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(test_pool().await, dir.path().join("objects"));
        store.ensure_bucket("datasets").await.unwrap();
        (dir, store)
    }

    fn meta(pairs: &[(&str, &str)]) -> ObjectMetadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn put_then_get_returns_payload() {
        let (_dir, store) = store().await;
        store
            .put_object("datasets", "bob-x/a.txt", Bytes::from_static(b"hello"), &meta(&[]))
            .await
            .unwrap();

        let body = store.get_object("datasets", "bob-x/a.txt").await.unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn missing_objects_and_buckets_are_not_found() {
        let (_dir, store) = store().await;
        let err = store.get_object("datasets", "nope.txt").await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::ObjectNotFound { .. }));

        let err = store.get_object("other-bucket", "a").await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::BucketNotFound(_)));

        let err = store.get_object("Bad_Bucket", "a").await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::InvalidBucketName { .. }));
    }

    #[tokio::test]
    async fn listing_pages_with_continuation_token() {
        let (_dir, store) = store().await;
        for i in 0..5 {
            let key = format!("bob-x/file-{i}.txt");
            store
                .put_object("datasets", &key, Bytes::from_static(b"x"), &meta(&[]))
                .await
                .unwrap();
        }

        let first = store
            .list_objects(
                "datasets",
                ListObjectsParams {
                    max_keys: 3,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(first.objects.len(), 3);
        assert!(first.is_truncated);
        assert_eq!(
            first.next_continuation_token.as_deref(),
            Some("bob-x/file-2.txt")
        );

        let second = store
            .list_objects(
                "datasets",
                ListObjectsParams {
                    max_keys: 3,
                    continuation_token: first.next_continuation_token,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let keys: Vec<_> = second.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["bob-x/file-3.txt", "bob-x/file-4.txt"]);
        assert!(!second.is_truncated);
        assert!(second.next_continuation_token.is_none());
    }

    #[tokio::test]
    async fn delimiter_groups_top_level_prefixes() {
        let (_dir, store) = store().await;
        for key in ["alice-1/a.txt", "alice-1/b/c.txt", "bob-2/d.txt", "root.txt"] {
            store
                .put_object("datasets", key, Bytes::from_static(b"x"), &meta(&[]))
                .await
                .unwrap();
        }

        let result = store
            .list_objects(
                "datasets",
                ListObjectsParams {
                    delimiter: Some("/".into()),
                    max_keys: 100,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.common_prefixes, ["alice-1/", "bob-2/"]);
        assert_eq!(result.objects.len(), 1);
        assert_eq!(result.objects[0].key, "root.txt");
    }

    #[tokio::test]
    async fn metadata_is_replaced_not_merged() {
        let (_dir, store) = store().await;
        store
            .put_object(
                "datasets",
                "bob-x/a.txt",
                Bytes::from_static(b"x"),
                &meta(&[("Name", "Bob"), ("Age", "14")]),
            )
            .await
            .unwrap();
        store
            .replace_metadata("datasets", "bob-x/a.txt", &meta(&[("Name", "Sally")]))
            .await
            .unwrap();

        let listed = store
            .list_objects(
                "datasets",
                ListObjectsParams {
                    max_keys: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(listed.objects[0].metadata, meta(&[("Name", "Sally")]));

        let err = store
            .replace_metadata("datasets", "missing.txt", &meta(&[]))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_removes_payload_and_prunes_dirs() {
        let (_dir, store) = store().await;
        store
            .put_object("datasets", "bob-x/a.txt", Bytes::from_static(b"x"), &meta(&[]))
            .await
            .unwrap();
        let path = store.object_path("datasets", "bob-x/a.txt");
        assert!(path.exists());

        store.delete_object("datasets", "bob-x/a.txt").await.unwrap();
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
        assert!(store.bucket_root("datasets").exists());

        // deleting again is fine
        store.delete_object("datasets", "bob-x/a.txt").await.unwrap();
    }

    #[test]
    fn common_prefix_rules() {
        assert_eq!(
            compute_common_prefix("a/b/c", None, "/"),
            Some("a/".to_string())
        );
        assert_eq!(
            compute_common_prefix("a/b/c", Some("a/"), "/"),
            Some("a/b/".to_string())
        );
        assert_eq!(compute_common_prefix("a/b", Some("x/"), "/"), None);
        assert_eq!(compute_common_prefix("flat", None, "/"), None);
    }
}
