//! The object store seam.
//!
//! Handlers and pipelines only talk to `dyn ObjectStore`; the concrete
//! backend (S3 or local disk) is picked at startup from the config.

use crate::models::object::{ObjectMetadata, StoredObject};
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use thiserror::Error;

#[derive(Clone, Debug, Default)]
pub struct ListObjectsParams {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
    pub max_keys: usize,
}

#[derive(Debug, Default)]
pub struct ListObjectsResult {
    pub objects: Vec<StoredObject>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key `{0}`")]
    InvalidObjectKey(String),
    #[error("object store request failed: {0}")]
    Backend(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ObjectStoreError {
    /// True for the "does not exist" class of failures.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ObjectStoreError::ObjectNotFound { .. } | ObjectStoreError::BucketNotFound(_)
        )
    }
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// Keyed blob storage grouped into buckets.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;

    /// Names of every bucket visible to the gateway.
    async fn list_buckets(&self) -> ObjectStoreResult<Vec<String>>;

    /// One page of a bucket listing, ListObjectsV2 style.
    async fn list_objects(
        &self,
        bucket: &str,
        params: ListObjectsParams,
    ) -> ObjectStoreResult<ListObjectsResult>;

    /// Read a whole object into memory.
    async fn get_object(&self, bucket: &str, key: &str) -> ObjectStoreResult<Bytes>;

    /// Write (or overwrite) an object with the given user metadata.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: &ObjectMetadata,
    ) -> ObjectStoreResult<()>;

    /// Remove an object. Removing a missing object is not an error.
    async fn delete_object(&self, bucket: &str, key: &str) -> ObjectStoreResult<()>;

    /// Replace an object's user metadata in place.
    async fn replace_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> ObjectStoreResult<()>;
}

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects empty or overlong keys, keys that begin with `/`, contain `..`
/// segments, backslashes or control characters.
pub fn ensure_key_safe(key: &str) -> ObjectStoreResult<()> {
    const MAX_OBJECT_KEY_LEN: usize = 1024;

    let invalid = key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with('/')
        || key.split('/').any(|segment| segment == "..")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
    if invalid {
        return Err(ObjectStoreError::InvalidObjectKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_safety() {
        assert!(ensure_key_safe("alice-01-01-2024-00-00-00/a/b.txt").is_ok());
        assert!(ensure_key_safe("notes..txt").is_ok());
        assert!(ensure_key_safe("").is_err());
        assert!(ensure_key_safe("/etc/passwd").is_err());
        assert!(ensure_key_safe("a/../../b").is_err());
        assert!(ensure_key_safe("a\\b").is_err());
        assert!(ensure_key_safe(&"k".repeat(1025)).is_err());
    }

    #[test]
    fn not_found_classification() {
        let missing = ObjectStoreError::ObjectNotFound {
            bucket: "b".into(),
            key: "k".into(),
        };
        assert!(missing.is_not_found());
        assert!(!ObjectStoreError::Backend("timeout".into()).is_not_found());
    }
}
