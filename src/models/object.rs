//! Represents an object (file) stored in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Free-form user metadata attached to an object. Replaced wholesale, never merged.
pub type ObjectMetadata = HashMap<String, String>;

/// Represents a single object (blob) within a bucket.
///
/// The struct carries the object's listing attributes, not its content bytes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoredObject {
    /// Object key (slash-delimited path within the bucket).
    pub key: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Timestamp when object was last modified.
    pub last_modified: Option<DateTime<Utc>>,

    /// Content hash reported by the store, if any.
    pub etag: Option<String>,

    /// User metadata. Only populated by stores that return it with listings.
    #[serde(default)]
    pub metadata: ObjectMetadata,
}

impl StoredObject {
    /// The "folder" segment of the key: everything before the first `/`.
    ///
    /// Keys uploaded through the gateway look like
    /// `<username>-<timestamp>/<relative path>`; keys without a `/` have no
    /// owner prefix.
    pub fn owner_prefix(&self) -> Option<&str> {
        self.key.split_once('/').map(|(prefix, _)| prefix)
    }
}
