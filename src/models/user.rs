//! User and upload records kept in the user store.

use serde::{Deserialize, Serialize};

/// User type assigned when a user is created implicitly by an upload.
pub const DEFAULT_USER_TYPE: &str = "User";

/// Usernames become the first segment of object keys, so they must be
/// non-empty and free of path separators.
pub fn is_valid_username(username: &str) -> bool {
    !username.trim().is_empty() && !username.contains(['/', '\\'])
}

/// A registered user together with the uploads they own or may read.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Unique key.
    pub username: String,

    /// Free-form role string, e.g. "Validator" or "User".
    pub user_type: String,

    /// Upload identifiers owned by the user, oldest first.
    pub uploads: Vec<String>,

    /// Upload identifiers the user was granted read access to, oldest first.
    pub access_uploads: Vec<String>,
}

/// Metadata for one upload batch, keyed by its `<username>-<timestamp>` prefix.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub upload_id: String,
    pub description: String,
}
