//! Listing rows returned to the web client.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

/// One file as shown by the dataset browser.
///
/// Field names are capitalized because existing clients read them that way.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct FileEntry {
    /// Last path segment of the key.
    pub name: String,

    /// Every segment except the last, joined with `/`.
    pub location: String,

    /// Second dot-separated segment of the name (`scan.png` → `png`).
    #[serde(rename = "Type")]
    pub file_type: Option<String>,

    pub last_modified: Option<DateTime<Utc>>,

    pub size: i64,

    /// Username parsed from the `<owner>-<timestamp>` folder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<String>,

    /// Upload time parsed from the `<owner>-<timestamp>` folder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_on: Option<NaiveDateTime>,
}
