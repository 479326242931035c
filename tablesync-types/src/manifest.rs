//! File manifests.

use serde::{Deserialize, Serialize};

/// One file known to the server.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileManifestEntry {
    /// Row-path (row-level) or config-relative path (app and table level).
    pub filename: String,
    #[serde(default)]
    pub content_length: Option<u64>,
    #[serde(default)]
    pub content_type: Option<String>,
    /// `md5:<hex>` content hash.
    #[serde(rename = "md5hash", default)]
    pub md5_hash: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

impl FileManifestEntry {
    /// An entry naming only a path; used to request files for bulk download.
    pub fn named(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Default::default()
        }
    }
}

/// Manifest body as sent and received on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    #[serde(default)]
    pub files: Option<Vec<FileManifestEntry>>,
}

/// A fetched manifest with the ETag it was served under.
///
/// Fetch operations return `Option<FileManifestDocument>`; `None` means the
/// manifest is unchanged since the cached ETag, which is different from a
/// manifest that lists no files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileManifestDocument {
    pub etag: String,
    pub files: Vec<FileManifestEntry>,
}
