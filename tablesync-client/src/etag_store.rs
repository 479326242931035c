//! Local ETag cache contract.
//!
//! The host's local database remembers the last ETag observed for every
//! manifest and downloaded file so that later syncs can send conditional
//! requests. The synchronizer only needs the narrow get/set contract in
//! [`ETagStore`]; [`MemoryETagStore`] is an in-process implementation.
//!
//! Row-level manifests are additionally scoped by the attachment selection
//! they were fetched under. The selection is stored next to the tag and a
//! cached tag is only handed out again for an identical selection.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use thiserror::Error;

/// Errors raised by the local store.
#[derive(Debug, Error)]
pub enum ETagStoreError {
    #[error("local store unavailable: {0}")]
    Unavailable(String),
}

/// Which row attachments the caller wants to move during this sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttachmentState {
    Sync,
    Upload,
    Download,
    None,
    SyncWithDeletes,
    ReducedDownload,
}

impl AttachmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "SYNC",
            Self::Upload => "UPLOAD",
            Self::Download => "DOWNLOAD",
            Self::None => "NONE",
            Self::SyncWithDeletes => "SYNC_WITH_DELETES",
            Self::ReducedDownload => "REDUCED_DOWNLOAD",
        }
    }
}

impl fmt::Display for AttachmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The selection a row-level manifest was requested under.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentSelection {
    pub state: AttachmentState,
    pub attachment_set_hash: String,
}

impl AttachmentSelection {
    pub fn new(state: AttachmentState, attachment_set_hash: impl Into<String>) -> Self {
        Self {
            state,
            attachment_set_hash: attachment_set_hash.into(),
        }
    }

    /// Derives the set hash from the row-paths of a row's attachments.
    ///
    /// Order does not matter; the paths are sorted before hashing.
    pub fn from_rowpaths<S: AsRef<str>>(state: AttachmentState, rowpaths: &[S]) -> Self {
        let mut sorted: Vec<&str> = rowpaths.iter().map(AsRef::as_ref).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut hasher = Sha256::new();
        for path in sorted {
            hasher.update(path.as_bytes());
            hasher.update(b"\n");
        }
        Self::new(state, hex::encode(hasher.finalize()))
    }
}

/// Key of a manifest record.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ManifestKey {
    pub uri: String,
    pub table_id: Option<String>,
}

impl ManifestKey {
    pub fn new(uri: impl Into<String>, table_id: Option<&str>) -> Self {
        Self {
            uri: uri.into(),
            table_id: table_id.map(str::to_string),
        }
    }
}

/// A cached manifest ETag and, for row-level manifests, its selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestETagRecord {
    pub etag: String,
    pub selection: Option<AttachmentSelection>,
}

impl ManifestETagRecord {
    /// Returns the tag if it was recorded under `selection`.
    pub fn etag_for(&self, selection: Option<&AttachmentSelection>) -> Option<&str> {
        (self.selection.as_ref() == selection).then_some(self.etag.as_str())
    }
}

/// Key of a downloaded-file record. The local modification time is part of
/// the key so a locally edited file never matches its old tag.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FileETagKey {
    pub uri: String,
    pub table_id: Option<String>,
    pub last_modified: i64,
}

impl FileETagKey {
    pub fn new(uri: impl Into<String>, table_id: Option<&str>, last_modified: i64) -> Self {
        Self {
            uri: uri.into(),
            table_id: table_id.map(str::to_string),
            last_modified,
        }
    }
}

/// Get/set access to the host's ETag cache.
pub trait ETagStore: Send + Sync {
    fn get_file_etag(&self, key: &FileETagKey) -> Result<Option<String>, ETagStoreError>;

    fn update_file_etag(&self, key: FileETagKey, etag: &str) -> Result<(), ETagStoreError>;

    fn get_manifest_record(
        &self,
        key: &ManifestKey,
    ) -> Result<Option<ManifestETagRecord>, ETagStoreError>;

    /// Replaces the record for `key`; `None` removes it.
    fn update_manifest_record(
        &self,
        key: ManifestKey,
        record: Option<ManifestETagRecord>,
    ) -> Result<(), ETagStoreError>;

    /// Drops every record whose URI does not belong to `server_url`.
    fn delete_all_except_for_server(&self, server_url: &str) -> Result<(), ETagStoreError>;

    /// Records a new schema ETag and purges every tag that may have been
    /// computed under the old schema: records of `table_id` and records
    /// under `instance_files_uri`.
    fn schema_changed(
        &self,
        table_id: &str,
        new_schema_etag: &str,
        instance_files_uri: Option<&str>,
    ) -> Result<(), ETagStoreError>;
}

#[derive(Default)]
struct MemoryState {
    files: HashMap<FileETagKey, String>,
    manifests: HashMap<ManifestKey, ManifestETagRecord>,
    schema_etags: HashMap<String, String>,
}

/// In-process ETag store.
#[derive(Default)]
pub struct MemoryETagStore {
    state: RwLock<MemoryState>,
}

impl MemoryETagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema ETag last recorded through [`ETagStore::schema_changed`].
    pub fn schema_etag(&self, table_id: &str) -> Result<Option<String>, ETagStoreError> {
        let state = self.read()?;
        Ok(state.schema_etags.get(table_id).cloned())
    }

    /// Number of manifest and file records held.
    pub fn len(&self) -> Result<usize, ETagStoreError> {
        let state = self.read()?;
        Ok(state.files.len() + state.manifests.len())
    }

    pub fn is_empty(&self) -> Result<bool, ETagStoreError> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>, ETagStoreError> {
        self.state
            .read()
            .map_err(|_| ETagStoreError::Unavailable("etag store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryState>, ETagStoreError> {
        self.state
            .write()
            .map_err(|_| ETagStoreError::Unavailable("etag store lock poisoned".to_string()))
    }
}

impl ETagStore for MemoryETagStore {
    fn get_file_etag(&self, key: &FileETagKey) -> Result<Option<String>, ETagStoreError> {
        Ok(self.read()?.files.get(key).cloned())
    }

    fn update_file_etag(&self, key: FileETagKey, etag: &str) -> Result<(), ETagStoreError> {
        let mut state = self.write()?;
        // one record per file; an older modification time is stale
        state
            .files
            .retain(|k, _| !(k.uri == key.uri && k.table_id == key.table_id));
        state.files.insert(key, etag.to_string());
        Ok(())
    }

    fn get_manifest_record(
        &self,
        key: &ManifestKey,
    ) -> Result<Option<ManifestETagRecord>, ETagStoreError> {
        Ok(self.read()?.manifests.get(key).cloned())
    }

    fn update_manifest_record(
        &self,
        key: ManifestKey,
        record: Option<ManifestETagRecord>,
    ) -> Result<(), ETagStoreError> {
        let mut state = self.write()?;
        match record {
            Some(record) => {
                state.manifests.insert(key, record);
            }
            None => {
                state.manifests.remove(&key);
            }
        }
        Ok(())
    }

    fn delete_all_except_for_server(&self, server_url: &str) -> Result<(), ETagStoreError> {
        let mut state = self.write()?;
        state.files.retain(|k, _| is_under(&k.uri, server_url));
        state.manifests.retain(|k, _| is_under(&k.uri, server_url));
        Ok(())
    }

    fn schema_changed(
        &self,
        table_id: &str,
        new_schema_etag: &str,
        instance_files_uri: Option<&str>,
    ) -> Result<(), ETagStoreError> {
        let mut state = self.write()?;
        let stale = |uri: &str, tid: Option<&str>| {
            tid == Some(table_id) || instance_files_uri.is_some_and(|base| is_under(uri, base))
        };
        state
            .files
            .retain(|k, _| !stale(&k.uri, k.table_id.as_deref()));
        state
            .manifests
            .retain(|k, _| !stale(&k.uri, k.table_id.as_deref()));
        state
            .schema_etags
            .insert(table_id.to_string(), new_schema_etag.to_string());
        Ok(())
    }
}

/// True when `uri` is `base` itself or a path below it. A shared string
/// prefix is not enough: `http://h:80` does not contain `http://h:8080/x`.
fn is_under(uri: &str, base: &str) -> bool {
    let base = base.trim_end_matches('/');
    match uri.strip_prefix(base) {
        Some(rest) => rest.is_empty() || rest.starts_with(['/', '?']),
        None => false,
    }
}
