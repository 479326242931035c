//! On-device layout of an application folder.
//!
//! ```text
//! {app_root}/
//!   config/...                                      app- and table-level files
//!   data/tables/{tableId}/instances/{safeRowId}/... row attachments
//! ```

use crate::error::{SyncError, SyncResult};
use md5::{Digest, Md5};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncReadExt;

const CONFIG_DIR: &str = "config";

/// Resolves local paths for config files and row attachments.
#[derive(Clone, Debug)]
pub struct AppLayout {
    root: PathBuf,
}

impl AppLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join(CONFIG_DIR)
    }

    /// Folder holding the attachments of one row.
    pub fn instance_dir(&self, table_id: &str, row_id: &str) -> PathBuf {
        self.root
            .join("data")
            .join("tables")
            .join(table_id)
            .join("instances")
            .join(safe_instance_folder_name(row_id))
    }

    /// Local file for a row-path (a path relative to the row's folder).
    pub fn rowpath_file(&self, table_id: &str, row_id: &str, rowpath: &str) -> SyncResult<PathBuf> {
        let relative = checked_relative(rowpath)?;
        Ok(self.instance_dir(table_id, row_id).join(relative))
    }

    /// Row-path of a file inside the row's folder.
    pub fn as_rowpath(&self, table_id: &str, row_id: &str, file: &Path) -> SyncResult<String> {
        let base = self.instance_dir(table_id, row_id);
        relative_uri_path(&base, file)
    }

    /// Local file for a config-relative path (`config/...` is implied).
    pub fn config_file(&self, relative_path: &str) -> SyncResult<PathBuf> {
        Ok(self.config_dir().join(checked_relative(relative_path)?))
    }

    /// Path of a config file relative to the app root, as used in
    /// config-file URIs (e.g. `config/assets/app.json`).
    pub fn as_config_relative_path(&self, file: &Path) -> SyncResult<String> {
        if !file.starts_with(self.config_dir()) {
            return Err(SyncError::InvalidArgument(format!(
                "{} is not under the config folder",
                file.display()
            )));
        }
        relative_uri_path(&self.root, file)
    }
}

/// Row ids may contain characters that are awkward in file names; every
/// ASCII punctuation or whitespace character becomes `_`.
pub fn safe_instance_folder_name(row_id: &str) -> String {
    row_id
        .chars()
        .map(|c| {
            if c.is_ascii_punctuation() || c.is_whitespace() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Content hash in the manifest format, `md5:<hex>`.
pub async fn md5_file_hash(path: &Path) -> SyncResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("md5:{}", hex::encode(hasher.finalize())))
}

/// Like [`md5_file_hash`] but `None` when the file does not exist.
pub async fn md5_file_hash_if_exists(path: &Path) -> SyncResult<Option<String>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => md5_file_hash(path).await.map(Some),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn checked_relative(path: &str) -> SyncResult<PathBuf> {
    if path.is_empty() {
        return Err(SyncError::InvalidArgument("empty relative path".to_string()));
    }
    let candidate = Path::new(path);
    let mut out = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SyncError::InvalidArgument(format!(
                    "path {path} escapes its base folder"
                )));
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(SyncError::InvalidArgument(format!("path {path} names no file")));
    }
    Ok(out)
}

fn relative_uri_path(base: &Path, file: &Path) -> SyncResult<String> {
    let relative = file.strip_prefix(base).map_err(|_| {
        SyncError::InvalidArgument(format!(
            "{} is not under {}",
            file.display(),
            base.display()
        ))
    })?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return Err(SyncError::InvalidArgument(format!(
            "{} names a folder, not a file",
            file.display()
        )));
    }
    Ok(parts.join("/"))
}
