//! Sync client configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Basic credentials sent with every request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// Configuration for the synchronizer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Server base URL (e.g., "https://tables.example.org").
    pub server_url: String,

    /// Application name; scopes every REST path under `/odktables/{app}/`.
    pub app_name: String,

    /// Identifies this device installation to the server.
    pub installation_id: String,

    /// Client API version used in manifest and file paths.
    pub client_api_version: String,

    /// Optional credentials. Acquiring them is the host's job.
    pub credentials: Option<BasicCredentials>,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Total attempts for a single-file download (first try included).
    pub download_attempts: u32,

    /// Upper bound on the bytes packed into one bulk attachment request.
    pub max_batch_bytes: u64,

    /// Gzip JSON request bodies on writes.
    pub compress_requests: bool,

    /// Local application folder holding `config/` and `data/`.
    pub app_root: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: "https://localhost:8443".to_string(),
            app_name: "default".to_string(),
            installation_id: "unregistered".to_string(),
            client_api_version: "2".to_string(),
            credentials: None,
            request_timeout_secs: 60,
            download_attempts: 3,
            max_batch_bytes: 10 * 1024 * 1024, // 10 MiB
            compress_requests: true,
            app_root: PathBuf::from("opendatakit/default"),
        }
    }
}

impl SyncConfig {
    /// Server URL without trailing slashes.
    pub fn server_root(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }
}
