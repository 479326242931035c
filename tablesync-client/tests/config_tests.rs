use tablesync_client::{BasicCredentials, SyncConfig, SyncError, Synchronizer, MemoryETagStore};
use std::sync::Arc;

#[test]
fn default_values() {
    let config = SyncConfig::default();
    assert_eq!(config.client_api_version, "2");
    assert_eq!(config.request_timeout_secs, 60);
    assert_eq!(config.download_attempts, 3);
    assert_eq!(config.max_batch_bytes, 10 * 1024 * 1024);
    assert!(config.compress_requests);
    assert!(config.credentials.is_none());
}

#[test]
fn server_root_trims_trailing_slashes() {
    let config = SyncConfig {
        server_url: "https://tables.example.org//".into(),
        ..Default::default()
    };
    assert_eq!(config.server_root(), "https://tables.example.org");
}

#[test]
fn config_deserializes_from_json() {
    let config: SyncConfig = serde_json::from_value(serde_json::json!({
        "server_url": "https://tables.example.org",
        "app_name": "survey",
        "installation_id": "dev-1",
        "client_api_version": "2",
        "credentials": { "username": "ann", "password": "pw" },
        "request_timeout_secs": 10,
        "download_attempts": 5,
        "max_batch_bytes": 1024,
        "compress_requests": false,
        "app_root": "/data/survey"
    }))
    .unwrap();

    assert_eq!(config.app_name, "survey");
    assert_eq!(config.download_attempts, 5);
    assert!(!config.compress_requests);
    let BasicCredentials { username, .. } = config.credentials.unwrap();
    assert_eq!(username, "ann");
}

#[test]
fn synchronizer_rejects_non_http_server() {
    let config = SyncConfig {
        server_url: "ftp://tables.example.org".into(),
        ..Default::default()
    };
    let result = Synchronizer::new(config, Arc::new(MemoryETagStore::new()));
    assert!(matches!(result, Err(SyncError::InvalidUrl { .. })));
}

#[test]
fn synchronizer_rejects_empty_app_name() {
    let config = SyncConfig {
        app_name: "  ".into(),
        ..Default::default()
    };
    let result = Synchronizer::new(config, Arc::new(MemoryETagStore::new()));
    assert!(matches!(result, Err(SyncError::InvalidArgument(_))));
}
