//! The synchronizer: one server, one application, one local ETag cache.
//!
//! Server-facing operations are split by concern across `manifest`, `rows`
//! and `files`; this module holds the shared state, the app/user discovery
//! calls and the ETag cache passthroughs.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::etag_store::{
    AttachmentSelection, ETagStore, FileETagKey, ManifestETagRecord, ManifestKey,
};
use crate::layout::AppLayout;
use crate::table_cache::TableResourceCache;
use crate::transport::{self, OK_ONLY, OK_OR_NOT_FOUND, RestTransport};
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use tablesync_types::{AppNameList, TableResource, TableResourceList};
use tracing::{debug, info};

/// One entry of the server's user listing. The shape is server-defined.
pub type UserInfo = serde_json::Map<String, serde_json::Value>;

pub struct Synchronizer {
    pub(crate) transport: RestTransport,
    pub(crate) etags: Arc<dyn ETagStore>,
    pub(crate) tables: TableResourceCache,
    pub(crate) layout: AppLayout,
}

impl Synchronizer {
    pub fn new(config: SyncConfig, etags: Arc<dyn ETagStore>) -> SyncResult<Self> {
        let layout = AppLayout::new(config.app_root.clone());
        Ok(Self {
            transport: RestTransport::new(config)?,
            etags,
            tables: TableResourceCache::new(),
            layout,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        self.transport.config()
    }

    pub fn transport(&self) -> &RestTransport {
        &self.transport
    }

    pub fn layout(&self) -> &AppLayout {
        &self.layout
    }

    /// Table resource last returned by [`Synchronizer::create_table`].
    pub async fn cached_table_resource(&self, table_id: &str) -> Option<TableResource> {
        self.tables.get(table_id).await
    }

    // ── Server discovery ──

    /// Confirms the server speaks the REST API and hosts this application.
    pub async fn verify_server_supports_app_name(&self) -> SyncResult<()> {
        let uri = self.transport.endpoints().app_names();
        let request = self.transport.json_request(Method::GET, &uri);
        let response = self
            .transport
            .execute(request, OK_OR_NOT_FOUND)
            .await
            .map_err(SyncError::connect_timeout_as_bad_config)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(SyncError::BadClientConfig {
                reason: "server does not implement the REST API".to_string(),
                exchange: Box::new(response.exchange),
            });
        }

        let exchange = response.exchange.clone();
        let app_names: AppNameList = response.json().await?;
        let app_name = &self.config().app_name;
        if !app_names.iter().any(|name| name == app_name) {
            return Err(SyncError::AppNameNotRecognized {
                app_name: app_name.clone(),
                exchange: Box::new(exchange),
            });
        }
        debug!("server hosts app {app_name}");
        Ok(())
    }

    /// Roles granted to the current user. Empty for anonymous callers and
    /// for servers that predate the roles endpoint.
    pub async fn get_user_roles(&self) -> SyncResult<Vec<String>> {
        let uri = self.transport.endpoints().user_roles();
        self.get_optional_listing(&uri).await
    }

    /// Users visible to the current user, with the same degradation rules as
    /// [`Synchronizer::get_user_roles`].
    pub async fn get_users(&self) -> SyncResult<Vec<UserInfo>> {
        let uri = self.transport.endpoints().users();
        self.get_optional_listing(&uri).await
    }

    async fn get_optional_listing<T: serde::de::DeserializeOwned>(
        &self,
        uri: &str,
    ) -> SyncResult<Vec<T>> {
        let request = self.transport.json_request(Method::GET, uri);
        let response = match self.transport.execute(request, OK_OR_NOT_FOUND).await {
            Ok(response) => response,
            Err(SyncError::AccessDenied(exchange)) => {
                debug!("anonymous caller ({exchange}), returning empty listing");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.connect_timeout_as_bad_config()),
        };
        if response.status() == StatusCode::NOT_FOUND {
            info!("{uri} not implemented by server, returning empty listing");
            return Ok(Vec::new());
        }
        response.json().await
    }

    /// One page of the server's table listing.
    pub async fn get_tables(&self, resume_cursor: Option<&str>) -> SyncResult<TableResourceList> {
        let uri = self.transport.endpoints().tables(resume_cursor);
        let request = self.transport.json_request(Method::GET, &uri);
        self.transport.execute(request, OK_ONLY).await?.json().await
    }

    // ── ETag cache ──

    fn manifest_key(&self, table_id: Option<&str>) -> ManifestKey {
        let endpoints = self.transport.endpoints();
        let uri = match table_id {
            Some(id) => endpoints.table_manifest(id),
            None => endpoints.app_manifest(),
        };
        ManifestKey::new(uri, table_id)
    }

    /// Cached ETag of the app-level (`None`) or a table-level manifest.
    pub fn get_manifest_sync_etag(&self, table_id: Option<&str>) -> SyncResult<Option<String>> {
        let record = self.etags.get_manifest_record(&self.manifest_key(table_id))?;
        Ok(record.and_then(|r| r.etag_for(None).map(str::to_string)))
    }

    /// Stores (or with `None`, clears) an app- or table-level manifest ETag.
    pub fn update_manifest_sync_etag(
        &self,
        table_id: Option<&str>,
        etag: Option<&str>,
    ) -> SyncResult<()> {
        let record = etag.map(|etag| ManifestETagRecord {
            etag: etag.to_string(),
            selection: None,
        });
        self.etags
            .update_manifest_record(self.manifest_key(table_id), record)?;
        Ok(())
    }

    fn row_manifest_key(
        &self,
        instance_files_uri: &str,
        table_id: &str,
        row_id: &str,
    ) -> ManifestKey {
        ManifestKey::new(
            transport::row_manifest_uri(instance_files_uri, row_id),
            Some(table_id),
        )
    }

    /// Cached row-level manifest ETag, only if it was recorded under the
    /// same attachment selection.
    pub fn get_row_level_manifest_sync_etag(
        &self,
        instance_files_uri: &str,
        table_id: &str,
        row_id: &str,
        selection: &AttachmentSelection,
    ) -> SyncResult<Option<String>> {
        let key = self.row_manifest_key(instance_files_uri, table_id, row_id);
        let record = self.etags.get_manifest_record(&key)?;
        Ok(record.and_then(|r| r.etag_for(Some(selection)).map(str::to_string)))
    }

    pub fn update_row_level_manifest_sync_etag(
        &self,
        instance_files_uri: &str,
        table_id: &str,
        row_id: &str,
        selection: &AttachmentSelection,
        etag: Option<&str>,
    ) -> SyncResult<()> {
        let key = self.row_manifest_key(instance_files_uri, table_id, row_id);
        let record = etag.map(|etag| ManifestETagRecord {
            etag: etag.to_string(),
            selection: Some(selection.clone()),
        });
        self.etags.update_manifest_record(key, record)?;
        Ok(())
    }

    pub fn get_file_sync_etag(
        &self,
        file_uri: &str,
        table_id: Option<&str>,
        last_modified: i64,
    ) -> SyncResult<Option<String>> {
        let key = FileETagKey::new(file_uri, table_id, last_modified);
        Ok(self.etags.get_file_etag(&key)?)
    }

    pub fn update_file_sync_etag(
        &self,
        file_uri: &str,
        table_id: Option<&str>,
        last_modified: i64,
        etag: &str,
    ) -> SyncResult<()> {
        let key = FileETagKey::new(file_uri, table_id, last_modified);
        self.etags.update_file_etag(key, etag)?;
        Ok(())
    }

    /// Forgets every tag recorded against another server.
    pub fn delete_all_sync_etags_except_for_current_server(&self) -> SyncResult<()> {
        let server = self.transport.endpoints().server_root().to_string();
        self.etags.delete_all_except_for_server(&server)?;
        Ok(())
    }

    /// Records a new schema ETag for a table and drops every document tag
    /// that may have been computed under the old schema.
    pub fn update_table_schema_etag_and_purge_potentially_changed_document_etags(
        &self,
        table_id: &str,
        new_schema_etag: &str,
        old_schema_etag: Option<&str>,
    ) -> SyncResult<()> {
        let old_realized_uri = old_schema_etag.map(|old| {
            self.transport
                .endpoints()
                .realized_table(table_id, old)
        });
        self.etags
            .schema_changed(table_id, new_schema_etag, old_realized_uri.as_deref())?;
        Ok(())
    }
}
