//! App-, table- and row-level file manifests.

use crate::error::{SyncError, SyncResult};
use crate::etag_store::{AttachmentSelection, AttachmentState};
use crate::synchronizer::Synchronizer;
use crate::transport::{self, OK_OR_NOT_MODIFIED, RestTransport};
use reqwest::{Method, StatusCode};
use tablesync_types::{FileManifest, FileManifestDocument};
use tracing::{debug, info, warn};

/// Which manifest is being fetched.
#[derive(Clone, Debug)]
pub enum ManifestScope<'a> {
    App,
    Table {
        table_id: &'a str,
    },
    Row {
        instance_files_uri: &'a str,
        table_id: &'a str,
        row_id: &'a str,
        selection: AttachmentSelection,
    },
}

impl ManifestScope<'_> {
    fn is_row(&self) -> bool {
        matches!(self, Self::Row { .. })
    }

    fn describe(&self) -> String {
        match self {
            Self::App => "app-level manifest".to_string(),
            Self::Table { table_id } => format!("table-level manifest of {table_id}"),
            Self::Row { table_id, row_id, .. } => {
                format!("row-level manifest of {table_id}/{row_id}")
            }
        }
    }
}

impl Synchronizer {
    /// Manifest of the app-level config files.
    ///
    /// Returns `None` when the manifest is unchanged since the cached ETag.
    /// `server_reported_etag` is the tag the server advertised in its table
    /// listing; when it equals the cached tag no request is made.
    pub async fn get_app_level_file_manifest(
        &self,
        push_local_files: bool,
        server_reported_etag: Option<&str>,
    ) -> SyncResult<Option<FileManifestDocument>> {
        self.get_file_manifest(ManifestScope::App, server_reported_etag, push_local_files)
            .await
    }

    pub async fn get_table_level_file_manifest(
        &self,
        table_id: &str,
        server_reported_etag: Option<&str>,
        push_local_files: bool,
    ) -> SyncResult<Option<FileManifestDocument>> {
        self.get_file_manifest(
            ManifestScope::Table { table_id },
            server_reported_etag,
            push_local_files,
        )
        .await
    }

    /// Manifest of one row's attachments. The cached tag is only used if it
    /// was recorded under the same attachment state and set hash.
    pub async fn get_row_level_file_manifest(
        &self,
        instance_files_uri: &str,
        table_id: &str,
        row_id: &str,
        attachment_state: AttachmentState,
        attachment_set_hash: &str,
    ) -> SyncResult<Option<FileManifestDocument>> {
        let scope = ManifestScope::Row {
            instance_files_uri,
            table_id,
            row_id,
            selection: AttachmentSelection::new(attachment_state, attachment_set_hash),
        };
        let manifest = self.get_file_manifest(scope, None, false).await?;
        if manifest.is_some() {
            info!("returning a row-level manifest for {row_id}");
        }
        Ok(manifest)
    }

    /// Fetches the manifest of any scope. Row scope never force-pushes and
    /// accepts an empty listing.
    pub async fn get_file_manifest(
        &self,
        scope: ManifestScope<'_>,
        server_reported_etag: Option<&str>,
        push_local_files: bool,
    ) -> SyncResult<Option<FileManifestDocument>> {
        let endpoints = self.transport.endpoints();
        let (uri, cached) = match &scope {
            ManifestScope::App => (endpoints.app_manifest(), self.get_manifest_sync_etag(None)),
            ManifestScope::Table { table_id } => (
                endpoints.table_manifest(table_id),
                self.get_manifest_sync_etag(Some(*table_id)),
            ),
            ManifestScope::Row {
                instance_files_uri,
                table_id,
                row_id,
                selection,
            } => (
                transport::row_manifest_uri(instance_files_uri, row_id),
                self.get_row_level_manifest_sync_etag(
                    instance_files_uri,
                    table_id,
                    row_id,
                    selection,
                ),
            ),
        };
        let cached = cached.unwrap_or_else(|e| {
            warn!("reading cached ETag for {} failed, ignoring: {e}", scope.describe());
            None
        });

        // a force-push needs the complete server listing
        let force_push = push_local_files && !scope.is_row();

        let mut request = self.transport.json_request(Method::GET, &uri);
        if !force_push && let Some(tag) = cached.as_deref() {
            request = RestTransport::conditional(request, Some(tag));
            if server_reported_etag == Some(tag) {
                debug!("{} unchanged, skipping request", scope.describe());
                return Ok(None);
            }
        }

        let response = self.transport.execute(request, OK_OR_NOT_MODIFIED).await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            debug!("{} not modified", scope.describe());
            return Ok(None);
        }

        let etag = response.etag().ok_or_else(|| {
            SyncError::version_mismatch(
                "manifest response has no ETag header",
                response.exchange.clone(),
            )
        })?;
        let exchange = response.exchange.clone();
        let manifest: Option<FileManifest> = response.json().await?;
        let files = manifest.and_then(|m| m.files).unwrap_or_default();

        if files.is_empty() && !push_local_files && !scope.is_row() {
            return Err(SyncError::MissingConfigForClientVersion {
                reason: format!("empty {}", scope.describe()),
                exchange: Box::new(exchange),
            });
        }

        Ok(Some(FileManifestDocument { etag, files }))
    }
}
