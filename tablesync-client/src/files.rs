//! Config file and row attachment transfer.
//!
//! Downloads never leave a half-written destination: bodies are written to
//! `<dest>.tmp` and renamed over the destination only once fully received.

use crate::attachments::CommonFileAttachmentTerms;
use crate::error::{SyncError, SyncResult};
use crate::layout::md5_file_hash_if_exists;
use crate::multipart::{self, MultipartBuilder, MultipartEvent, MultipartParser};
use crate::retry::{BoundedRetry, RetryDecision};
use crate::synchronizer::Synchronizer;
use crate::transport::{
    self, CREATED_ONLY, CREATED_OR_ACCEPTED, OK_ONLY, OK_OR_NOT_MODIFIED, RestTransport,
    ServerResponse, determine_content_type,
};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use std::path::{Path, PathBuf};
use tablesync_types::{FileManifest, FileManifestEntry};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Result of a single-file download.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The destination was replaced with `bytes` bytes.
    Downloaded { bytes: u64 },
    /// The server reported the local copy current; nothing was written.
    NotModified,
}

/// What a batch download wrote.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchDownloadReport {
    /// Row-paths written, in arrival order.
    pub written: Vec<String>,
    /// Row-paths requested but not returned by the server.
    pub missing: Vec<String>,
}

impl BatchDownloadReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// An open temp file receiving one multipart part.
struct PartSink {
    rowpath: String,
    dest: PathBuf,
    tmp: PathBuf,
    file: fs::File,
}

fn temp_path(dest: &Path) -> SyncResult<PathBuf> {
    let name = dest.file_name().ok_or_else(|| {
        SyncError::InvalidArgument(format!("{} does not name a file", dest.display()))
    })?;
    let mut tmp_name = name.to_os_string();
    tmp_name.push(".tmp");
    Ok(dest.with_file_name(tmp_name))
}

async fn ensure_parent(path: &Path) -> SyncResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl Synchronizer {
    // ── Config files ──

    pub async fn upload_config_file(&self, local_file: &Path) -> SyncResult<()> {
        let relative = self.layout.as_config_relative_path(local_file)?;
        let uri = self.transport.endpoints().config_file(&relative);
        info!("uploading config file {relative}");

        let content = fs::read(local_file).await?;
        let filename = file_name_of(local_file);
        let request = self
            .transport
            .file_request(Method::POST, &uri, content, &filename);
        self.transport.execute(request, CREATED_OR_ACCEPTED).await?;
        Ok(())
    }

    pub async fn delete_config_file(&self, local_file: &Path) -> SyncResult<()> {
        let relative = self.layout.as_config_relative_path(local_file)?;
        let uri = self.transport.endpoints().config_file(&relative);
        info!("deleting config file {relative}");

        let request = self.transport.json_request(Method::DELETE, &uri);
        self.transport.execute(request, OK_ONLY).await?;
        Ok(())
    }

    // ── Single files ──

    pub async fn upload_instance_file(
        &self,
        file: &Path,
        instance_file_uri: &str,
    ) -> SyncResult<()> {
        info!("uploading instance file to {instance_file_uri}");
        let content = fs::read(file).await?;
        let filename = file_name_of(file);
        let request = self
            .transport
            .file_request(Method::POST, instance_file_uri, content, &filename);
        self.transport.execute(request, CREATED_ONLY).await?;
        Ok(())
    }

    /// Downloads `download_uri` onto `dest`.
    ///
    /// An existing destination is offered to the server by content hash and
    /// left alone on 304. Network failures are retried up to the configured
    /// number of attempts; anything else fails immediately.
    pub async fn download_file(
        &self,
        dest: &Path,
        download_uri: &str,
    ) -> SyncResult<DownloadOutcome> {
        let mut retry = BoundedRetry::new(self.config().download_attempts);
        loop {
            let attempt = retry.attempt();
            match self.download_file_once(dest, download_uri).await {
                Ok(outcome) => {
                    retry.record_success();
                    return Ok(outcome);
                }
                Err(e) => match retry.record_failure(e.is_transient()) {
                    RetryDecision::Retry => {
                        warn!(
                            "download of {download_uri} failed on attempt {attempt}, \
                             retrying: {e}"
                        );
                    }
                    RetryDecision::GiveUp => return Err(e),
                },
            }
        }
    }

    async fn download_file_once(
        &self,
        dest: &Path,
        download_uri: &str,
    ) -> SyncResult<DownloadOutcome> {
        let local_hash = md5_file_hash_if_exists(dest).await?;
        let request = RestTransport::conditional(
            self.transport.request(Method::GET, download_uri),
            local_hash.as_deref(),
        );

        let mut response = self.transport.execute(request, OK_OR_NOT_MODIFIED).await?;
        if response.status() == StatusCode::NOT_MODIFIED {
            info!("{download_uri} not modified, keeping local copy");
            return Ok(DownloadOutcome::NotModified);
        }

        ensure_parent(dest).await?;
        let tmp = temp_path(dest)?;
        let written = match write_body(&mut response, &tmp).await {
            Ok(written) => written,
            Err(e) => {
                warn!("download of {download_uri} aborted: {e}");
                let _ = fs::remove_file(&tmp).await;
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&tmp, dest).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!("downloaded {written} bytes to {}", dest.display());
        Ok(DownloadOutcome::Downloaded { bytes: written })
    }

    // ── Row attachments ──

    /// Resolves the local file and server URI of one row attachment.
    pub async fn create_common_file_attachment_terms(
        &self,
        instance_files_uri: &str,
        table_id: &str,
        row_id: &str,
        rowpath: &str,
    ) -> SyncResult<CommonFileAttachmentTerms> {
        let local_file = self.layout.rowpath_file(table_id, row_id, rowpath)?;
        let clean_rowpath = self.layout.as_rowpath(table_id, row_id, &local_file)?;
        let server_uri = transport::instance_file_uri(instance_files_uri, row_id, &clean_rowpath);
        let content_length = match fs::metadata(&local_file).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        Ok(CommonFileAttachmentTerms {
            rowpath: clean_rowpath,
            local_file,
            server_uri,
            content_length,
        })
    }

    /// Uploads several attachments of one row in a single multipart request.
    pub async fn upload_instance_file_batch(
        &self,
        batch: &[CommonFileAttachmentTerms],
        instance_files_uri: &str,
        row_id: &str,
        table_id: &str,
    ) -> SyncResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let uri = transport::bulk_upload_uri(instance_files_uri, row_id);

        let mut body = MultipartBuilder::with_random_boundary();
        for terms in batch {
            let rowpath = self.layout.as_rowpath(table_id, row_id, &terms.local_file)?;
            let content_type = determine_content_type(&file_name_of(&terms.local_file));
            let content = fs::read(&terms.local_file).await?;
            debug!("adding {rowpath} ({} bytes) to upload batch", content.len());
            body.add_file_part(&rowpath, content_type, &content);
        }
        info!("uploading {} attachments of {table_id}/{row_id}", body.part_count());

        let request = self.transport.multipart_request(Method::POST, &uri, body);
        self.transport.execute(request, CREATED_ONLY).await?;
        Ok(())
    }

    /// Downloads several attachments of one row in a single request and
    /// writes each returned part to its local row-path.
    pub async fn download_instance_file_batch(
        &self,
        batch: &[CommonFileAttachmentTerms],
        instance_files_uri: &str,
        row_id: &str,
        table_id: &str,
    ) -> SyncResult<BatchDownloadReport> {
        if batch.is_empty() {
            return Ok(BatchDownloadReport::default());
        }
        let uri = transport::bulk_download_uri(instance_files_uri, row_id);
        let wanted = FileManifest {
            files: Some(
                batch
                    .iter()
                    .map(|terms| FileManifestEntry::named(terms.rowpath.clone()))
                    .collect(),
            ),
        };
        let request = self.transport.request(Method::POST, &uri).json(&wanted);
        let mut response = self.transport.execute(request, OK_ONLY).await?;

        let boundary = response
            .header_str(CONTENT_TYPE.as_str())
            .as_deref()
            .and_then(multipart::boundary_from_content_type)
            .ok_or_else(|| {
                SyncError::version_mismatch(
                    "unable to extract boundary parameter",
                    response.exchange.clone(),
                )
            })?;

        let mut parser = MultipartParser::new(&boundary);
        let mut current: Option<PartSink> = None;
        let mut report = BatchDownloadReport::default();
        let received = self
            .receive_parts(&mut response, &mut parser, &mut current, &mut report, table_id, row_id)
            .await;
        if let Err(e) = received {
            if let Some(part) = current.take() {
                drop(part.file);
                let _ = fs::remove_file(&part.tmp).await;
            }
            return Err(e);
        }

        report.missing = batch
            .iter()
            .filter(|terms| !report.written.contains(&terms.rowpath))
            .map(|terms| terms.rowpath.clone())
            .collect();
        for rowpath in &report.missing {
            warn!("server did not return {rowpath} for {table_id}/{row_id}");
        }
        info!(
            "downloaded {} of {} attachments of {table_id}/{row_id}",
            report.written.len(),
            batch.len()
        );
        Ok(report)
    }

    async fn receive_parts(
        &self,
        response: &mut ServerResponse,
        parser: &mut MultipartParser,
        current: &mut Option<PartSink>,
        report: &mut BatchDownloadReport,
        table_id: &str,
        row_id: &str,
    ) -> SyncResult<()> {
        loop {
            while let Some(event) = parser.next_event()? {
                match event {
                    MultipartEvent::Headers(headers) => {
                        let rowpath = headers.filename().ok_or_else(|| {
                            SyncError::version_mismatch(
                                "server did not specify a row-path for a part",
                                response.exchange.clone(),
                            )
                        })?;
                        let dest = self.layout.rowpath_file(table_id, row_id, &rowpath)?;
                        ensure_parent(&dest).await?;
                        let tmp = temp_path(&dest)?;
                        let file = fs::File::create(&tmp).await?;
                        *current = Some(PartSink {
                            rowpath,
                            dest,
                            tmp,
                            file,
                        });
                    }
                    MultipartEvent::Data(bytes) => {
                        let part = current.as_mut().ok_or_else(|| {
                            SyncError::version_mismatch(
                                "part data before part headers",
                                response.exchange.clone(),
                            )
                        })?;
                        part.file.write_all(&bytes).await?;
                    }
                    MultipartEvent::PartEnd => {
                        if let Some(mut part) = current.take() {
                            part.file.flush().await?;
                            drop(part.file);
                            if let Err(e) = fs::rename(&part.tmp, &part.dest).await {
                                let _ = fs::remove_file(&part.tmp).await;
                                return Err(e.into());
                            }
                            debug!("received {}", part.rowpath);
                            report.written.push(part.rowpath);
                        }
                    }
                    MultipartEvent::Finished => return Ok(()),
                }
            }
            match response.chunk().await? {
                Some(chunk) => parser.feed(&chunk),
                None => parser.close_input(),
            }
        }
    }
}

async fn write_body(response: &mut ServerResponse, tmp: &Path) -> SyncResult<u64> {
    let mut file = fs::File::create(tmp).await?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}
