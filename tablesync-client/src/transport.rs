//! REST transport for the odktables API.
//!
//! Builds URIs for the fixed endpoint set, decorates requests with the
//! protocol headers, and executes them against an accepted status set.
//! Anything outside that set is turned into a [`SyncError`] carrying the
//! [`Exchange`] that produced it.

use crate::config::SyncConfig;
use crate::error::{Exchange, SyncError, SyncResult};
use crate::multipart::MultipartBuilder;
use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::header::{ACCEPT, CONTENT_ENCODING, CONTENT_TYPE, ETAG, HeaderMap, IF_NONE_MATCH};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::time::Duration;
use tracing::debug;

pub const OPEN_DATA_KIT_VERSION_HEADER: &str = "X-OpenDataKit-Version";
pub const OPEN_DATA_KIT_VERSION: &str = "2.0";
pub const INSTALLATION_ID_HEADER: &str = "X-OpenDataKit-Installation-Id";

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const USER_AGENT: &str = concat!("tablesync/", env!("CARGO_PKG_VERSION"));

// ── Accepted status sets ──

pub const OK_ONLY: &[StatusCode] = &[StatusCode::OK];
pub const OK_OR_NOT_FOUND: &[StatusCode] = &[StatusCode::OK, StatusCode::NOT_FOUND];
pub const OK_OR_NOT_MODIFIED: &[StatusCode] = &[StatusCode::OK, StatusCode::NOT_MODIFIED];
pub const CREATED_OR_ACCEPTED: &[StatusCode] = &[StatusCode::CREATED, StatusCode::ACCEPTED];
pub const CREATED_ONLY: &[StatusCode] = &[StatusCode::CREATED];

/// Content type for a file, guessed from its extension.
pub fn determine_content_type(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "js" => "application/x-javascript",
        "css" => "text/css",
        "json" => "application/json",
        "csv" => "text/csv",
        "xml" => "text/xml",
        "txt" => "text/plain",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "3gp" => "video/3gpp",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Encodes each `/`-separated segment of a relative path.
fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

fn with_query(uri: String, params: &[(&str, Option<String>)]) -> String {
    let query: Vec<String> = params
        .iter()
        .filter_map(|(name, value)| {
            value
                .as_ref()
                .map(|v| format!("{name}={}", urlencoding::encode(v)))
        })
        .collect();
    if query.is_empty() {
        uri
    } else {
        format!("{uri}?{}", query.join("&"))
    }
}

/// URI layout of one application on one server.
#[derive(Clone, Debug)]
pub struct Endpoints {
    server_root: String,
    app_name: String,
    api_version: String,
}

impl Endpoints {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            server_root: config.server_root().to_string(),
            app_name: config.app_name.clone(),
            api_version: config.client_api_version.clone(),
        }
    }

    pub fn server_root(&self) -> &str {
        &self.server_root
    }

    /// `{server}/odktables/`, which lists app names.
    pub fn app_names(&self) -> String {
        format!("{}/odktables/", self.server_root)
    }

    /// `{server}/odktables/{app}/`
    pub fn base(&self) -> String {
        format!("{}{}/", self.app_names(), encode_segment(&self.app_name))
    }

    pub fn user_roles(&self) -> String {
        format!("{}privilegesInfo", self.base())
    }

    pub fn users(&self) -> String {
        format!("{}usersInfo", self.base())
    }

    pub fn tables(&self, cursor: Option<&str>) -> String {
        with_query(
            format!("{}tables", self.base()),
            &[("cursor", cursor.map(str::to_string))],
        )
    }

    pub fn table(&self, table_id: &str) -> String {
        format!("{}tables/{}", self.base(), encode_segment(table_id))
    }

    /// The table as realized under one schema version.
    pub fn realized_table(&self, table_id: &str, schema_etag: &str) -> String {
        format!("{}/ref/{}", self.table(table_id), encode_segment(schema_etag))
    }

    pub fn app_manifest(&self) -> String {
        format!("{}manifest/{}", self.base(), encode_segment(&self.api_version))
    }

    pub fn table_manifest(&self, table_id: &str) -> String {
        format!("{}/{}", self.app_manifest(), encode_segment(table_id))
    }

    /// `relative_path` is relative to the app root, e.g. `config/assets/a.js`.
    pub fn config_file(&self, relative_path: &str) -> String {
        format!(
            "{}files/{}/{}",
            self.base(),
            encode_segment(&self.api_version),
            encode_path(relative_path)
        )
    }
}

fn row_base(instance_files_uri: &str, row_id: &str) -> String {
    format!(
        "{}/{}",
        instance_files_uri.trim_end_matches('/'),
        encode_segment(row_id)
    )
}

pub fn row_manifest_uri(instance_files_uri: &str, row_id: &str) -> String {
    format!("{}/manifest", row_base(instance_files_uri, row_id))
}

pub fn instance_file_uri(instance_files_uri: &str, row_id: &str, rowpath: &str) -> String {
    format!(
        "{}/file/{}",
        row_base(instance_files_uri, row_id),
        encode_path(rowpath)
    )
}

pub fn bulk_upload_uri(instance_files_uri: &str, row_id: &str) -> String {
    format!("{}/upload", row_base(instance_files_uri, row_id))
}

pub fn bulk_download_uri(instance_files_uri: &str, row_id: &str) -> String {
    format!("{}/download", row_base(instance_files_uri, row_id))
}

pub fn change_sets_uri(diff_uri: &str, data_etag: Option<&str>) -> String {
    with_query(
        format!("{}/changeSets", diff_uri.trim_end_matches('/')),
        &[("data_etag", data_etag.map(str::to_string))],
    )
}

pub fn change_set_uri(
    diff_uri: &str,
    data_etag: &str,
    active_only: bool,
    cursor: Option<&str>,
) -> String {
    with_query(
        format!(
            "{}/changeSets/{}",
            diff_uri.trim_end_matches('/'),
            encode_segment(data_etag)
        ),
        &[
            ("active_only", Some(active_only.to_string())),
            ("cursor", cursor.map(str::to_string)),
        ],
    )
}

pub fn data_page_uri(data_uri: &str, cursor: Option<&str>, fetch_limit: Option<u32>) -> String {
    with_query(
        data_uri.to_string(),
        &[
            ("cursor", cursor.map(str::to_string)),
            ("fetchLimit", fetch_limit.map(|n| n.to_string())),
        ],
    )
}

pub fn diff_page_uri(
    diff_uri: &str,
    data_etag: &str,
    cursor: Option<&str>,
    fetch_limit: Option<u32>,
) -> String {
    with_query(
        diff_uri.to_string(),
        &[
            ("data_etag", Some(data_etag.to_string())),
            ("cursor", cursor.map(str::to_string)),
            ("fetchLimit", fetch_limit.map(|n| n.to_string())),
        ],
    )
}

/// A response whose status was in the accepted set.
#[derive(Debug)]
pub struct ServerResponse {
    pub response: Response,
    pub exchange: Exchange,
}

impl ServerResponse {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    /// The `ETag` response header, unquoted as sent.
    pub fn etag(&self) -> Option<String> {
        self.header_str(ETAG.as_str())
    }

    pub fn header_str(&self, name: &str) -> Option<String> {
        self.response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// Reads the whole body.
    pub async fn bytes(self) -> SyncResult<Vec<u8>> {
        let exchange = self.exchange;
        match self.response.bytes().await {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(e) => Err(SyncError::network(exchange, e)),
        }
    }

    /// Next body chunk; `None` at end of body.
    pub async fn chunk(&mut self) -> SyncResult<Option<Vec<u8>>> {
        match self.response.chunk().await {
            Ok(chunk) => Ok(chunk.map(|b| b.to_vec())),
            Err(e) => Err(SyncError::network(self.exchange.clone(), e)),
        }
    }

    /// Decodes a JSON body. A body that does not fit `T` means the server
    /// speaks a different protocol revision.
    pub async fn json<T: DeserializeOwned>(self) -> SyncResult<T> {
        let exchange = self.exchange.clone();
        let body = self.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| {
            SyncError::version_mismatch(
                format!("unparseable response body: {e}"),
                exchange.with_body(&body),
            )
        })
    }
}

/// HTTP transport bound to one server and application.
pub struct RestTransport {
    client: Client,
    /// Whole-request limit for JSON calls. File transfers are only bounded
    /// by the per-read stall timeout.
    request_timeout: Duration,
    config: SyncConfig,
    endpoints: Endpoints,
}

impl RestTransport {
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        let root = config.server_root();
        if !(root.starts_with("http://") || root.starts_with("https://")) {
            return Err(SyncError::InvalidUrl {
                url: config.server_url.clone(),
                reason: "expected an http or https URL".to_string(),
            });
        }
        if config.app_name.trim().is_empty() {
            return Err(SyncError::InvalidArgument(
                "app name must not be empty".to_string(),
            ));
        }

        let timeout = Duration::from_secs(config.request_timeout_secs);
        let client = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            request_timeout: timeout,
            endpoints: Endpoints::new(&config),
            config,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    // ── Request builders ──

    /// A request carrying the protocol headers.
    pub fn request(&self, method: Method, uri: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, uri)
            .header(OPEN_DATA_KIT_VERSION_HEADER, OPEN_DATA_KIT_VERSION)
            .header(INSTALLATION_ID_HEADER, &self.config.installation_id);
        match &self.config.credentials {
            Some(creds) => builder.basic_auth(&creds.username, Some(&creds.password)),
            None => builder,
        }
    }

    /// A request for a JSON resource, bounded by the request timeout.
    pub fn json_request(&self, method: Method, uri: &str) -> RequestBuilder {
        self.request(method, uri)
            .header(ACCEPT, "application/json")
            .timeout(self.request_timeout)
    }

    /// A JSON request with a serialized body, gzipped when configured.
    pub fn json_body_request<T: Serialize + ?Sized>(
        &self,
        method: Method,
        uri: &str,
        body: &T,
    ) -> SyncResult<RequestBuilder> {
        let json = serde_json::to_vec(body)?;
        let builder = self
            .json_request(method, uri)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE);
        if self.config.compress_requests {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&json)?;
            let compressed = encoder.finish()?;
            Ok(builder.header(CONTENT_ENCODING, "gzip").body(compressed))
        } else {
            Ok(builder.body(json))
        }
    }

    /// A raw file upload.
    pub fn file_request(
        &self,
        method: Method,
        uri: &str,
        content: Vec<u8>,
        filename: &str,
    ) -> RequestBuilder {
        self.request(method, uri)
            .header(CONTENT_TYPE, determine_content_type(filename))
            .body(content)
    }

    pub fn multipart_request(
        &self,
        method: Method,
        uri: &str,
        body: MultipartBuilder,
    ) -> RequestBuilder {
        let content_type = body.content_type();
        self.request(method, uri)
            .header(CONTENT_TYPE, content_type)
            .body(body.finish())
    }

    /// Adds `If-None-Match` when a tag is known.
    pub fn conditional(builder: RequestBuilder, etag: Option<&str>) -> RequestBuilder {
        match etag {
            Some(tag) => builder.header(IF_NONE_MATCH, tag),
            None => builder,
        }
    }

    // ── Execution ──

    /// Sends a request and checks the status against `accepted`.
    ///
    /// Bodies of rejected responses are drained into the error's exchange.
    pub async fn execute(
        &self,
        request: RequestBuilder,
        accepted: &[StatusCode],
    ) -> SyncResult<ServerResponse> {
        let request = request.build()?;
        let exchange = Exchange::request(request.method().as_str(), request.url().as_str());
        debug!("{exchange}");

        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(e) => return Err(SyncError::network(exchange, e)),
        };

        let status = response.status();
        let exchange = exchange.with_status(status.as_u16());
        if accepted.contains(&status) {
            debug!("{exchange}");
            return Ok(ServerResponse { response, exchange });
        }

        let body = response.bytes().await.unwrap_or_default();
        let exchange = Box::new(exchange.with_body(&body));
        debug!("rejected: {exchange}");
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(SyncError::AccessDenied(exchange))
            }
            _ => Err(SyncError::UnexpectedStatus(exchange)),
        }
    }
}
