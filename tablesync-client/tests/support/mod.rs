#![allow(dead_code)]

//! Shared test helpers: client setup and an in-memory tables server that
//! keeps state across requests.

use flate2::read::GzDecoder;
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tablesync_client::multipart::{self, MultipartBuilder, MultipartEvent, MultipartParser};
use tablesync_client::{MemoryETagStore, SyncConfig, Synchronizer};
use tablesync_types::{
    FileManifest, Row, RowList, RowOutcome, RowOutcomeKind, RowOutcomeList, RowResource,
    RowResourceList, TableDefinition, TableDefinitionResource, TableResource,
};
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const APP: &str = "default";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config_for(server_uri: &str, app_root: &Path) -> SyncConfig {
    SyncConfig {
        server_url: server_uri.to_string(),
        app_name: APP.to_string(),
        installation_id: "test-installation".to_string(),
        request_timeout_secs: 5,
        app_root: app_root.to_path_buf(),
        ..Default::default()
    }
}

pub fn setup(server_uri: &str, app_root: &Path) -> (Synchronizer, Arc<MemoryETagStore>) {
    init_tracing();
    let store = Arc::new(MemoryETagStore::new());
    let sync = Synchronizer::new(config_for(server_uri, app_root), store.clone()).unwrap();
    (sync, store)
}

/// URIs the way the fake server lays them out.
pub fn table_resource(
    server_uri: &str,
    table_id: &str,
    schema_etag: &str,
    data_etag: Option<&str>,
) -> TableResource {
    let table_uri = format!("{server_uri}/odktables/{APP}/tables/{table_id}");
    let definition_uri = format!("{table_uri}/ref/{schema_etag}");
    TableResource {
        table_id: table_id.to_string(),
        data_etag: data_etag.map(str::to_string),
        schema_etag: schema_etag.to_string(),
        self_uri: Some(table_uri),
        data_uri: format!("{definition_uri}/rows"),
        diff_uri: format!("{definition_uri}/diff"),
        instance_files_uri: format!("{definition_uri}/attachments"),
        acl_uri: None,
        table_level_manifest_etag: None,
        definition_uri,
    }
}

pub fn gunzip(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    GzDecoder::new(body).read_to_end(&mut out).unwrap();
    out
}

pub fn md5_tag(content: &[u8]) -> String {
    format!("md5:{}", hex::encode(Md5::digest(content)))
}

/// Decodes a request body, undoing gzip when the request says so.
pub fn request_body(request: &Request) -> Vec<u8> {
    let gzipped = request
        .headers
        .get("content-encoding")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));
    if gzipped {
        gunzip(&request.body)
    } else {
        request.body.clone()
    }
}

/// Parses a whole multipart body into `(filename, bytes)` pairs.
pub fn parse_multipart(content_type: &str, body: &[u8]) -> Vec<(String, Vec<u8>)> {
    let boundary = multipart::boundary_from_content_type(content_type).unwrap();
    let mut parser = MultipartParser::new(&boundary);
    parser.feed(body);
    parser.close_input();

    let mut parts = Vec::new();
    let mut current: Option<(String, Vec<u8>)> = None;
    while let Some(event) = parser.next_event().unwrap() {
        match event {
            MultipartEvent::Headers(headers) => {
                current = Some((headers.filename().unwrap_or_default(), Vec::new()));
            }
            MultipartEvent::Data(bytes) => current.as_mut().unwrap().1.extend(bytes),
            MultipartEvent::PartEnd => parts.push(current.take().unwrap()),
            MultipartEvent::Finished => break,
        }
    }
    parts
}

/// A bare HTTP/1.1 server that answers every connection with `head`
/// followed by `chunks`, sleeping `pause` before each chunk, then closes.
/// Lets tests control pacing and truncation of a response body.
pub fn raw_http_server(head: String, chunks: Vec<Vec<u8>>, pause: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            if stream.write_all(head.as_bytes()).is_err() {
                continue;
            }
            for chunk in &chunks {
                thread::sleep(pause);
                if stream.write_all(chunk).and_then(|_| stream.flush()).is_err() {
                    break;
                }
            }
        }
    });
    format!("http://{addr}")
}

// ── Fake tables server ──

struct FakeRow {
    row: Row,
    changed_at: u64,
}

struct FakeTable {
    definition: TableDefinition,
    rows: Vec<FakeRow>,
    data_version: u64,
    files: HashMap<(String, String), Vec<u8>>,
}

impl FakeTable {
    fn data_etag(&self) -> Option<String> {
        (self.data_version > 0).then(|| format!("d{}", self.data_version))
    }
}

type SharedTables = Arc<Mutex<HashMap<String, FakeTable>>>;

/// A tables server that remembers tables, rows and attachments.
pub struct FakeTablesServer {
    server: MockServer,
    tables: SharedTables,
}

impl FakeTablesServer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let tables: SharedTables = Arc::default();
        Mock::given(any())
            .respond_with(FakeTables {
                tables: tables.clone(),
                server_uri: server.uri(),
            })
            .mount(&server)
            .await;
        Self { server, tables }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn server(&self) -> &MockServer {
        &self.server
    }

    pub fn stored_file(&self, table_id: &str, row_id: &str, rowpath: &str) -> Option<Vec<u8>> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(table_id)?
            .files
            .get(&(row_id.to_string(), rowpath.to_string()))
            .cloned()
    }

    pub fn store_file(&self, table_id: &str, row_id: &str, rowpath: &str, content: &[u8]) {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.get_mut(table_id).unwrap();
        table
            .files
            .insert((row_id.to_string(), rowpath.to_string()), content.to_vec());
    }

    /// Number of requests the server has seen so far.
    pub async fn request_count(&self) -> usize {
        self.server.received_requests().await.unwrap_or_default().len()
    }
}

struct FakeTables {
    tables: SharedTables,
    server_uri: String,
}

fn query_param(request: &Request, name: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

fn header(request: &Request, name: &str) -> Option<String> {
    request
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

impl Respond for FakeTables {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let path = request.url.path().to_string();
        let method = request.method.as_str().to_string();

        if path == "/odktables/" && method == "GET" {
            return ResponseTemplate::new(200).set_body_json(vec![APP]);
        }
        let Some(rest) = path.strip_prefix(&format!("/odktables/{APP}/tables/")) else {
            return ResponseTemplate::new(404);
        };
        let segments: Vec<&str> = rest.split('/').collect();
        let mut tables = self.tables.lock().unwrap();

        match (method.as_str(), segments.as_slice()) {
            ("PUT", [table_id]) => {
                let definition: TableDefinition =
                    serde_json::from_slice(&request_body(request)).unwrap();
                let table = tables
                    .entry(table_id.to_string())
                    .or_insert_with(|| FakeTable {
                        definition,
                        rows: Vec::new(),
                        data_version: 0,
                        files: HashMap::new(),
                    });
                ResponseTemplate::new(200).set_body_json(self.resource(table))
            }
            ("GET", [table_id, "ref", schema]) => match tables.get(*table_id) {
                Some(table) if table.definition.schema_etag == *schema => {
                    let resource = self.resource(table);
                    ResponseTemplate::new(200).set_body_json(TableDefinitionResource {
                        definition: table.definition.clone(),
                        self_uri: Some(resource.definition_uri),
                        table_uri: resource.self_uri,
                    })
                }
                _ => ResponseTemplate::new(404),
            },
            ("DELETE", [table_id, "ref", _]) => match tables.remove(*table_id) {
                Some(_) => ResponseTemplate::new(200),
                None => ResponseTemplate::new(404),
            },
            ("GET", [table_id, "ref", _, "rows"]) => match tables.get(*table_id) {
                Some(table) => {
                    let rows = table.rows.iter().filter(|r| !r.row.deleted).collect();
                    ResponseTemplate::new(200).set_body_json(self.row_page(table, rows))
                }
                None => ResponseTemplate::new(404),
            },
            ("GET", [table_id, "ref", _, "diff"]) => match tables.get(*table_id) {
                Some(table) => {
                    let since = query_param(request, "data_etag")
                        .and_then(|tag| tag.trim_start_matches('d').parse::<u64>().ok())
                        .unwrap_or(0);
                    let rows = table.rows.iter().filter(|r| r.changed_at > since).collect();
                    ResponseTemplate::new(200).set_body_json(self.row_page(table, rows))
                }
                None => ResponseTemplate::new(404),
            },
            ("PUT", [table_id, "ref", _, "rows"]) => match tables.get_mut(*table_id) {
                Some(table) => alter_rows(table, &request_body(request)),
                None => ResponseTemplate::new(404),
            },
            ("POST", [table_id, "ref", _, "attachments", row_id, "upload"]) => {
                let Some(table) = tables.get_mut(*table_id) else {
                    return ResponseTemplate::new(404);
                };
                let content_type = header(request, "content-type").unwrap_or_default();
                for (filename, bytes) in parse_multipart(&content_type, &request.body) {
                    table.files.insert((row_id.to_string(), filename), bytes);
                }
                ResponseTemplate::new(201)
            }
            ("POST", [table_id, "ref", _, "attachments", row_id, "download"]) => {
                let Some(table) = tables.get(*table_id) else {
                    return ResponseTemplate::new(404);
                };
                let wanted: FileManifest = serde_json::from_slice(&request.body).unwrap();
                let mut body = MultipartBuilder::new("fakeBoundary0123");
                for entry in wanted.files.unwrap_or_default() {
                    let key = (row_id.to_string(), entry.filename.clone());
                    if let Some(bytes) = table.files.get(&key) {
                        body.add_file_part(&entry.filename, "application/octet-stream", bytes);
                    }
                }
                let content_type = body.content_type();
                ResponseTemplate::new(200).set_body_raw(body.finish(), &content_type)
            }
            ("GET", [table_id, "ref", _, "attachments", row_id, "file", rowpath @ ..]) => {
                let Some(table) = tables.get(*table_id) else {
                    return ResponseTemplate::new(404);
                };
                let key = (row_id.to_string(), rowpath.join("/"));
                match table.files.get(&key) {
                    Some(bytes) if header(request, "if-none-match") == Some(md5_tag(bytes)) => {
                        ResponseTemplate::new(304)
                    }
                    Some(bytes) => ResponseTemplate::new(200).set_body_bytes(bytes.clone()),
                    None => ResponseTemplate::new(404),
                }
            }
            ("POST", [table_id, "ref", _, "attachments", row_id, "file", rowpath @ ..]) => {
                let Some(table) = tables.get_mut(*table_id) else {
                    return ResponseTemplate::new(404);
                };
                table
                    .files
                    .insert((row_id.to_string(), rowpath.join("/")), request.body.clone());
                ResponseTemplate::new(201)
            }
            _ => ResponseTemplate::new(404),
        }
    }
}

impl FakeTables {
    fn resource(&self, table: &FakeTable) -> TableResource {
        table_resource(
            &self.server_uri,
            &table.definition.table_id,
            &table.definition.schema_etag,
            table.data_etag().as_deref(),
        )
    }

    fn row_page(&self, table: &FakeTable, rows: Vec<&FakeRow>) -> RowResourceList {
        let resource = self.resource(table);
        RowResourceList {
            rows: rows
                .into_iter()
                .map(|r| RowResource {
                    row: r.row.clone(),
                    self_uri: Some(format!("{}/{}", resource.data_uri, r.row.row_id)),
                })
                .collect(),
            data_etag: table.data_etag(),
            table_uri: resource.self_uri,
            ..Default::default()
        }
    }
}

fn alter_rows(table: &mut FakeTable, body: &[u8]) -> ResponseTemplate {
    let list: RowList = serde_json::from_slice(body).unwrap();
    if list.data_etag != table.data_etag() {
        return ResponseTemplate::new(409);
    }

    let version = table.data_version + 1;
    let data_etag = format!("d{version}");
    let mut outcomes = Vec::with_capacity(list.rows.len());
    for (idx, mut row) in list.rows.into_iter().enumerate() {
        row.row_etag = Some(format!("r{version}-{idx}"));
        row.data_etag_at_modification = Some(data_etag.clone());
        match table.rows.iter_mut().find(|r| r.row.row_id == row.row_id) {
            Some(existing) => {
                existing.row = row.clone();
                existing.changed_at = version;
            }
            None => table.rows.push(FakeRow {
                row: row.clone(),
                changed_at: version,
            }),
        }
        outcomes.push(RowOutcome {
            row,
            outcome: RowOutcomeKind::Success,
        });
    }
    table.data_version = version;

    ResponseTemplate::new(200).set_body_json(RowOutcomeList {
        rows: outcomes,
        data_etag: Some(data_etag),
    })
}
