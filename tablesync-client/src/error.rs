//! Sync error types.

use crate::etag_store::ETagStoreError;
use crate::multipart::MultipartError;
use std::fmt;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Longest response body excerpt kept for diagnostics.
const BODY_EXCERPT_LIMIT: usize = 512;

/// Request/response summary attached to protocol-level errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exchange {
    pub method: String,
    pub uri: String,
    pub status: Option<u16>,
    pub body_excerpt: Option<String>,
}

impl Exchange {
    pub fn request(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            status: None,
            body_excerpt: None,
        }
    }

    pub(crate) fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub(crate) fn with_body(mut self, body: &[u8]) -> Self {
        if !body.is_empty() {
            let end = body.len().min(BODY_EXCERPT_LIMIT);
            self.body_excerpt = Some(String::from_utf8_lossy(&body[..end]).into_owned());
        }
        self
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.uri)?;
        if let Some(status) = self.status {
            write!(f, " -> {status}")?;
        }
        Ok(())
    }
}

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The server does not speak the expected API or did not answer at all.
    #[error("bad client configuration: {reason} ({exchange})")]
    BadClientConfig {
        reason: String,
        exchange: Box<Exchange>,
    },

    #[error("server does not recognize app name {app_name} ({exchange})")]
    AppNameNotRecognized {
        app_name: String,
        exchange: Box<Exchange>,
    },

    /// Timeouts, resets and other failures while moving bytes.
    #[error("network transmission failed ({exchange}): {source}")]
    Network {
        exchange: Box<Exchange>,
        #[source]
        source: reqwest::Error,
    },

    #[error("access denied ({0})")]
    AccessDenied(Box<Exchange>),

    #[error("unexpected response status ({0})")]
    UnexpectedStatus(Box<Exchange>),

    /// The server holds no configuration for this client version.
    #[error("server has no configuration for this client version: {reason} ({exchange})")]
    MissingConfigForClientVersion {
        reason: String,
        exchange: Box<Exchange>,
    },

    /// The response is not shaped the way this client version expects.
    #[error("server response does not match client protocol: {reason} ({exchange})")]
    VersionMismatch {
        reason: String,
        exchange: Box<Exchange>,
    },

    /// The table's data ETag moved on the server since it was last read.
    #[error("data ETag conflict, table changed on server ({0})")]
    DataETagConflict(Box<Exchange>),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("local ETag store error: {0}")]
    ETagStore(#[from] ETagStoreError),

    #[error("malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SyncError {
    pub(crate) fn network(exchange: Exchange, source: reqwest::Error) -> Self {
        Self::Network {
            exchange: Box::new(exchange),
            source,
        }
    }

    pub(crate) fn version_mismatch(reason: impl Into<String>, exchange: Exchange) -> Self {
        Self::VersionMismatch {
            reason: reason.into(),
            exchange: Box::new(exchange),
        }
    }

    /// Network-level failures that a fresh request may not hit again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Failures that indicate a client/server version skew. Never retried.
    pub fn is_protocol_mismatch(&self) -> bool {
        matches!(
            self,
            Self::VersionMismatch { .. }
                | Self::MissingConfigForClientVersion { .. }
                | Self::Multipart(_)
        )
    }

    /// The exchange that produced this error, when there was one.
    pub fn exchange(&self) -> Option<&Exchange> {
        match self {
            Self::BadClientConfig { exchange, .. }
            | Self::AppNameNotRecognized { exchange, .. }
            | Self::Network { exchange, .. }
            | Self::MissingConfigForClientVersion { exchange, .. }
            | Self::VersionMismatch { exchange, .. } => Some(&**exchange),
            Self::AccessDenied(exchange)
            | Self::UnexpectedStatus(exchange)
            | Self::DataETagConflict(exchange) => Some(&**exchange),
            _ => None,
        }
    }

    /// HTTP status of the response behind this error, when there was one.
    pub fn status(&self) -> Option<u16> {
        self.exchange().and_then(|e| e.status)
    }

    /// A connect timeout means the configured server never answered; report
    /// it as a configuration problem rather than a transient one.
    pub(crate) fn connect_timeout_as_bad_config(self) -> Self {
        match self {
            Self::Network { exchange, source } if source.is_connect() && source.is_timeout() => {
                Self::BadClientConfig {
                    reason: format!(
                        "server did not respond, is the configuration correct? ({source})"
                    ),
                    exchange,
                }
            }
            other => other,
        }
    }
}
