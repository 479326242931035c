//! Synchronization client for odktables servers.
//!
//! Reconciles a device-local tabular store and its file attachments with a
//! remote tables server:
//! - Config and attachment manifests with ETag short-circuiting
//! - Table creation, change sets, diffs and batched row mutations
//! - Single-file transfer with atomic replacement and bounded retry
//! - Multipart batch transfer of row attachments
//!
//! Every operation is an `async fn` on [`Synchronizer`] that runs on the
//! caller's task. The local ETag cache is reached through the
//! [`ETagStore`] trait; the host supplies the implementation.

pub mod attachments;
pub mod config;
pub mod error;
pub mod etag_store;
pub mod files;
pub mod layout;
pub mod manifest;
pub mod multipart;
pub mod retry;
pub mod rows;
pub mod synchronizer;
pub mod table_cache;
pub mod transport;

pub use attachments::{CommonFileAttachmentTerms, partition_into_batches};
pub use config::{BasicCredentials, SyncConfig};
pub use error::{Exchange, SyncError, SyncResult};
pub use etag_store::{
    AttachmentSelection, AttachmentState, ETagStore, ETagStoreError, FileETagKey,
    ManifestETagRecord, ManifestKey, MemoryETagStore,
};
pub use files::{BatchDownloadReport, DownloadOutcome};
pub use layout::AppLayout;
pub use manifest::ManifestScope;
pub use retry::{BoundedRetry, RetryDecision, RetryState};
pub use synchronizer::{Synchronizer, UserInfo};
pub use table_cache::TableResourceCache;
pub use transport::{Endpoints, RestTransport, determine_content_type};
