//! Wire entities for the odktables REST API.
//!
//! These are the JSON documents exchanged with the tables server:
//! - Table definitions, table resources and paged table listings
//! - Rows, row mutation outcomes and change sets
//! - File manifests for app-, table- and row-level attachments
//!
//! Field names follow the server's camelCase spelling, including the
//! `ETag` capitalisation used for every version stamp.
//!
//! Local-only inputs (such as [`SyncRow`]) live here too so the client and
//! any host-side store agree on a single representation.

mod manifest;
mod row;
mod table;

pub use manifest::{FileManifest, FileManifestDocument, FileManifestEntry};
pub use row::{
    ChangeSetList, DataKeyValue, Row, RowFilterScope, RowFilterType, RowList, RowOutcome,
    RowOutcomeKind, RowOutcomeList, RowResource, RowResourceList, SyncRow,
};
pub use table::{
    AppNameList, Column, PageCursors, TableDefinition, TableDefinitionResource, TableResource,
    TableResourceList,
};
