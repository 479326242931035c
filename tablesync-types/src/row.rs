//! Rows, row mutation outcomes and change sets.

use crate::table::PageCursors;
use serde::{Deserialize, Serialize};

/// One column value of a row. Values travel as strings; `None` is SQL null.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataKeyValue {
    pub column: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl DataKeyValue {
    pub fn new(column: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        Self {
            column: column.into(),
            value: value.map(Into::into),
        }
    }
}

/// Default access granted to users outside the row's owner and groups.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowFilterType {
    #[default]
    Full,
    Modify,
    ReadOnly,
    Hidden,
}

/// Row-level access control.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFilterScope {
    #[serde(default)]
    pub default_access: RowFilterType,
    #[serde(default)]
    pub row_owner: Option<String>,
    #[serde(default)]
    pub group_read_only: Option<String>,
    #[serde(default)]
    pub group_modify: Option<String>,
    #[serde(default)]
    pub group_privileged: Option<String>,
}

/// A row as exchanged with the server.
///
/// The row id is chosen by the client and never changes; the row ETag is
/// reassigned by the server on every successful mutation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub row_id: String,
    #[serde(rename = "rowETag", default)]
    pub row_etag: Option<String>,
    #[serde(rename = "dataETagAtModification", default)]
    pub data_etag_at_modification: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub create_user: Option<String>,
    #[serde(default)]
    pub last_update_user: Option<String>,
    #[serde(default)]
    pub form_id: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub savepoint_type: Option<String>,
    #[serde(default)]
    pub savepoint_timestamp: Option<String>,
    #[serde(default)]
    pub savepoint_creator: Option<String>,
    #[serde(default)]
    pub filter_scope: RowFilterScope,
    #[serde(default)]
    pub ordered_columns: Vec<DataKeyValue>,
}

impl Row {
    /// Builds the wire form of a locally modified row.
    pub fn for_update(local: &SyncRow) -> Self {
        Self {
            row_id: local.row_id.clone(),
            row_etag: local.row_etag.clone(),
            data_etag_at_modification: None,
            deleted: local.deleted,
            create_user: None,
            last_update_user: None,
            form_id: local.form_id.clone(),
            locale: local.locale.clone(),
            savepoint_type: local.savepoint_type.clone(),
            savepoint_timestamp: local.savepoint_timestamp.clone(),
            savepoint_creator: local.savepoint_creator.clone(),
            filter_scope: local.filter_scope.clone(),
            ordered_columns: local.values.clone(),
        }
    }

    /// Looks up the value of a column.
    pub fn value(&self, column: &str) -> Option<&str> {
        self.ordered_columns
            .iter()
            .find(|kv| kv.column == column)
            .and_then(|kv| kv.value.as_deref())
    }
}

/// A locally inserted, updated or deleted row waiting to be pushed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncRow {
    pub row_id: String,
    /// `None` for rows that were never pushed.
    pub row_etag: Option<String>,
    pub form_id: Option<String>,
    pub locale: Option<String>,
    pub savepoint_type: Option<String>,
    pub savepoint_timestamp: Option<String>,
    pub savepoint_creator: Option<String>,
    pub filter_scope: RowFilterScope,
    pub values: Vec<DataKeyValue>,
    pub deleted: bool,
}

/// Batch mutation request body.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowList {
    #[serde(default)]
    pub rows: Vec<Row>,
    /// Data version the client last saw; the server rejects stale values.
    #[serde(rename = "dataETag", default)]
    pub data_etag: Option<String>,
}

/// Server verdict for one submitted row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowOutcomeKind {
    #[default]
    Unknown,
    Success,
    Denied,
    InConflict,
    Failed,
}

/// One row of a batch mutation response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowOutcome {
    #[serde(flatten)]
    pub row: Row,
    #[serde(default)]
    pub outcome: RowOutcomeKind,
}

impl RowOutcome {
    pub fn is_success(&self) -> bool {
        self.outcome == RowOutcomeKind::Success
    }
}

/// Batch mutation response. Holds one outcome per submitted row, in order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowOutcomeList {
    #[serde(default)]
    pub rows: Vec<RowOutcome>,
    #[serde(rename = "dataETag", default)]
    pub data_etag: Option<String>,
}

/// A row as listed by the data and diff endpoints.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowResource {
    #[serde(flatten)]
    pub row: Row,
    #[serde(default)]
    pub self_uri: Option<String>,
}

/// One page of rows together with the data version it was read at.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowResourceList {
    #[serde(default)]
    pub rows: Vec<RowResource>,
    #[serde(rename = "dataETag", default)]
    pub data_etag: Option<String>,
    #[serde(default)]
    pub table_uri: Option<String>,
    #[serde(flatten)]
    pub cursors: PageCursors,
}

impl RowResourceList {
    /// Resume token for the next page, if the server reported more results.
    pub fn resume_cursor(&self) -> Option<&str> {
        if self.cursors.has_more_results {
            self.cursors.web_safe_resume_cursor.as_deref()
        } else {
            None
        }
    }
}

/// Identifiers of the change sets committed after a given data version.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSetList {
    #[serde(default)]
    pub change_sets: Vec<String>,
    #[serde(rename = "dataETag", default)]
    pub data_etag: Option<String>,
    #[serde(default)]
    pub sequence_value: Option<String>,
}
