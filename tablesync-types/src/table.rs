//! Table definitions and table resources.

use serde::{Deserialize, Serialize};

/// List of application names served by a server (`GET /odktables/`).
pub type AppNameList = Vec<String>;

/// A single column of a table definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub element_key: String,
    pub element_name: String,
    pub element_type: String,
    /// Serialized JSON list of child element keys (`"[]"` for leaf columns).
    #[serde(default)]
    pub list_child_element_keys: Option<String>,
}

impl Column {
    /// A leaf column whose display name equals its key.
    pub fn leaf(element_key: impl Into<String>, element_type: impl Into<String>) -> Self {
        let element_key = element_key.into();
        Self {
            element_name: element_key.clone(),
            element_key,
            element_type: element_type.into(),
            list_child_element_keys: Some("[]".to_string()),
        }
    }
}

/// Schema of a table. Immutable once created on the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    pub table_id: String,
    #[serde(rename = "schemaETag")]
    pub schema_etag: String,
    #[serde(default)]
    pub ordered_columns: Vec<Column>,
}

/// A table definition as returned from its definition URI.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinitionResource {
    #[serde(flatten)]
    pub definition: TableDefinition,
    #[serde(default)]
    pub self_uri: Option<String>,
    #[serde(default)]
    pub table_uri: Option<String>,
}

/// Server-side view of a table: its URIs and current version stamps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableResource {
    pub table_id: String,
    /// `None` until the table holds data on the server.
    #[serde(rename = "dataETag", default)]
    pub data_etag: Option<String>,
    #[serde(rename = "schemaETag")]
    pub schema_etag: String,
    #[serde(default)]
    pub self_uri: Option<String>,
    pub definition_uri: String,
    pub data_uri: String,
    pub instance_files_uri: String,
    pub diff_uri: String,
    #[serde(default)]
    pub acl_uri: Option<String>,
    #[serde(rename = "tableLevelManifestETag", default)]
    pub table_level_manifest_etag: Option<String>,
}

impl TableResource {
    /// True when the server has never assigned a data version to this table.
    pub fn is_unsynced(&self) -> bool {
        self.data_etag.is_none()
    }
}

/// Cursor block shared by every paged listing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCursors {
    #[serde(default)]
    pub web_safe_refetch_cursor: Option<String>,
    #[serde(default)]
    pub web_safe_backward_cursor: Option<String>,
    #[serde(default)]
    pub web_safe_resume_cursor: Option<String>,
    #[serde(default)]
    pub has_more_results: bool,
    #[serde(default)]
    pub has_prior_results: bool,
}

/// One page of the server's table listing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableResourceList {
    #[serde(default)]
    pub tables: Vec<TableResource>,
    #[serde(flatten)]
    pub cursors: PageCursors,
    #[serde(rename = "appLevelManifestETag", default)]
    pub app_level_manifest_etag: Option<String>,
}
