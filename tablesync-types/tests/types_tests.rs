use pretty_assertions::assert_eq;
use tablesync_types::*;

// --- Tables ---

#[test]
fn table_resource_parses_server_json() {
    let json = serde_json::json!({
        "tableId": "census",
        "dataETag": null,
        "schemaETag": "schema-1",
        "selfUri": "http://srv/odktables/default/tables/census",
        "definitionUri": "http://srv/odktables/default/tables/census/ref/schema-1",
        "dataUri": "http://srv/odktables/default/tables/census/ref/schema-1/rows",
        "instanceFilesUri": "http://srv/odktables/default/tables/census/ref/schema-1/attachments",
        "diffUri": "http://srv/odktables/default/tables/census/ref/schema-1/diff",
        "aclUri": "http://srv/odktables/default/tables/census/acl",
        "tableLevelManifestETag": "tm-1"
    });
    let table: TableResource = serde_json::from_value(json).unwrap();
    assert_eq!(table.table_id, "census");
    assert!(table.is_unsynced());
    assert_eq!(table.schema_etag, "schema-1");
    assert_eq!(table.table_level_manifest_etag.as_deref(), Some("tm-1"));
}

#[test]
fn table_definition_uses_etag_spelling() {
    let def = TableDefinition {
        table_id: "t".into(),
        schema_etag: "s".into(),
        ordered_columns: vec![Column::leaf("c", "string")],
    };
    let json = serde_json::to_value(&def).unwrap();
    assert_eq!(json["schemaETag"], "s");
    assert_eq!(json["orderedColumns"][0]["elementKey"], "c");
    assert_eq!(json["orderedColumns"][0]["elementName"], "c");
    assert_eq!(json["orderedColumns"][0]["listChildElementKeys"], "[]");
}

#[test]
fn definition_resource_flattens_definition() {
    let json = serde_json::json!({
        "tableId": "t",
        "schemaETag": "s",
        "orderedColumns": [{
            "elementKey": "c",
            "elementName": "c",
            "elementType": "string",
            "listChildElementKeys": "[]"
        }],
        "selfUri": "http://srv/def",
        "tableUri": "http://srv/table"
    });
    let res: TableDefinitionResource = serde_json::from_value(json).unwrap();
    assert_eq!(res.definition.ordered_columns.len(), 1);
    assert_eq!(res.self_uri.as_deref(), Some("http://srv/def"));
}

#[test]
fn table_list_reads_cursor_block() {
    let json = serde_json::json!({
        "tables": [],
        "webSafeResumeCursor": "next",
        "hasMoreResults": true,
        "appLevelManifestETag": "am"
    });
    let list: TableResourceList = serde_json::from_value(json).unwrap();
    assert!(list.cursors.has_more_results);
    assert_eq!(list.cursors.web_safe_resume_cursor.as_deref(), Some("next"));
    assert_eq!(list.app_level_manifest_etag.as_deref(), Some("am"));
}

// --- Rows ---

fn sync_row() -> SyncRow {
    SyncRow {
        row_id: "uuid:1".into(),
        row_etag: Some("r1".into()),
        form_id: Some("form".into()),
        locale: Some("en_US".into()),
        savepoint_type: Some("COMPLETE".into()),
        savepoint_timestamp: Some("2024-01-01T00:00:00.000000000".into()),
        savepoint_creator: Some("mailto:a@example.com".into()),
        filter_scope: RowFilterScope::default(),
        values: vec![DataKeyValue::new("c", Some("v"))],
        deleted: true,
    }
}

#[test]
fn row_for_update_copies_local_fields() {
    let row = Row::for_update(&sync_row());
    assert_eq!(row.row_id, "uuid:1");
    assert_eq!(row.row_etag.as_deref(), Some("r1"));
    assert!(row.deleted);
    assert_eq!(row.value("c"), Some("v"));
    assert_eq!(row.value("missing"), None);
}

#[test]
fn row_list_serializes_wire_names() {
    let list = RowList {
        rows: vec![Row::for_update(&sync_row())],
        data_etag: Some("d1".into()),
    };
    let json = serde_json::to_value(&list).unwrap();
    assert_eq!(json["dataETag"], "d1");
    assert_eq!(json["rows"][0]["rowETag"], "r1");
    assert_eq!(json["rows"][0]["savepointType"], "COMPLETE");
    assert_eq!(json["rows"][0]["filterScope"]["defaultAccess"], "FULL");
    assert_eq!(json["rows"][0]["orderedColumns"][0]["column"], "c");
}

#[test]
fn row_outcome_parses_flattened_row() {
    let json = serde_json::json!({
        "rows": [
            { "rowId": "a", "rowETag": "e2", "outcome": "SUCCESS" },
            { "rowId": "b", "outcome": "IN_CONFLICT" }
        ],
        "dataETag": "d2"
    });
    let list: RowOutcomeList = serde_json::from_value(json).unwrap();
    assert_eq!(list.rows.len(), 2);
    assert!(list.rows[0].is_success());
    assert_eq!(list.rows[0].row.row_etag.as_deref(), Some("e2"));
    assert_eq!(list.rows[1].outcome, RowOutcomeKind::InConflict);
}

#[test]
fn row_resource_list_resume_cursor_only_when_more() {
    let mut list = RowResourceList::default();
    list.cursors.web_safe_resume_cursor = Some("c".into());
    assert_eq!(list.resume_cursor(), None);
    list.cursors.has_more_results = true;
    assert_eq!(list.resume_cursor(), Some("c"));
}

#[test]
fn change_set_list_parses() {
    let json = serde_json::json!({
        "changeSets": ["d1", "d2"],
        "dataETag": "d2",
        "sequenceValue": "42"
    });
    let list: ChangeSetList = serde_json::from_value(json).unwrap();
    assert_eq!(list.change_sets, vec!["d1".to_string(), "d2".to_string()]);
}

// --- Manifests ---

#[test]
fn manifest_entry_uses_md5hash_spelling() {
    let json = serde_json::json!({
        "files": [{
            "filename": "assets/index.html",
            "contentLength": 12,
            "contentType": "text/html",
            "md5hash": "md5:abc",
            "downloadUrl": "http://srv/files/2/assets/index.html"
        }]
    });
    let manifest: FileManifest = serde_json::from_value(json).unwrap();
    let files = manifest.files.unwrap();
    assert_eq!(files[0].md5_hash.as_deref(), Some("md5:abc"));
    assert_eq!(files[0].content_length, Some(12));
}

#[test]
fn manifest_with_null_files_parses() {
    let manifest: FileManifest = serde_json::from_str(r#"{"files": null}"#).unwrap();
    assert!(manifest.files.is_none());
}

#[test]
fn named_entry_only_sets_filename() {
    let entry = FileManifestEntry::named("a.jpg");
    let json = serde_json::to_value(&entry).unwrap();
    assert_eq!(json["filename"], "a.jpg");
    assert!(json["downloadUrl"].is_null());
}
