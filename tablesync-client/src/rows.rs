//! Table lifecycle and row data: definitions, change sets, diffs and
//! batched row mutations.

use crate::error::{SyncError, SyncResult};
use crate::synchronizer::Synchronizer;
use crate::transport::{self, OK_ONLY};
use reqwest::{Method, StatusCode};
use tablesync_types::{
    ChangeSetList, Column, Row, RowList, RowOutcomeList, RowResourceList, SyncRow,
    TableDefinition, TableDefinitionResource, TableResource,
};
use tracing::{debug, info};

impl Synchronizer {
    pub async fn get_table_definition(
        &self,
        definition_uri: &str,
    ) -> SyncResult<TableDefinitionResource> {
        let request = self.transport.json_request(Method::GET, definition_uri);
        self.transport.execute(request, OK_ONLY).await?.json().await
    }

    /// Creates a table (or confirms an identical one) and caches the
    /// returned resource by table id.
    pub async fn create_table(
        &self,
        table_id: &str,
        schema_etag: &str,
        columns: Vec<Column>,
    ) -> SyncResult<TableResource> {
        let uri = self.transport.endpoints().table(table_id);
        let definition = TableDefinition {
            table_id: table_id.to_string(),
            schema_etag: schema_etag.to_string(),
            ordered_columns: columns,
        };
        let request = self
            .transport
            .json_body_request(Method::PUT, &uri, &definition)?;
        let resource: TableResource = self.transport.execute(request, OK_ONLY).await?.json().await?;

        info!("created table {} (schema {})", resource.table_id, resource.schema_etag);
        self.tables.insert(resource.clone()).await;
        Ok(resource)
    }

    pub async fn delete_table(&self, table: &TableResource) -> SyncResult<()> {
        let request = self
            .transport
            .json_request(Method::DELETE, &table.definition_uri);
        self.transport.execute(request, OK_ONLY).await?;

        info!("deleted table {}", table.table_id);
        self.tables.remove(&table.table_id).await;
        Ok(())
    }

    /// Change sets committed after `data_etag`. For a table that was never
    /// synced the full history is returned.
    pub async fn get_change_sets(
        &self,
        table: &TableResource,
        data_etag: Option<&str>,
    ) -> SyncResult<ChangeSetList> {
        let effective = if table.is_unsynced() { None } else { data_etag };
        let uri = transport::change_sets_uri(&table.diff_uri, effective);
        let request = self.transport.json_request(Method::GET, &uri);
        self.transport.execute(request, OK_ONLY).await?.json().await
    }

    /// Rows changed by one change set. Without a data version to anchor on,
    /// the full current row set is fetched instead.
    pub async fn get_change_set(
        &self,
        table: &TableResource,
        data_etag: Option<&str>,
        active_only: bool,
        resume_cursor: Option<&str>,
    ) -> SyncResult<RowResourceList> {
        let uri = match data_etag {
            Some(tag) if !table.is_unsynced() => {
                transport::change_set_uri(&table.diff_uri, tag, active_only, resume_cursor)
            }
            _ => {
                debug!("no change set anchor for {}, fetching all rows", table.table_id);
                transport::data_page_uri(&table.data_uri, resume_cursor, None)
            }
        };
        let request = self.transport.json_request(Method::GET, &uri);
        self.transport.execute(request, OK_ONLY).await?.json().await
    }

    /// One page of rows changed since `data_etag`, or of all rows when the
    /// table was never synced.
    pub async fn get_updates(
        &self,
        table: &TableResource,
        data_etag: Option<&str>,
        resume_cursor: Option<&str>,
        fetch_limit: Option<u32>,
    ) -> SyncResult<RowResourceList> {
        let uri = match data_etag {
            Some(tag) if !table.is_unsynced() => {
                transport::diff_page_uri(&table.diff_uri, tag, resume_cursor, fetch_limit)
            }
            _ => transport::data_page_uri(&table.data_uri, resume_cursor, fetch_limit),
        };
        let request = self.transport.json_request(Method::GET, &uri);
        self.transport.execute(request, OK_ONLY).await?.json().await
    }

    /// Pushes inserts, updates and deletes in a single request guarded by
    /// the table's data ETag.
    ///
    /// Returns one outcome per submitted row, in submission order. A stale
    /// data ETag rejects the whole batch with [`SyncError::DataETagConflict`];
    /// rejections of individual rows arrive as outcome codes.
    pub async fn alter_rows(
        &self,
        table: &TableResource,
        rows: &[SyncRow],
    ) -> SyncResult<RowOutcomeList> {
        if rows.is_empty() {
            return Ok(RowOutcomeList {
                rows: Vec::new(),
                data_etag: table.data_etag.clone(),
            });
        }

        let body = RowList {
            rows: rows.iter().map(Row::for_update).collect(),
            data_etag: table.data_etag.clone(),
        };
        let request = self
            .transport
            .json_body_request(Method::PUT, &table.data_uri, &body)?;

        let response = match self.transport.execute(request, OK_ONLY).await {
            Ok(response) => response,
            Err(SyncError::UnexpectedStatus(exchange))
                if exchange.status == Some(StatusCode::CONFLICT.as_u16()) =>
            {
                return Err(SyncError::DataETagConflict(exchange));
            }
            Err(e) => return Err(e),
        };

        let exchange = response.exchange.clone();
        let outcomes: RowOutcomeList = response.json().await?;

        if outcomes.rows.len() != rows.len() {
            return Err(SyncError::version_mismatch(
                format!(
                    "submitted {} rows but received {} outcomes",
                    rows.len(),
                    outcomes.rows.len()
                ),
                exchange,
            ));
        }
        if let Some((sent, got)) = rows
            .iter()
            .zip(&outcomes.rows)
            .find(|(sent, got)| sent.row_id != got.row.row_id)
        {
            return Err(SyncError::version_mismatch(
                format!(
                    "outcome for row {} returned where {} was expected",
                    got.row.row_id, sent.row_id
                ),
                exchange,
            ));
        }

        debug!(
            "altered {} rows in {}, data ETag now {:?}",
            rows.len(),
            table.table_id,
            outcomes.data_etag
        );
        Ok(outcomes)
    }
}
