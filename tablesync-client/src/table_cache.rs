//! Last known server view of each table, keyed by table id.

use std::collections::HashMap;
use tablesync_types::TableResource;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct TableResourceCache {
    tables: RwLock<HashMap<String, TableResource>>,
}

impl TableResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, table_id: &str) -> Option<TableResource> {
        self.tables.read().await.get(table_id).cloned()
    }

    /// Last writer wins.
    pub async fn insert(&self, resource: TableResource) {
        self.tables
            .write()
            .await
            .insert(resource.table_id.clone(), resource);
    }

    pub async fn remove(&self, table_id: &str) -> Option<TableResource> {
        self.tables.write().await.remove(table_id)
    }

    pub async fn len(&self) -> usize {
        self.tables.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.is_empty()
    }
}
