use crate::clickhouse::ClickHouseClient;
use crate::domain::{ColumnCell, ColumnStore, DomainError, DomainResult};
use async_trait::async_trait;
use clickhouse::Row;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct ColumnCellRow {
    pub table_name: String,
    pub row_key: String,
    pub family: String,
    pub qualifier: String,
    pub timestamp: i64,
    pub value: String,
}

impl ColumnCellRow {
    fn from_cell(table: &str, cell: ColumnCell) -> Self {
        Self {
            table_name: table.to_string(),
            row_key: cell.row_key,
            family: cell.family,
            qualifier: cell.qualifier,
            timestamp: cell.timestamp,
            value: cell.value,
        }
    }
}

impl From<ColumnCellRow> for ColumnCell {
    fn from(row: ColumnCellRow) -> Self {
        ColumnCell {
            row_key: row.row_key,
            family: row.family,
            qualifier: row.qualifier,
            timestamp: row.timestamp,
            value: row.value,
        }
    }
}

/// Wide-column store on a single ClickHouse table.
///
/// Logical tables are a column of the physical table; a newer timestamp
/// replaces an older version of the same cell on merge.
#[derive(Clone)]
pub struct ClickHouseColumnStore {
    client: ClickHouseClient,
    table: String,
}

impl ClickHouseColumnStore {
    pub fn new(client: ClickHouseClient, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        self.client
            .execute(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    table_name LowCardinality(String),
                    row_key String,
                    family LowCardinality(String),
                    qualifier String,
                    timestamp Int64,
                    value String
                ) ENGINE = ReplacingMergeTree(timestamp)
                ORDER BY (table_name, family, row_key, qualifier)",
                self.table
            ))
            .await
    }
}

#[async_trait]
impl ColumnStore for ClickHouseColumnStore {
    async fn put_cells(&self, table: &str, cells: Vec<ColumnCell>) -> DomainResult<()> {
        if cells.is_empty() {
            return Ok(());
        }

        debug!(table = %table, cell_count = cells.len(), "writing cells to ClickHouse");

        let mut insert = self
            .client
            .get_client()
            .insert::<ColumnCellRow>(&self.table)
            .await
            .map_err(|e| {
                error!("failed to create ClickHouse inserter: {}", e);
                DomainError::StorageError(e.to_string())
            })?;

        for cell in cells {
            insert
                .write(&ColumnCellRow::from_cell(table, cell))
                .await
                .map_err(|e| {
                    error!("failed to write cell to ClickHouse: {}", e);
                    DomainError::StorageError(e.to_string())
                })?;
        }

        insert.end().await.map_err(|e| {
            error!("failed to finalize ClickHouse insert: {}", e);
            DomainError::StorageError(e.to_string())
        })?;

        Ok(())
    }

    async fn scan_family(&self, table: &str, family: &str) -> DomainResult<Vec<ColumnCell>> {
        let rows = self
            .client
            .get_client()
            .query(&format!(
                "SELECT ?fields FROM {} FINAL WHERE table_name = ? AND family = ?",
                self.table
            ))
            .bind(table)
            .bind(family)
            .fetch_all::<ColumnCellRow>()
            .await
            .map_err(|e| DomainError::StorageError(e.to_string()))?;

        debug!(table = %table, family = %family, cell_count = rows.len(), "scanned column family");

        Ok(rows.into_iter().map(ColumnCell::from).collect())
    }
}
