//! # Sync Metadata Repository
//!
//! Manages `sync_metadata`, one summary row per registered table:
//! last successful sync time and the pending/failed counts observed then.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use drift_core::{time, Row, Value};

use crate::driver::StorageDriver;
use crate::error::StoreResult;

/// Per-table sync summary.
#[derive(Debug, Clone)]
pub struct TableSyncSummary {
    pub table_name: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub pending_count: i64,
    pub failed_count: i64,
}

/// Repository for per-table sync summaries.
#[derive(Clone)]
pub struct MetadataRepository {
    driver: Arc<dyn StorageDriver>,
}

impl MetadataRepository {
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        MetadataRepository { driver }
    }

    /// Upserts the summary row for a table after a sync pass.
    pub async fn record_sync(
        &self,
        table: &str,
        last_sync_at: DateTime<Utc>,
        pending_count: i64,
        failed_count: i64,
    ) -> StoreResult<()> {
        self.driver
            .raw_execute(
                "INSERT INTO sync_metadata \
                   (table_name, last_sync_at, pending_count, failed_count, updated_at) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT(table_name) DO UPDATE SET \
                   last_sync_at = excluded.last_sync_at, \
                   pending_count = excluded.pending_count, \
                   failed_count = excluded.failed_count, \
                   updated_at = excluded.updated_at",
                &[
                    Value::from(table),
                    Value::Integer(time::to_millis(last_sync_at)),
                    Value::Integer(pending_count),
                    Value::Integer(failed_count),
                    Value::Integer(time::to_millis(Utc::now())),
                ],
            )
            .await?;
        Ok(())
    }

    /// Fetches the summary row for a table, if one has been recorded.
    pub async fn get(&self, table: &str) -> StoreResult<Option<TableSyncSummary>> {
        let rows = self
            .driver
            .query(
                "sync_metadata",
                Some("table_name = ?"),
                &[Value::from(table)],
                None,
                Some(1),
            )
            .await?;
        Ok(rows.first().map(summary_from_row))
    }
}

fn summary_from_row(row: &Row) -> TableSyncSummary {
    TableSyncSummary {
        table_name: row
            .get("table_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        last_sync_at: row
            .get("last_sync_at")
            .and_then(Value::as_i64)
            .and_then(time::from_millis),
        pending_count: row
            .get("pending_count")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        failed_count: row
            .get("failed_count")
            .and_then(Value::as_i64)
            .unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SqliteDriver;
    use crate::schema;

    #[tokio::test]
    async fn test_record_and_get_summary() {
        let driver = Arc::new(SqliteDriver::in_memory());
        driver.initialize().await.unwrap();
        driver
            .create_table(schema::SYNC_METADATA_SQL)
            .await
            .unwrap();
        let repo = MetadataRepository::new(driver);

        assert!(repo.get("todos").await.unwrap().is_none());

        let first = Utc::now();
        repo.record_sync("todos", first, 3, 1).await.unwrap();
        let summary = repo.get("todos").await.unwrap().unwrap();
        assert_eq!(summary.pending_count, 3);
        assert_eq!(summary.failed_count, 1);

        // upsert overwrites in place
        repo.record_sync("todos", Utc::now(), 0, 0).await.unwrap();
        let summary = repo.get("todos").await.unwrap().unwrap();
        assert_eq!(summary.pending_count, 0);
        assert!(summary.last_sync_at.unwrap() >= first - chrono::Duration::seconds(1));
    }
}
