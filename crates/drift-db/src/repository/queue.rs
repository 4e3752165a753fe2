//! # Retry Queue Repository
//!
//! Manages `sync_queue`, the durable outbox of failed pushes.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  push_entity exhausts its retries                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  INSERT INTO sync_queue (payload, next_retry_at = now + 60s, ...)      │
//! │  row marked sync_status = 'queued'                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  next sync_all drains due entries:                                      │
//! │    success          ──► DELETE queue row, row marked 'synced'          │
//! │    failure          ──► retry_count += 1,                              │
//! │                         next_retry_at = now + (retry_count+1)·3s       │
//! │    retries exhausted──► row marked 'error', queue row dropped          │
//! │                                                                         │
//! │  The entity row itself is never lost: the queue only carries the       │
//! │  retry schedule and the payload snapshot to push.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use drift_core::{time, CoreError, Row, Value};

use crate::driver::StorageDriver;
use crate::error::{StoreError, StoreResult};
use crate::schema::SYNC_QUEUE_TABLE;

// =============================================================================
// Queue Operation
// =============================================================================

/// Operation a queue entry retries. Only pushes are queued today; pulls
/// are re-attempted wholesale on the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueOperation {
    #[default]
    Push,
}

impl QueueOperation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            QueueOperation::Push => "push",
        }
    }
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueOperation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "push" => Ok(QueueOperation::Push),
            other => Err(CoreError::unknown("queue operation", other)),
        }
    }
}

// =============================================================================
// Queue Entry
// =============================================================================

/// One durable retry entry.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: String,
    pub entity_id: String,
    pub table_name: String,
    pub endpoint: String,
    pub operation: QueueOperation,
    /// JSON snapshot of the entity at enqueue time.
    pub payload: String,
    pub retry_count: i64,
    pub max_retries: i64,
    /// Not due before this time; `None` means due immediately.
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn entry_from_row(row: &Row) -> StoreResult<QueueEntry> {
    let text = |key: &str| -> StoreResult<String> {
        row.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::Internal(format!("sync_queue row missing '{}'", key)))
    };
    let int = |key: &str| row.get(key).and_then(Value::as_i64).unwrap_or_default();
    let ts = |key: &str| {
        row.get(key)
            .and_then(Value::as_i64)
            .and_then(time::from_millis)
    };

    Ok(QueueEntry {
        id: text("id")?,
        entity_id: text("entity_id")?,
        table_name: text("table_name")?,
        endpoint: text("endpoint")?,
        operation: text("operation")?.parse().unwrap_or_default(),
        payload: text("payload")?,
        retry_count: int("retry_count"),
        max_retries: int("max_retries"),
        next_retry_at: ts("next_retry_at"),
        last_error: row
            .get("last_error")
            .and_then(Value::as_str)
            .map(str::to_string),
        created_at: ts("created_at").unwrap_or_else(Utc::now),
        updated_at: ts("updated_at").unwrap_or_else(Utc::now),
    })
}

// =============================================================================
// Queue Repository
// =============================================================================

/// Repository for the durable retry queue.
#[derive(Clone)]
pub struct QueueRepository {
    driver: Arc<dyn StorageDriver>,
}

impl QueueRepository {
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        QueueRepository { driver }
    }

    /// Appends a retry entry for a failed push.
    ///
    /// Multiple entries for the same `entity_id` are kept separate; the
    /// queue does not coalesce.
    pub async fn enqueue(
        &self,
        entity_id: &str,
        table_name: &str,
        endpoint: &str,
        payload: &str,
        max_retries: i64,
        next_retry_at: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> StoreResult<QueueEntry> {
        let now = Utc::now();
        let entry = QueueEntry {
            id: Uuid::new_v4().to_string(),
            entity_id: entity_id.to_string(),
            table_name: table_name.to_string(),
            endpoint: endpoint.to_string(),
            operation: QueueOperation::Push,
            payload: payload.to_string(),
            retry_count: 0,
            max_retries,
            next_retry_at: Some(next_retry_at),
            last_error: last_error.map(str::to_string),
            created_at: now,
            updated_at: now,
        };

        debug!(
            entity_id = %entity_id,
            table = %table_name,
            next_retry_at = %next_retry_at,
            "Queueing failed push for retry"
        );

        let mut row = Row::new();
        row.insert("id".into(), Value::from(entry.id.as_str()));
        row.insert("entity_id".into(), Value::from(entry.entity_id.as_str()));
        row.insert("table_name".into(), Value::from(entry.table_name.as_str()));
        row.insert("endpoint".into(), Value::from(entry.endpoint.as_str()));
        row.insert("operation".into(), Value::from(entry.operation.as_str()));
        row.insert("payload".into(), Value::from(entry.payload.as_str()));
        row.insert("retry_count".into(), Value::Integer(entry.retry_count));
        row.insert("max_retries".into(), Value::Integer(entry.max_retries));
        row.insert(
            "next_retry_at".into(),
            Value::opt_integer(time::to_millis_opt(entry.next_retry_at)),
        );
        row.insert(
            "last_error".into(),
            Value::opt_text(entry.last_error.as_deref()),
        );
        row.insert(
            "created_at".into(),
            Value::Integer(time::to_millis(entry.created_at)),
        );
        row.insert(
            "updated_at".into(),
            Value::Integer(time::to_millis(entry.updated_at)),
        );
        self.driver.insert(SYNC_QUEUE_TABLE, &row).await?;

        Ok(entry)
    }

    /// Entries due for retry at `now`, oldest first.
    pub async fn due(&self, now: DateTime<Utc>) -> StoreResult<Vec<QueueEntry>> {
        let rows = self
            .driver
            .query(
                SYNC_QUEUE_TABLE,
                Some("next_retry_at IS NULL OR next_retry_at <= ?"),
                &[Value::Integer(time::to_millis(now))],
                Some("created_at ASC"),
                None,
            )
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Every queue entry, oldest first.
    pub async fn all(&self) -> StoreResult<Vec<QueueEntry>> {
        let rows = self
            .driver
            .query(SYNC_QUEUE_TABLE, None, &[], Some("created_at ASC"), None)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Entries for a single entity, oldest first.
    pub async fn for_entity(&self, entity_id: &str) -> StoreResult<Vec<QueueEntry>> {
        let rows = self
            .driver
            .query(
                SYNC_QUEUE_TABLE,
                Some("entity_id = ?"),
                &[Value::from(entity_id)],
                Some("created_at ASC"),
                None,
            )
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Removes an entry (push succeeded, or retries exhausted).
    pub async fn remove(&self, id: &str) -> StoreResult<()> {
        self.driver
            .delete(SYNC_QUEUE_TABLE, "id = ?", &[Value::from(id)])
            .await?;
        Ok(())
    }

    /// Records a failed retry: bumps the count, reschedules, stores the
    /// error.
    pub async fn record_failure(
        &self,
        id: &str,
        retry_count: i64,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> StoreResult<()> {
        let mut row = Row::new();
        row.insert("retry_count".into(), Value::Integer(retry_count));
        row.insert(
            "next_retry_at".into(),
            Value::Integer(time::to_millis(next_retry_at)),
        );
        row.insert("last_error".into(), Value::from(error));
        row.insert(
            "updated_at".into(),
            Value::Integer(time::to_millis(Utc::now())),
        );
        self.driver
            .update(SYNC_QUEUE_TABLE, &row, "id = ?", &[Value::from(id)])
            .await?;
        Ok(())
    }

    /// Counts all queued entries.
    pub async fn count(&self) -> StoreResult<i64> {
        let rows = self
            .driver
            .raw_query("SELECT COUNT(*) AS n FROM sync_queue", &[])
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("n"))
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SqliteDriver;
    use crate::schema;
    use chrono::Duration;

    async fn repo() -> QueueRepository {
        let driver = Arc::new(SqliteDriver::in_memory());
        driver.initialize().await.unwrap();
        driver.create_table(schema::SYNC_QUEUE_SQL).await.unwrap();
        QueueRepository::new(driver)
    }

    #[tokio::test]
    async fn test_enqueue_and_due_selection() {
        let repo = repo().await;
        let now = Utc::now();

        repo.enqueue("e1", "todos", "/todos", "{}", 3, now - Duration::seconds(5), None)
            .await
            .unwrap();
        repo.enqueue("e2", "todos", "/todos", "{}", 3, now + Duration::seconds(60), None)
            .await
            .unwrap();

        let due = repo.due(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].entity_id, "e1");
        assert_eq!(due[0].retry_count, 0);
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_same_entity_entries_stay_separate() {
        let repo = repo().await;
        let due_at = Utc::now() - Duration::seconds(1);
        repo.enqueue("e1", "todos", "/todos", "{}", 3, due_at, None)
            .await
            .unwrap();
        repo.enqueue("e1", "todos", "/todos", "{}", 3, due_at, None)
            .await
            .unwrap();

        assert_eq!(repo.for_entity("e1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_record_failure_reschedules() {
        let repo = repo().await;
        let entry = repo
            .enqueue("e1", "todos", "/todos", "{}", 3, Utc::now(), None)
            .await
            .unwrap();

        let later = Utc::now() + Duration::seconds(6);
        repo.record_failure(&entry.id, 1, later, "HTTP 500")
            .await
            .unwrap();

        let all = repo.all().await.unwrap();
        assert_eq!(all[0].retry_count, 1);
        assert_eq!(all[0].last_error.as_deref(), Some("HTTP 500"));
        assert!(repo.due(Utc::now()).await.unwrap().is_empty());
        assert_eq!(repo.due(later).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_deletes_entry() {
        let repo = repo().await;
        let entry = repo
            .enqueue("e1", "todos", "/todos", "{}", 3, Utc::now(), None)
            .await
            .unwrap();
        repo.remove(&entry.id).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
