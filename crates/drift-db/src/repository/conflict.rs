//! # Conflict Store Repository
//!
//! Manages `sync_conflicts`, the persistent record of conflicts no
//! resolver could settle. Stored conflicts carry JSON snapshots of both
//! sides, so they survive restarts and can be re-fed through the resolver
//! chain on later cycles.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use tracing::debug;
use uuid::Uuid;

use drift_core::{time, ConflictKind, ResolutionStrategy, Row, SyncConflict, Value};

use crate::error::{StoreError, StoreResult};
use crate::driver::StorageDriver;
use crate::schema::SYNC_CONFLICTS_TABLE;

// =============================================================================
// Conflict Record
// =============================================================================

/// A persisted conflict row.
#[derive(Debug, Clone)]
pub struct ConflictRecord {
    pub id: String,
    pub entity_id: String,
    /// Table the entity belongs to.
    pub entity_type: String,
    /// JSON snapshot of the local entity.
    pub local_data: String,
    /// JSON snapshot of the remote entity.
    pub remote_data: String,
    pub conflict_type: ConflictKind,
    pub detected_at: DateTime<Utc>,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Strategy that settled the conflict, once resolved.
    pub resolution_strategy: Option<ResolutionStrategy>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConflictRecord {
    /// Snapshots a detected conflict for persistence.
    pub fn from_conflict(conflict: &SyncConflict) -> StoreResult<Self> {
        let now = Utc::now();
        Ok(ConflictRecord {
            id: if conflict.id.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                conflict.id.clone()
            },
            entity_id: conflict.entity_id.clone(),
            entity_type: conflict.entity_type.clone(),
            local_data: serde_json::to_string(&Json::Object(conflict.local.to_json()))?,
            remote_data: serde_json::to_string(&Json::Object(conflict.remote.to_json()))?,
            conflict_type: conflict.kind,
            detected_at: conflict.detected_at,
            is_resolved: conflict.is_resolved,
            resolved_at: None,
            resolution_strategy: None,
            created_at: now,
            updated_at: now,
        })
    }
}

fn record_from_row(row: &Row) -> StoreResult<ConflictRecord> {
    let text = |key: &str| -> StoreResult<String> {
        row.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::Internal(format!("sync_conflicts row missing '{}'", key)))
    };
    let ts = |key: &str| {
        row.get(key)
            .and_then(Value::as_i64)
            .and_then(time::from_millis)
    };

    Ok(ConflictRecord {
        id: text("id")?,
        entity_id: text("entity_id")?,
        entity_type: text("entity_type")?,
        local_data: text("local_data")?,
        remote_data: text("remote_data")?,
        conflict_type: text("conflict_type")?.parse()?,
        detected_at: ts("detected_at").unwrap_or_else(Utc::now),
        is_resolved: row
            .get("is_resolved")
            .and_then(Value::as_i64)
            .unwrap_or(0)
            != 0,
        resolved_at: ts("resolved_at"),
        resolution_strategy: row
            .get("resolution_strategy")
            .and_then(Value::as_str)
            .map(str::parse)
            .transpose()?,
        created_at: ts("created_at").unwrap_or_else(Utc::now),
        updated_at: ts("updated_at").unwrap_or_else(Utc::now),
    })
}

// =============================================================================
// Conflict Repository
// =============================================================================

/// Repository for the persistent conflict store.
#[derive(Clone)]
pub struct ConflictRepository {
    driver: Arc<dyn StorageDriver>,
}

impl ConflictRepository {
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        ConflictRepository { driver }
    }

    /// Persists an unresolved conflict.
    pub async fn insert(&self, record: &ConflictRecord) -> StoreResult<()> {
        debug!(
            entity_id = %record.entity_id,
            entity_type = %record.entity_type,
            kind = %record.conflict_type,
            "Persisting unresolved conflict"
        );

        let mut row = Row::new();
        row.insert("id".into(), Value::from(record.id.as_str()));
        row.insert("entity_id".into(), Value::from(record.entity_id.as_str()));
        row.insert(
            "entity_type".into(),
            Value::from(record.entity_type.as_str()),
        );
        row.insert("local_data".into(), Value::from(record.local_data.as_str()));
        row.insert(
            "remote_data".into(),
            Value::from(record.remote_data.as_str()),
        );
        row.insert(
            "conflict_type".into(),
            Value::from(record.conflict_type.as_str()),
        );
        row.insert(
            "detected_at".into(),
            Value::Integer(time::to_millis(record.detected_at)),
        );
        row.insert("is_resolved".into(), Value::from(record.is_resolved));
        row.insert(
            "resolved_at".into(),
            Value::opt_integer(time::to_millis_opt(record.resolved_at)),
        );
        row.insert(
            "resolution_strategy".into(),
            Value::opt_text(record.resolution_strategy.map(|s| s.as_str())),
        );
        row.insert(
            "created_at".into(),
            Value::Integer(time::to_millis(record.created_at)),
        );
        row.insert(
            "updated_at".into(),
            Value::Integer(time::to_millis(record.updated_at)),
        );
        self.driver.insert(SYNC_CONFLICTS_TABLE, &row).await?;
        Ok(())
    }

    /// Unresolved conflicts for a table, oldest detection first.
    pub async fn unresolved_for_table(&self, table: &str) -> StoreResult<Vec<ConflictRecord>> {
        let rows = self
            .driver
            .query(
                SYNC_CONFLICTS_TABLE,
                Some("entity_type = ? AND is_resolved = 0"),
                &[Value::from(table)],
                Some("detected_at ASC"),
                None,
            )
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Flips a conflict to resolved, recording when and how.
    pub async fn mark_resolved(
        &self,
        id: &str,
        strategy: ResolutionStrategy,
        resolved_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut row = Row::new();
        row.insert("is_resolved".into(), Value::from(true));
        row.insert(
            "resolved_at".into(),
            Value::Integer(time::to_millis(resolved_at)),
        );
        row.insert("resolution_strategy".into(), Value::from(strategy.as_str()));
        row.insert(
            "updated_at".into(),
            Value::Integer(time::to_millis(Utc::now())),
        );
        self.driver
            .update(SYNC_CONFLICTS_TABLE, &row, "id = ?", &[Value::from(id)])
            .await?;
        Ok(())
    }

    /// Counts unresolved conflicts, optionally scoped to one table.
    pub async fn count_unresolved(&self, table: Option<&str>) -> StoreResult<i64> {
        let rows = match table {
            Some(table) => {
                self.driver
                    .raw_query(
                        "SELECT COUNT(*) AS n FROM sync_conflicts \
                         WHERE is_resolved = 0 AND entity_type = ?",
                        &[Value::from(table)],
                    )
                    .await?
            }
            None => {
                self.driver
                    .raw_query(
                        "SELECT COUNT(*) AS n FROM sync_conflicts WHERE is_resolved = 0",
                        &[],
                    )
                    .await?
            }
        };
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
    use drift_core::{JsonMap, RawEntity};
    use serde_json::json;

    async fn repo() -> ConflictRepository {
        let driver = Arc::new(SqliteDriver::in_memory());
        driver.initialize().await.unwrap();
        driver
            .create_table(schema::SYNC_CONFLICTS_SQL)
            .await
            .unwrap();
        ConflictRepository::new(driver)
    }

    fn conflict() -> SyncConflict {
        let mut payload = JsonMap::new();
        payload.insert("id".into(), json!("t1"));
        payload.insert("updated_at".into(), json!(1_500));
        payload.insert("version".into(), json!(1));
        let local = Box::new(RawEntity::from_payload("todos", payload.clone()));
        payload.insert("updated_at".into(), json!(2_000));
        payload.insert("version".into(), json!(2));
        let remote = Box::new(RawEntity::from_payload("todos", payload));
        SyncConflict::detect("", local, remote, ConflictKind::BothModified)
    }

    #[tokio::test]
    async fn test_insert_and_query_unresolved() {
        let repo = repo().await;
        let record = ConflictRecord::from_conflict(&conflict()).unwrap();
        repo.insert(&record).await.unwrap();

        let unresolved = repo.unresolved_for_table("todos").await.unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].entity_id, "t1");
        assert_eq!(unresolved[0].conflict_type, ConflictKind::BothModified);
        assert!(!unresolved[0].is_resolved);
        assert_eq!(repo.count_unresolved(Some("todos")).await.unwrap(), 1);
        assert_eq!(repo.count_unresolved(Some("notes")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_snapshots_round_trip_as_json() {
        let record = ConflictRecord::from_conflict(&conflict()).unwrap();
        let local: Json = serde_json::from_str(&record.local_data).unwrap();
        let remote: Json = serde_json::from_str(&record.remote_data).unwrap();
        assert_eq!(local["updated_at"].as_i64(), Some(1_500));
        assert_eq!(remote["version"].as_i64(), Some(2));
    }

    #[tokio::test]
    async fn test_mark_resolved_flips_flags() {
        let repo = repo().await;
        let record = ConflictRecord::from_conflict(&conflict()).unwrap();
        repo.insert(&record).await.unwrap();

        let resolved_at = Utc::now();
        repo.mark_resolved(&record.id, ResolutionStrategy::UseLatest, resolved_at)
            .await
            .unwrap();

        assert!(repo.unresolved_for_table("todos").await.unwrap().is_empty());
        assert_eq!(repo.count_unresolved(None).await.unwrap(), 0);
    }
}
