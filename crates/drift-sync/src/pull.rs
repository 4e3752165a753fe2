//! # Pull Phase
//!
//! Fetches the remote collection for a table and reconciles it into the
//! local replica, detecting and arbitrating conflicts on the way.
//!
//! ## Reconcile Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  GET endpoint (retries with backoff; exhaustion logs and returns)      │
//! │       │  JSON array expected                                           │
//! │       ▼  per object, chunked, sequential                               │
//! │  materialize remote (synced_at = now)                                  │
//! │       │                                                                 │
//! │       ├── no local row ──► insert as 'synced'                          │
//! │       │                                                                 │
//! │       └── local row exists                                             │
//! │             │                                                           │
//! │             ├── no conflict ──► overwrite with remote, 'synced'        │
//! │             │                                                           │
//! │             └── conflict ──► resolver chain                            │
//! │                   ├── winner ──► written back as 'synced'              │
//! │                   └── none   ──► sync_conflicts row, row 'conflict'    │
//! │                                                                         │
//! │  Stored conflicts are retried at the end of every sync_table pass.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per-element failures are logged and skipped; only storage failures
//! abort the table pass.

use chrono::Utc;
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use drift_core::{time, JsonMap, RowStatus, SyncConflict, SyncEntity};
use drift_db::{ConflictRecord, SerializeOptions};
use uuid::Uuid;

use crate::engine::SyncEngine;
use crate::error::SyncResult;

/// `last_error` text for rows parked in `conflict` state.
pub(crate) const MANUAL_RESOLUTION_ERROR: &str = "Conflict requires manual resolution";

/// Parses a JSON object out of text.
fn json_object(text: &str) -> Option<JsonMap> {
    match serde_json::from_str::<Json>(text) {
        Ok(Json::Object(map)) => Some(map),
        _ => None,
    }
}

impl SyncEngine {
    /// Pulls the remote collection and reconciles each element.
    pub(crate) async fn pull_table(&self, table: &str, endpoint: &str) -> SyncResult<()> {
        let config = self.config.read().await.clone();
        let attempts = config.max_retries.max(1);

        let mut response = None;
        for attempt in 1..=attempts {
            match self.adapter.get(endpoint).await {
                Ok(r) if r.status_code == 200 => {
                    response = Some(r);
                    break;
                }
                Ok(r) => {
                    debug!(table = %table, status = r.status_code, attempt, "Pull attempt failed");
                }
                Err(e) => {
                    debug!(table = %table, error = %e, attempt, "Pull attempt failed");
                    if !e.is_retryable() {
                        break;
                    }
                }
            }
            if attempt < attempts {
                tokio::time::sleep(config.push_retry_base * attempt).await;
            }
        }

        // Pull exhaustion is not an engine failure; the next cycle retries
        let Some(response) = response else {
            warn!(table = %table, "Pull failed after retries; keeping local state");
            return Ok(());
        };

        let elements = match response.data {
            Some(Json::Array(elements)) => elements,
            other => {
                let got = other
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "empty body".into());
                warn!(table = %table, got = %got, "Pull expected a JSON array; skipping");
                return Ok(());
            }
        };

        info!(table = %table, count = elements.len(), "Reconciling remote snapshot");

        for chunk in elements.chunks(config.batch_size) {
            for element in chunk {
                let Json::Object(map) = element else {
                    warn!(table = %table, "Skipping non-object element in pull response");
                    continue;
                };
                if let Err(e) = self.apply_remote_object(table, map.clone()).await {
                    warn!(table = %table, error = %e, "Failed to apply remote element");
                }
            }
        }

        Ok(())
    }

    /// Reconciles one remote object into the local replica.
    async fn apply_remote_object(&self, table: &str, mut map: JsonMap) -> SyncResult<()> {
        let now = Utc::now();
        map.insert("synced_at".into(), Json::from(time::to_millis(now)));

        let remote = self.store.entity_from_json(table, map).await?;
        if remote.id().is_empty() {
            return Err(crate::error::SyncError::Validation(
                "remote entity missing id".into(),
            ));
        }

        let synced = SerializeOptions::status(RowStatus::Synced).synced_at(now);
        match self.store.find_by_id(table, remote.id()).await? {
            None => {
                debug!(table = %table, id = %remote.id(), "Inserting remote entity");
                self.store.write_entity(remote.as_ref(), &synced).await?;
            }
            Some(local_row) => {
                let local = self.store.materialize(table, &local_row).await?;
                if has_conflict(local.as_ref(), remote.as_ref()) {
                    self.handle_conflict(table, local, remote).await?;
                } else {
                    self.store.write_entity(remote.as_ref(), &synced).await?;
                }
            }
        }
        Ok(())
    }

    /// Arbitrates a detected conflict through the resolver chain.
    async fn handle_conflict(
        &self,
        table: &str,
        local: Box<dyn SyncEntity>,
        remote: Box<dyn SyncEntity>,
    ) -> SyncResult<()> {
        let kind = SyncConflict::classify(local.as_ref(), remote.as_ref());
        let conflict = SyncConflict::detect(Uuid::new_v4().to_string(), local, remote, kind);
        info!(
            table = %table,
            entity_id = %conflict.entity_id,
            kind = %conflict.kind,
            "Conflict detected"
        );

        match self.resolve_with_chain(&conflict).await {
            Some((winner, _strategy)) => {
                let options = SerializeOptions::status(RowStatus::Synced).synced_at(Utc::now());
                self.store.write_entity(winner.as_ref(), &options).await?;
            }
            None => {
                let record = ConflictRecord::from_conflict(&conflict)?;
                self.store.conflicts().insert(&record).await?;
                self.store
                    .mark_status(
                        table,
                        &conflict.entity_id,
                        RowStatus::Conflict,
                        Some(MANUAL_RESOLUTION_ERROR),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Re-feeds stored unresolved conflicts through the resolver chain.
    pub(crate) async fn retry_stored_conflicts(&self, table: &str) -> SyncResult<()> {
        let records = self.store.conflicts().unresolved_for_table(table).await?;
        if records.is_empty() {
            return Ok(());
        }

        debug!(table = %table, count = records.len(), "Retrying stored conflicts");

        for record in records {
            let (Some(local_map), Some(remote_map)) = (
                json_object(&record.local_data),
                json_object(&record.remote_data),
            ) else {
                warn!(conflict_id = %record.id, "Corrupt conflict snapshot; leaving unresolved");
                continue;
            };

            let local = match self.store.entity_from_json(table, local_map).await {
                Ok(entity) => entity,
                Err(e) => {
                    warn!(conflict_id = %record.id, error = %e, "Cannot rebuild local side");
                    continue;
                }
            };
            let remote = match self.store.entity_from_json(table, remote_map).await {
                Ok(entity) => entity,
                Err(e) => {
                    warn!(conflict_id = %record.id, error = %e, "Cannot rebuild remote side");
                    continue;
                }
            };

            let mut conflict =
                SyncConflict::detect(record.id.clone(), local, remote, record.conflict_type);
            conflict.detected_at = record.detected_at;

            if let Some((winner, strategy)) = self.resolve_with_chain(&conflict).await {
                let now = Utc::now();
                let options = SerializeOptions::status(RowStatus::Synced).synced_at(now);
                self.store.write_entity(winner.as_ref(), &options).await?;
                self.store
                    .conflicts()
                    .mark_resolved(&record.id, strategy, now)
                    .await?;
                info!(
                    conflict_id = %record.id,
                    entity_id = %record.entity_id,
                    strategy = %strategy,
                    "Stored conflict resolved"
                );
            }
        }
        Ok(())
    }
}

/// Divergence test between the two replicas of an entity.
///
/// True iff both sides advanced past the last sync (timestamp clause,
/// symmetric), or the version numbers differ at all (asymmetric on
/// purpose: a version divergence is a conflict no matter which side is
/// larger).
pub fn has_conflict(local: &dyn SyncEntity, remote: &dyn SyncEntity) -> bool {
    let both_modified = match local.synced_at() {
        Some(base) => local.updated_at() > base && remote.updated_at() > base,
        None => false,
    };
    both_modified || local.version() != remote.version()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use drift_core::RawEntity;
    use serde_json::json;

    fn entity(updated_ms: i64, synced_ms: Option<i64>, version: i64) -> Box<dyn SyncEntity> {
        let mut map = JsonMap::new();
        map.insert("id".into(), json!("t1"));
        map.insert("created_at".into(), json!(0));
        map.insert("updated_at".into(), json!(updated_ms));
        if let Some(ms) = synced_ms {
            map.insert("synced_at".into(), json!(ms));
        }
        map.insert("version".into(), json!(version));
        Box::new(RawEntity::from_payload("todos", map))
    }

    #[test]
    fn test_both_modified_since_last_sync_conflicts() {
        // local edited at 1500, remote at 2000, both past synced_at = 500
        let local = entity(1_500, Some(500), 1);
        let remote = entity(2_000, None, 1);
        assert!(has_conflict(local.as_ref(), remote.as_ref()));
    }

    #[test]
    fn test_only_remote_advanced_is_not_a_conflict() {
        let local = entity(400, Some(500), 1);
        let remote = entity(2_000, None, 1);
        assert!(!has_conflict(local.as_ref(), remote.as_ref()));
    }

    #[test]
    fn test_never_synced_local_needs_version_divergence() {
        let local = entity(1_500, None, 1);
        let remote = entity(2_000, None, 1);
        assert!(!has_conflict(local.as_ref(), remote.as_ref()));
    }

    #[test]
    fn test_version_mismatch_alone_conflicts_both_directions() {
        let local = entity(1_000, Some(2_000), 1);
        let remote = entity(1_000, None, 2);
        assert!(has_conflict(local.as_ref(), remote.as_ref()));

        // asymmetric clause: larger local version conflicts too
        let local = entity(1_000, Some(2_000), 5);
        let remote = entity(1_000, None, 2);
        assert!(has_conflict(local.as_ref(), remote.as_ref()));
    }

    #[test]
    fn test_timestamp_clause_is_symmetric() {
        let a = entity(1_500, Some(500), 1);
        let b = entity(2_000, Some(500), 1);
        assert_eq!(
            has_conflict(a.as_ref(), b.as_ref()),
            has_conflict(b.as_ref(), a.as_ref())
        );
    }
}
