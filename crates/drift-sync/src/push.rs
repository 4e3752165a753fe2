//! # Push Phase
//!
//! Uploads local rows to the remote and owns the durable retry queue.
//!
//! ## Push Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  find_unsynced(table) ──► batches of batch_size                         │
//! │       │                                                                 │
//! │       ▼  per row                                                        │
//! │  materialize ── factory failed ──► RawEntity from raw columns          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  push_entity: POST entity JSON                                          │
//! │    2xx              ──► row 'synced', synced_at = now                  │
//! │    failure          ──► retry, sleeping attempt × 2s between tries     │
//! │    retries exhausted──► queue entry (due now + 60s), row 'queued'      │
//! │                                                                         │
//! │  process_sync_queue (start of every cycle):                             │
//! │    due entry pushed without re-queueing                                 │
//! │    success          ──► queue row removed                              │
//! │    failure          ──► retry_count += 1; due now + (count+1) × 3s     │
//! │    count exhausted  ──► row 'error', queue row dropped                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows already owned by another path are not re-pushed here: `queued`
//! rows belong to the retry queue and `conflict` rows to manual
//! resolution. Pushing them again would double-enqueue or overwrite an
//! arbitration still in flight.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use drift_core::{col, time, JsonMap, RawEntity, Row, RowStatus, SyncEntity, Value};

use crate::engine::SyncEngine;
use crate::error::SyncResult;

/// Outcome of one entity push after retries.
#[derive(Debug)]
pub(crate) enum PushOutcome {
    /// Remote accepted; row marked synced.
    Pushed,
    /// All attempts failed; carries the final error text.
    Failed(String),
}

/// Rebuilds a pushable entity from raw columns when the registered
/// factory is missing or fails. No domain entity is constructed.
fn raw_entity_from_row(table: &str, row: &Row) -> RawEntity {
    let mut payload = row
        .get(col::PAYLOAD)
        .and_then(Value::as_str)
        .and_then(|text| serde_json::from_str::<Json>(text).ok())
        .and_then(|json| match json {
            Json::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();

    let id = row
        .get(col::ID)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    payload.insert("id".into(), Json::String(id.clone()));

    let now = Utc::now();
    let created_at = row
        .get(col::CREATED_AT)
        .and_then(Value::as_i64)
        .and_then(time::from_millis)
        .unwrap_or(now);
    let updated_at = row
        .get(col::UPDATED_AT)
        .and_then(Value::as_i64)
        .and_then(time::from_millis)
        .unwrap_or(created_at);

    RawEntity::new(table, id, created_at, updated_at, payload)
}

fn millis(duration: std::time::Duration) -> ChronoDuration {
    ChronoDuration::milliseconds(duration.as_millis() as i64)
}

impl SyncEngine {
    /// Pushes every pushable unsynced row of a table, in batches.
    pub(crate) async fn push_table(&self, table: &str, endpoint: &str) -> SyncResult<()> {
        let rows = self.store.find_unsynced(table).await?;
        let pushable: Vec<Row> = rows
            .into_iter()
            .filter(|row| {
                let status = row
                    .get(col::SYNC_STATUS)
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<RowStatus>().ok());
                !matches!(status, Some(RowStatus::Queued) | Some(RowStatus::Conflict))
            })
            .collect();

        if pushable.is_empty() {
            debug!(table = %table, "Nothing to push");
            return Ok(());
        }

        let batch_size = self.config.read().await.batch_size;
        info!(table = %table, count = pushable.len(), "Pushing local changes");

        let mut pushed = 0_usize;
        let mut failed = 0_usize;
        for chunk in pushable.chunks(batch_size) {
            for row in chunk {
                let entity: Box<dyn SyncEntity> = match self.store.materialize(table, row).await {
                    Ok(entity) => entity,
                    Err(e) => {
                        warn!(table = %table, error = %e, "Materialization failed; pushing raw row");
                        Box::new(raw_entity_from_row(table, row))
                    }
                };

                match self.push_entity(entity.as_ref(), endpoint, true).await? {
                    PushOutcome::Pushed => pushed += 1,
                    PushOutcome::Failed(_) => failed += 1,
                }
            }
        }

        debug!(table = %table, pushed, failed, "Push phase finished");
        Ok(())
    }

    /// Posts one entity to its endpoint, retrying with linear backoff
    /// (attempt × `push_retry_base`). On success the row is marked synced.
    /// After exhausting retries: with `queue_on_failure` the push is
    /// queued durably and the row marked `queued`; without, row state is
    /// left to the caller.
    pub(crate) async fn push_entity(
        &self,
        entity: &dyn SyncEntity,
        endpoint: &str,
        queue_on_failure: bool,
    ) -> SyncResult<PushOutcome> {
        let config = self.config.read().await.clone();
        let attempts = config.max_retries.max(1);
        let body = Json::Object(entity.to_json());
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.adapter.post(endpoint, &body).await {
                // created or updated; anything else is a failed attempt
                Ok(response) if matches!(response.status_code, 200 | 201) => {
                    self.store
                        .mark_synced(entity.table_name(), entity.id(), Utc::now())
                        .await?;
                    debug!(
                        table = %entity.table_name(),
                        id = %entity.id(),
                        "Pushed entity"
                    );
                    return Ok(PushOutcome::Pushed);
                }
                Ok(response) => {
                    last_error = format!("HTTP {}", response.status_code);
                }
                Err(e) => {
                    last_error = e.to_string();
                    if !e.is_retryable() {
                        warn!(
                            id = %entity.id(),
                            error = %last_error,
                            "Non-retryable push failure"
                        );
                        break;
                    }
                }
            }

            if attempt < attempts {
                tokio::time::sleep(config.push_retry_base * attempt).await;
            }
        }

        warn!(
            table = %entity.table_name(),
            id = %entity.id(),
            error = %last_error,
            "Push failed after retries"
        );

        if queue_on_failure {
            let payload = serde_json::to_string(&body)?;
            let next_retry_at = Utc::now() + millis(config.queue_initial_delay);
            self.store
                .queue()
                .enqueue(
                    entity.id(),
                    entity.table_name(),
                    endpoint,
                    &payload,
                    i64::from(config.max_retries),
                    next_retry_at,
                    Some(&last_error),
                )
                .await?;
            self.store
                .mark_status(
                    entity.table_name(),
                    entity.id(),
                    RowStatus::Queued,
                    Some(&last_error),
                )
                .await?;
        }

        Ok(PushOutcome::Failed(last_error))
    }

    /// Drains the retry queue: every entry due at `now` is pushed once
    /// (its own bookkeeping replaces the in-push retry loop).
    pub(crate) async fn process_sync_queue(&self) -> SyncResult<()> {
        let now = Utc::now();
        let due = self.store.queue().due(now).await?;
        if due.is_empty() {
            return Ok(());
        }

        info!(count = due.len(), "Draining retry queue");
        let queue_retry_base = self.config.read().await.queue_retry_base;

        for entry in due {
            let mut payload: JsonMap = serde_json::from_str::<Json>(&entry.payload)
                .ok()
                .and_then(|json| match json {
                    Json::Object(map) => Some(map),
                    _ => None,
                })
                .unwrap_or_default();
            payload.insert("id".into(), Json::String(entry.entity_id.clone()));

            let entity: Box<dyn SyncEntity> = match self
                .store
                .entity_from_json(&entry.table_name, payload.clone())
                .await
            {
                Ok(entity) => entity,
                Err(e) => {
                    debug!(
                        entity_id = %entry.entity_id,
                        error = %e,
                        "Queue factory fallback to raw entity"
                    );
                    Box::new(RawEntity::from_payload(entry.table_name.clone(), payload))
                }
            };

            match self.push_entity(entity.as_ref(), &entry.endpoint, false).await? {
                PushOutcome::Pushed => {
                    self.store.queue().remove(&entry.id).await?;
                }
                PushOutcome::Failed(error) => {
                    let retry_count = entry.retry_count + 1;
                    if retry_count >= entry.max_retries {
                        warn!(
                            entity_id = %entry.entity_id,
                            retry_count,
                            "Queue retries exhausted; marking row errored"
                        );
                        self.store
                            .mark_status(
                                &entry.table_name,
                                &entry.entity_id,
                                RowStatus::Error,
                                Some(&error),
                            )
                            .await?;
                        self.store.queue().remove(&entry.id).await?;
                    } else {
                        let next_retry_at: DateTime<Utc> =
                            now + millis(queue_retry_base) * (retry_count as i32 + 1);
                        self.store
                            .queue()
                            .record_failure(&entry.id, retry_count, next_retry_at, &error)
                            .await?;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_entity_from_row_overlays_columns() {
        let mut row = Row::new();
        row.insert(col::ID.into(), Value::from("x1"));
        row.insert(col::CREATED_AT.into(), Value::from(1_000_i64));
        row.insert(col::UPDATED_AT.into(), Value::from(2_000_i64));
        row.insert(
            col::PAYLOAD.into(),
            Value::from(r#"{"id":"stale","title":"kept"}"#),
        );

        let raw = raw_entity_from_row("todos", &row);
        assert_eq!(raw.id(), "x1");
        assert_eq!(raw.created_at().timestamp_millis(), 1_000);
        assert_eq!(raw.updated_at().timestamp_millis(), 2_000);
        assert_eq!(raw.payload().get("title"), Some(&json!("kept")));
    }

    #[test]
    fn test_raw_entity_from_row_handles_garbage_payload() {
        let mut row = Row::new();
        row.insert(col::ID.into(), Value::from("x1"));
        row.insert(col::PAYLOAD.into(), Value::from("{broken"));

        let raw = raw_entity_from_row("todos", &row);
        assert_eq!(raw.id(), "x1");
        assert_eq!(raw.version(), 1);
    }
}
