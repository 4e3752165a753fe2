//! # Entity Codec
//!
//! Canonical serialization between a domain entity and its storage row.
//!
//! ## Two Directions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  serialize_for_storage(entity, opts)                                    │
//! │      entity ──► payload JSON + mirrored control columns                 │
//! │                                                                         │
//! │  materialize(table, row, factory)                                       │
//! │      payload JSON ──► map ──► overlay control columns ──► factory       │
//! │                                                                         │
//! │  Guarantee: materialize(serialize_for_storage(e)) ≡ e                   │
//! │  (up to sync bookkeeping the engine added in between)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Control columns are authoritative on the way out of storage: whatever
//! the engine wrote there overlays the payload before the factory runs, so
//! a stale or even missing payload still produces a correct entity.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as Json;

use drift_core::{col, time, CoreResult, JsonMap, Row, RowStatus, SyncEntity, Value};

use crate::error::{StoreError, StoreResult};

/// Factory rebuilding a concrete entity from its JSON map.
///
/// Registered per table; invoked by `materialize`.
pub type EntityFactory = Arc<dyn Fn(JsonMap) -> CoreResult<Box<dyn SyncEntity>> + Send + Sync>;

// =============================================================================
// Serialization Options
// =============================================================================

/// Options for `serialize_for_storage`.
#[derive(Debug, Clone)]
pub struct SerializeOptions {
    /// Value written to the `sync_status` column.
    pub sync_status: RowStatus,

    /// Whether to include the `id` column (omit for UPDATE value maps).
    pub include_id: bool,

    /// Value written to the `last_error` column.
    pub last_error: Option<String>,

    /// Stamp `updated_at = now` and clear `synced_at`, in both the payload
    /// and the control columns. Used by facade `save`/`update`.
    pub touch: bool,

    /// Overrides `synced_at` in both payload and columns. The engine sets
    /// this when writing back a successfully synced or resolved entity.
    pub synced_at: Option<DateTime<Utc>>,
}

impl SerializeOptions {
    /// Options for a local write: `pending`, touched, no error.
    pub fn local_write() -> Self {
        SerializeOptions {
            sync_status: RowStatus::Pending,
            include_id: true,
            last_error: None,
            touch: true,
            synced_at: None,
        }
    }

    /// Options for writing a row in the given status verbatim.
    pub fn status(sync_status: RowStatus) -> Self {
        SerializeOptions {
            sync_status,
            include_id: true,
            last_error: None,
            touch: false,
            synced_at: None,
        }
    }

    pub fn include_id(mut self, include: bool) -> Self {
        self.include_id = include;
        self
    }

    pub fn last_error(mut self, error: Option<String>) -> Self {
        self.last_error = error;
        self
    }

    /// Stamps `synced_at` on the way into storage.
    pub fn synced_at(mut self, ts: DateTime<Utc>) -> Self {
        self.synced_at = Some(ts);
        self
    }
}

// =============================================================================
// Entity -> Row
// =============================================================================

/// Produces the storage row for an entity.
///
/// The `payload` column carries the entity's full JSON rendering; control
/// columns mirror the sync bookkeeping so the engine can scan and index
/// without decoding payloads. Timestamps are integer epoch milliseconds.
pub fn serialize_for_storage(entity: &dyn SyncEntity, opts: &SerializeOptions) -> StoreResult<Row> {
    let mut payload = entity.to_json();

    let updated_at = if opts.touch {
        let now = Utc::now();
        payload.insert("updated_at".into(), Json::from(time::to_millis(now)));
        payload.insert("synced_at".into(), Json::Null);
        now
    } else {
        entity.updated_at()
    };
    let synced_at = if opts.touch {
        None
    } else if let Some(ts) = opts.synced_at {
        payload.insert("synced_at".into(), Json::from(time::to_millis(ts)));
        Some(ts)
    } else {
        entity.synced_at()
    };

    // deleted_at is not part of the entity contract; keep whatever the
    // payload carries, falling back to updated_at for fresh tombstones
    let deleted_at = payload
        .get("deleted_at")
        .and_then(Json::as_i64)
        .or_else(|| entity.is_deleted().then(|| time::to_millis(updated_at)));

    let mut row = Row::new();
    if opts.include_id {
        row.insert(col::ID.into(), Value::from(entity.id()));
    }
    row.insert(
        col::PAYLOAD.into(),
        Value::Text(serde_json::to_string(&Json::Object(payload))?),
    );
    row.insert(
        col::SYNC_STATUS.into(),
        Value::from(opts.sync_status.as_str()),
    );
    row.insert(col::VERSION.into(), Value::from(entity.version()));
    row.insert(col::IS_DELETED.into(), Value::from(entity.is_deleted()));
    row.insert(
        col::CREATED_AT.into(),
        Value::from(time::to_millis(entity.created_at())),
    );
    row.insert(
        col::UPDATED_AT.into(),
        Value::from(time::to_millis(updated_at)),
    );
    row.insert(
        col::SYNCED_AT.into(),
        Value::opt_integer(time::to_millis_opt(synced_at)),
    );
    row.insert(col::DELETED_AT.into(), Value::opt_integer(deleted_at));
    row.insert(
        col::METADATA.into(),
        Value::Text(serde_json::to_string(&Json::Object(entity.metadata()))?),
    );
    row.insert(
        col::LAST_ERROR.into(),
        Value::opt_text(opts.last_error.clone()),
    );
    Ok(row)
}

// =============================================================================
// Row -> Entity
// =============================================================================

/// Decodes the `payload` column into a JSON map.
///
/// A missing or malformed payload yields an empty map; the control-column
/// overlay must still produce a valid entity.
fn decode_payload(row: &Row) -> JsonMap {
    row.get(col::PAYLOAD)
        .and_then(Value::as_str)
        .and_then(|text| serde_json::from_str::<Json>(text).ok())
        .and_then(|json| match json {
            Json::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default()
}

/// Overlays authoritative control-column values onto a payload map.
fn overlay_columns(map: &mut JsonMap, row: &Row) {
    if let Some(id) = row.get(col::ID).and_then(Value::as_str) {
        map.insert("id".into(), Json::String(id.to_string()));
    }
    for column in [col::CREATED_AT, col::UPDATED_AT, col::SYNCED_AT, col::DELETED_AT] {
        match row.get(column) {
            Some(Value::Integer(ms)) => {
                map.insert(column.to_string(), Json::from(*ms));
            }
            Some(Value::Null) if column == col::SYNCED_AT => {
                map.insert(column.to_string(), Json::Null);
            }
            _ => {}
        }
    }
    if let Some(version) = row.get(col::VERSION).and_then(Value::as_i64) {
        map.insert("version".into(), Json::from(version));
    }
    if let Some(deleted) = row.get(col::IS_DELETED).and_then(Value::as_i64) {
        map.insert("is_deleted".into(), Json::Bool(deleted != 0));
    }
    if let Some(status) = row.get(col::SYNC_STATUS).and_then(Value::as_str) {
        map.insert("sync_status".into(), Json::String(status.to_string()));
    }
    if let Some(error) = row.get(col::LAST_ERROR).and_then(Value::as_str) {
        map.insert("last_error".into(), Json::String(error.to_string()));
    }
    if let Some(Value::Text(meta)) = row.get(col::METADATA) {
        if let Ok(Json::Object(meta_map)) = serde_json::from_str::<Json>(meta) {
            map.insert("metadata".into(), Json::Object(meta_map));
        }
    }
}

/// Decodes a storage row back into a domain entity via the table's factory.
pub fn materialize(
    table: &str,
    row: &Row,
    factory: &EntityFactory,
) -> StoreResult<Box<dyn SyncEntity>> {
    let mut map = decode_payload(row);
    overlay_columns(&mut map, row);
    factory(map).map_err(|e| {
        StoreError::Serialization(format!("factory for '{}' failed: {}", table, e))
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use drift_core::RawEntity;
    use serde_json::json;

    fn raw_factory(table: &'static str) -> EntityFactory {
        Arc::new(move |map| Ok(Box::new(RawEntity::from_payload(table, map)) as Box<dyn SyncEntity>))
    }

    fn entity() -> RawEntity {
        let mut payload = JsonMap::new();
        payload.insert("id".into(), json!("t1"));
        payload.insert("created_at".into(), json!(1_000));
        payload.insert("updated_at".into(), json!(2_000));
        payload.insert("version".into(), json!(3));
        payload.insert("is_deleted".into(), json!(false));
        payload.insert("title".into(), json!("buy milk"));
        RawEntity::from_payload("todos", payload)
    }

    #[test]
    fn test_serialize_mirrors_control_columns() {
        let row =
            serialize_for_storage(&entity(), &SerializeOptions::status(RowStatus::Pending))
                .unwrap();
        assert_eq!(row.get(col::ID).unwrap().as_str(), Some("t1"));
        assert_eq!(row.get(col::SYNC_STATUS).unwrap().as_str(), Some("pending"));
        assert_eq!(row.get(col::VERSION).unwrap().as_i64(), Some(3));
        assert_eq!(row.get(col::IS_DELETED).unwrap().as_i64(), Some(0));
        assert_eq!(row.get(col::CREATED_AT).unwrap().as_i64(), Some(1_000));
        assert_eq!(row.get(col::UPDATED_AT).unwrap().as_i64(), Some(2_000));
        assert!(row.get(col::SYNCED_AT).unwrap().is_null());
        assert!(row.get(col::LAST_ERROR).unwrap().is_null());
    }

    #[test]
    fn test_touch_stamps_updated_and_clears_synced() {
        let before = Utc::now().timestamp_millis();
        let row = serialize_for_storage(&entity(), &SerializeOptions::local_write()).unwrap();
        let updated = row.get(col::UPDATED_AT).unwrap().as_i64().unwrap();
        assert!(updated >= before);
        assert!(row.get(col::SYNCED_AT).unwrap().is_null());

        // the payload must agree with the columns
        let payload: Json =
            serde_json::from_str(row.get(col::PAYLOAD).unwrap().as_str().unwrap()).unwrap();
        assert_eq!(payload["updated_at"].as_i64(), Some(updated));
        assert!(payload["synced_at"].is_null());
    }

    #[test]
    fn test_round_trip_preserves_core_and_domain_fields() {
        let original = entity();
        let row =
            serialize_for_storage(&original, &SerializeOptions::status(RowStatus::Synced))
                .unwrap();
        let back = materialize("todos", &row, &raw_factory("todos")).unwrap();

        assert_eq!(back.id(), original.id());
        assert_eq!(back.version(), original.version());
        assert_eq!(back.is_deleted(), original.is_deleted());
        assert_eq!(
            back.created_at().timestamp_millis(),
            original.created_at().timestamp_millis()
        );
        assert_eq!(
            back.updated_at().timestamp_millis(),
            original.updated_at().timestamp_millis()
        );
        assert_eq!(
            drift_core::entity::json_str(&back.to_json(), "title").as_deref(),
            Some("buy milk")
        );
    }

    #[test]
    fn test_materialize_survives_malformed_payload() {
        let mut row = Row::new();
        row.insert(col::ID.into(), Value::from("t9"));
        row.insert(col::PAYLOAD.into(), Value::from("{not json"));
        row.insert(col::UPDATED_AT.into(), Value::from(5_000_i64));
        row.insert(col::IS_DELETED.into(), Value::from(1_i64));
        row.insert(col::SYNC_STATUS.into(), Value::from("error"));
        row.insert(col::LAST_ERROR.into(), Value::from("remote said no"));

        let back = materialize("todos", &row, &raw_factory("todos")).unwrap();
        assert_eq!(back.id(), "t9");
        assert!(back.is_deleted());
        assert_eq!(back.updated_at().timestamp_millis(), 5_000);
    }

    #[test]
    fn test_exclude_id_for_update_maps() {
        let row = serialize_for_storage(
            &entity(),
            &SerializeOptions::status(RowStatus::Synced).include_id(false),
        )
        .unwrap();
        assert!(!row.contains_key(col::ID));
    }
}
