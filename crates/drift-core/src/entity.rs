//! # Entity Contract
//!
//! Every syncable record implements [`SyncEntity`]. The engine never looks
//! at domain fields: it reads the sync bookkeeping through this trait and
//! moves whole entities around as JSON payloads.
//!
//! ## Polymorphism Without Subclassing
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Application type (TodoItem, Note, ...)                                 │
//! │        implements SyncEntity                                            │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  Box<dyn SyncEntity> ──► codec ──► storage row (payload + columns)     │
//! │        ▲                                                                │
//! │        │  factory registered per table rebuilds the concrete type      │
//! │  materialize(table, row)                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The registry mapping table name → factory lives in the local store; this
//! module only defines the contract and the [`RawEntity`] fallback used when
//! a factory is missing or fails.

use chrono::{DateTime, Utc};
use serde_json::Value as Json;

use crate::time;

/// JSON object type used for payloads and metadata.
pub type JsonMap = serde_json::Map<String, Json>;

// =============================================================================
// SyncEntity
// =============================================================================

/// Contract every syncable record exposes to the engine.
///
/// ## Invariants
/// - `id` is non-empty and unique within `table_name`
/// - `updated_at >= created_at`
/// - `version` only increases
/// - a mutation bumps `updated_at` and clears `synced_at`
pub trait SyncEntity: Send + Sync + std::fmt::Debug {
    /// The entity's table; identifies both the storage location and the
    /// remote endpoint registered for it.
    fn table_name(&self) -> &str;

    /// Stable string primary key.
    fn id(&self) -> &str;

    fn created_at(&self) -> DateTime<Utc>;

    fn updated_at(&self) -> DateTime<Utc>;

    /// Timestamp of the last successful push/pull, or `None` if never
    /// synced (or dirty since the last sync).
    fn synced_at(&self) -> Option<DateTime<Utc>>;

    /// Monotonically increasing counter used for conflict detection.
    fn version(&self) -> i64;

    /// Soft-delete tombstone flag.
    fn is_deleted(&self) -> bool;

    /// Opaque application metadata, passed through verbatim.
    fn metadata(&self) -> JsonMap {
        JsonMap::new()
    }

    /// Full JSON rendering: sync bookkeeping plus domain fields, with
    /// timestamps as integer epoch milliseconds. This is the push body and
    /// the storage `payload` column.
    fn to_json(&self) -> JsonMap;

    /// Clones the entity behind the trait object.
    fn boxed_clone(&self) -> Box<dyn SyncEntity>;
}

impl Clone for Box<dyn SyncEntity> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

/// Builds the sync-bookkeeping part of an entity's JSON rendering.
///
/// Implementors call this from `to_json` and then add their domain fields,
/// which guarantees the wire shape stays uniform across entity types.
pub fn base_json(entity: &dyn SyncEntity) -> JsonMap {
    let mut map = JsonMap::new();
    map.insert("id".into(), Json::String(entity.id().to_string()));
    map.insert(
        "created_at".into(),
        Json::from(time::to_millis(entity.created_at())),
    );
    map.insert(
        "updated_at".into(),
        Json::from(time::to_millis(entity.updated_at())),
    );
    map.insert(
        "synced_at".into(),
        match entity.synced_at() {
            Some(ts) => Json::from(time::to_millis(ts)),
            None => Json::Null,
        },
    );
    map.insert("version".into(), Json::from(entity.version()));
    map.insert("is_deleted".into(), Json::Bool(entity.is_deleted()));
    map.insert("metadata".into(), Json::Object(entity.metadata()));
    map
}

// =============================================================================
// JSON Field Accessors
// =============================================================================

/// Reads a string field from a payload map.
pub fn json_str(map: &JsonMap, key: &str) -> Option<String> {
    map.get(key).and_then(Json::as_str).map(str::to_string)
}

/// Reads an integer field from a payload map.
pub fn json_i64(map: &JsonMap, key: &str) -> Option<i64> {
    map.get(key).and_then(Json::as_i64)
}

/// Reads a boolean field, accepting JSON bools and 0/1 integers.
///
/// Storage overlays write `is_deleted` as 0/1, so both encodings appear.
pub fn json_bool(map: &JsonMap, key: &str) -> Option<bool> {
    match map.get(key) {
        Some(Json::Bool(b)) => Some(*b),
        Some(Json::Number(n)) => n.as_i64().map(|i| i != 0),
        _ => None,
    }
}

/// Reads a millisecond-epoch timestamp field.
pub fn json_timestamp(map: &JsonMap, key: &str) -> Option<DateTime<Utc>> {
    json_i64(map, key).and_then(time::from_millis)
}

// =============================================================================
// RawEntity
// =============================================================================

/// Minimal entity reconstructed from raw storage columns.
///
/// When a row's registered factory is missing or fails, the engine must
/// still be able to push the row. `RawEntity` carries only the sync
/// bookkeeping plus the raw payload and satisfies the same contract as
/// domain entities for the push path.
#[derive(Debug, Clone)]
pub struct RawEntity {
    table: String,
    id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    payload: JsonMap,
}

impl RawEntity {
    /// Creates a raw entity from control-column values and a payload.
    pub fn new(
        table: impl Into<String>,
        id: impl Into<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        payload: JsonMap,
    ) -> Self {
        RawEntity {
            table: table.into(),
            id: id.into(),
            created_at,
            updated_at,
            payload,
        }
    }

    /// Creates a raw entity from a payload alone, reading the bookkeeping
    /// fields out of the payload and defaulting what is absent.
    pub fn from_payload(table: impl Into<String>, payload: JsonMap) -> Self {
        let id = json_str(&payload, "id").unwrap_or_default();
        let now = Utc::now();
        let created_at = json_timestamp(&payload, "created_at").unwrap_or(now);
        let updated_at = json_timestamp(&payload, "updated_at").unwrap_or(created_at);
        RawEntity::new(table, id, created_at, updated_at, payload)
    }

    /// The raw payload as read from storage.
    pub fn payload(&self) -> &JsonMap {
        &self.payload
    }
}

impl SyncEntity for RawEntity {
    fn table_name(&self) -> &str {
        &self.table
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn synced_at(&self) -> Option<DateTime<Utc>> {
        json_timestamp(&self.payload, "synced_at")
    }

    fn version(&self) -> i64 {
        json_i64(&self.payload, "version").unwrap_or(1)
    }

    fn is_deleted(&self) -> bool {
        json_bool(&self.payload, "is_deleted").unwrap_or(false)
    }

    fn metadata(&self) -> JsonMap {
        match self.payload.get("metadata") {
            Some(Json::Object(m)) => m.clone(),
            _ => JsonMap::new(),
        }
    }

    fn to_json(&self) -> JsonMap {
        // Raw payload wins for domain fields; bookkeeping is overlaid so
        // the push body always carries the authoritative id and timestamps.
        let mut map = self.payload.clone();
        for (k, v) in base_json(self) {
            map.insert(k, v);
        }
        map
    }

    fn boxed_clone(&self) -> Box<dyn SyncEntity> {
        Box::new(self.clone())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> JsonMap {
        let mut map = JsonMap::new();
        map.insert("id".into(), json!("r1"));
        map.insert("created_at".into(), json!(1_000));
        map.insert("updated_at".into(), json!(2_000));
        map.insert("version".into(), json!(4));
        map.insert("is_deleted".into(), json!(1));
        map.insert("title".into(), json!("carried through"));
        map
    }

    #[test]
    fn test_raw_entity_reads_bookkeeping_from_payload() {
        let raw = RawEntity::from_payload("todos", payload());
        assert_eq!(raw.id(), "r1");
        assert_eq!(raw.table_name(), "todos");
        assert_eq!(raw.created_at().timestamp_millis(), 1_000);
        assert_eq!(raw.updated_at().timestamp_millis(), 2_000);
        assert_eq!(raw.version(), 4);
        assert!(raw.is_deleted());
        assert!(raw.synced_at().is_none());
    }

    #[test]
    fn test_raw_entity_to_json_keeps_domain_fields() {
        let raw = RawEntity::from_payload("todos", payload());
        let json = raw.to_json();
        assert_eq!(json_str(&json, "title").as_deref(), Some("carried through"));
        assert_eq!(json_i64(&json, "updated_at"), Some(2_000));
        // overlay normalizes is_deleted to a real bool
        assert_eq!(json_bool(&json, "is_deleted"), Some(true));
    }

    #[test]
    fn test_json_bool_accepts_both_encodings() {
        let mut map = JsonMap::new();
        map.insert("a".into(), json!(true));
        map.insert("b".into(), json!(0));
        assert_eq!(json_bool(&map, "a"), Some(true));
        assert_eq!(json_bool(&map, "b"), Some(false));
        assert_eq!(json_bool(&map, "missing"), None);
    }
}
