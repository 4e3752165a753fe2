//! # Schema Bootstrap
//!
//! DDL for the engine's system tables and for registered entity tables.
//! Everything is `CREATE TABLE IF NOT EXISTS` / `CREATE INDEX IF NOT
//! EXISTS`, so bootstrap can run on every startup and after every late
//! registration without migration files.

use crate::error::{StoreError, StoreResult};

/// System table holding per-table sync summaries.
pub const SYNC_METADATA_TABLE: &str = "sync_metadata";

/// System table holding the durable retry queue (failed-push outbox).
pub const SYNC_QUEUE_TABLE: &str = "sync_queue";

/// System table holding persistent unresolved conflicts.
pub const SYNC_CONFLICTS_TABLE: &str = "sync_conflicts";

/// DDL for `sync_metadata`.
pub const SYNC_METADATA_SQL: &str = "\
CREATE TABLE IF NOT EXISTS sync_metadata (
    table_name TEXT PRIMARY KEY,
    last_sync_at INTEGER,
    pending_count INTEGER NOT NULL DEFAULT 0,
    failed_count INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER
)";

/// DDL for `sync_queue`.
pub const SYNC_QUEUE_SQL: &str = "\
CREATE TABLE IF NOT EXISTS sync_queue (
    id TEXT PRIMARY KEY,
    entity_id TEXT NOT NULL,
    table_name TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    operation TEXT NOT NULL DEFAULT 'push',
    payload TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    next_retry_at INTEGER,
    last_error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)";

/// DDL for `sync_conflicts`.
pub const SYNC_CONFLICTS_SQL: &str = "\
CREATE TABLE IF NOT EXISTS sync_conflicts (
    id TEXT PRIMARY KEY,
    entity_id TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    local_data TEXT NOT NULL,
    remote_data TEXT NOT NULL,
    conflict_type TEXT NOT NULL,
    detected_at INTEGER NOT NULL,
    is_resolved INTEGER NOT NULL DEFAULT 0,
    resolved_at INTEGER,
    resolution_strategy TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)";

/// Secondary indexes on the system tables.
pub const SYSTEM_INDEX_SQL: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_next_retry_at ON sync_queue (next_retry_at)",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_entity_id ON sync_queue (entity_id)",
    "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_entity ON sync_conflicts (entity_type, entity_id)",
    "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_is_resolved ON sync_conflicts (is_resolved)",
];

/// Returns true for names safe to splice into DDL/DML.
///
/// First character alphabetic or underscore, rest alphanumeric or
/// underscore. Everything the store interpolates (table names) must pass.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validates an identifier, returning it on success.
pub fn checked_identifier(name: &str) -> StoreResult<&str> {
    if is_valid_identifier(name) {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Builds the standard entity-table DDL for a registered table.
///
/// `payload` carries the JSON entity; the remaining control columns mirror
/// entity fields so the engine can scan without decoding payloads.
pub fn entity_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
    id TEXT PRIMARY KEY,
    payload TEXT,
    sync_status TEXT NOT NULL DEFAULT 'pending',
    version INTEGER NOT NULL DEFAULT 1,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER,
    updated_at INTEGER,
    synced_at INTEGER,
    deleted_at INTEGER,
    metadata TEXT,
    last_error TEXT
)"
    )
}

/// Builds the index statements for a registered entity table.
pub fn entity_index_sql(table: &str) -> Vec<String> {
    ["created_at", "updated_at", "synced_at", "sync_status"]
        .iter()
        .map(|column| {
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table} ({column})")
        })
        .collect()
}
