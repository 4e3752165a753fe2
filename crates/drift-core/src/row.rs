//! # Storage Row Vocabulary
//!
//! Types shared between the entity codec, the local store, and the storage
//! driver contract: the per-row sync status, the scalar value type carried
//! in row maps, and the control-column names.
//!
//! ## Row Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Entity Storage Row                                │
//! │                                                                         │
//! │  id | payload | sync_status | version | is_deleted | created_at |      │
//! │  updated_at | synced_at | deleted_at | metadata | last_error           │
//! │                                                                         │
//! │  payload    = full JSON rendering of the entity                        │
//! │  the rest   = control columns mirrored from the entity, indexed        │
//! │               so the engine never has to decode payload to scan        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// =============================================================================
// Control Column Names
// =============================================================================

/// Control-column names for entity tables.
pub mod col {
    pub const ID: &str = "id";
    pub const PAYLOAD: &str = "payload";
    pub const SYNC_STATUS: &str = "sync_status";
    pub const VERSION: &str = "version";
    pub const IS_DELETED: &str = "is_deleted";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
    pub const SYNCED_AT: &str = "synced_at";
    pub const DELETED_AT: &str = "deleted_at";
    pub const METADATA: &str = "metadata";
    pub const LAST_ERROR: &str = "last_error";
}

// =============================================================================
// Row Status
// =============================================================================

/// Per-row synchronization state.
///
/// Stored in the `sync_status` column as the canonical wire strings
/// (`pending`, `queued`, `synced`, `conflict`, `error`). Parsing is
/// case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    /// Local change not yet pushed.
    Pending,
    /// Push failed; a retry-queue entry exists for this row.
    Queued,
    /// In sync with the remote.
    Synced,
    /// Divergent local/remote evolution awaiting manual resolution.
    Conflict,
    /// Push retries exhausted; `last_error` holds the reason.
    Error,
}

impl RowStatus {
    /// Returns the canonical wire string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Pending => "pending",
            RowStatus::Queued => "queued",
            RowStatus::Synced => "synced",
            RowStatus::Conflict => "conflict",
            RowStatus::Error => "error",
        }
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RowStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(RowStatus::Pending),
            "queued" => Ok(RowStatus::Queued),
            "synced" => Ok(RowStatus::Synced),
            "conflict" => Ok(RowStatus::Conflict),
            "error" => Ok(RowStatus::Error),
            other => Err(CoreError::unknown("sync status", other)),
        }
    }
}

// =============================================================================
// Scalar Values
// =============================================================================

/// A scalar cell value as exchanged with the storage driver.
///
/// The driver contract is row-oriented: string-keyed maps of primitive
/// scalars. Booleans travel as integers (0/1) and timestamps as integer
/// epoch milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Real(f64),
    Null,
}

impl Value {
    /// Returns the text content, if this is a non-null text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content, if this is an integer value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns true if the cell is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Wraps an optional text value, mapping `None` to NULL.
    pub fn opt_text(v: Option<impl Into<String>>) -> Value {
        match v {
            Some(s) => Value::Text(s.into()),
            None => Value::Null,
        }
    }

    /// Wraps an optional integer value, mapping `None` to NULL.
    pub fn opt_integer(v: Option<i64>) -> Value {
        match v {
            Some(i) => Value::Integer(i),
            None => Value::Null,
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Integer(i64::from(b))
    }
}

/// A storage row: ordered map of column name to scalar value.
///
/// `BTreeMap` keeps column order deterministic, which keeps generated SQL
/// stable across runs.
pub type Row = BTreeMap<String, Value>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_strings() {
        assert_eq!(RowStatus::Pending.as_str(), "pending");
        assert_eq!(RowStatus::Queued.as_str(), "queued");
        assert_eq!(RowStatus::Synced.as_str(), "synced");
        assert_eq!(RowStatus::Conflict.as_str(), "conflict");
        assert_eq!(RowStatus::Error.as_str(), "error");
    }

    #[test]
    fn test_status_parse_case_insensitive() {
        assert_eq!("PENDING".parse::<RowStatus>().unwrap(), RowStatus::Pending);
        assert_eq!("Synced".parse::<RowStatus>().unwrap(), RowStatus::Synced);
        assert!("gone".parse::<RowStatus>().is_err());
    }

    #[test]
    fn test_value_helpers() {
        assert_eq!(Value::from("a").as_str(), Some("a"));
        assert_eq!(Value::from(3_i64).as_i64(), Some(3));
        assert_eq!(Value::from(true).as_i64(), Some(1));
        assert!(Value::opt_text(None::<String>).is_null());
        assert_eq!(Value::opt_integer(Some(7)).as_i64(), Some(7));
    }
}
