//! # Store Error Types
//!
//! Error types for the local replica layer.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StoreError (this module) ← Adds context and categorization            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncError (drift-sync) ← Engine-level taxonomy                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Local replica errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store (or driver) was used before `initialize()`.
    #[error("Local store not initialized")]
    NotInitialized,

    /// No entity registration exists for the table.
    #[error("No entity registered for table '{0}'")]
    UnknownTable(String),

    /// A table or column name is not a valid SQL identifier.
    ///
    /// ## When This Occurs
    /// - `register_entity` called with a table name containing punctuation
    /// - a caller-supplied column name would break statement assembly
    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    /// Lookup miss where presence was required.
    #[error("{table} row not found: {id}")]
    NotFound { table: String, id: String },

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Payload encode/decode failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Internal store error.
    #[error("Internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Creates a NotFound error for a given table and row id.
    pub fn not_found(table: impl Into<String>, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            table: table.into(),
            id: id.into(),
        }
    }
}

/// Convert sqlx errors to StoreError.
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound {
                table: "unknown".to_string(),
                id: "unknown".to_string(),
            },
            sqlx::Error::Database(db_err) => StoreError::QueryFailed(db_err.message().to_string()),
            sqlx::Error::PoolTimedOut => {
                StoreError::ConnectionFailed("connection pool exhausted".to_string())
            }
            sqlx::Error::PoolClosed => StoreError::ConnectionFailed("pool is closed".to_string()),
            _ => StoreError::Internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<drift_core::CoreError> for StoreError {
    fn from(err: drift_core::CoreError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
