//! # Sync Error Types
//!
//! Engine-level error taxonomy.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Transport     │  │    Storage      │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Network        │  │  Storage        │  │  Validation             │ │
//! │  │  Timeout        │  │  NotInitialized │  │  Serialization          │ │
//! │  │  Auth           │  │  EntityNotFound │  │  ConflictUnresolved     │ │
//! │  │  Permission     │  │                 │  │                         │ │
//! │  │  RateLimited    │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all engine failures.
///
/// ## Design Principles
/// - Per-row push/pull failures never surface here; they land in row state
///   (`error` / `queued` / `conflict`) and `last_error`
/// - Each variant carries enough context for debugging
/// - All errors are `Send + Sync` for async compatibility
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Engine or facade used before initialization.
    #[error("Sync engine not initialized")]
    NotInitialized,

    /// Invalid engine or adapter configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Transport error or non-2xx response from the remote.
    #[error("Network failure{}: {message}", status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Network {
        status: Option<u16>,
        message: String,
    },

    /// Request exceeded the configured timeout.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Remote rejected credentials (HTTP 401).
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Remote denied access (HTTP 403).
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Remote throttled the client (HTTP 429).
    #[error("Rate limited: {0}")]
    RateLimited(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Underlying store rejected a statement.
    #[error("Storage failure: {0}")]
    Storage(#[from] drift_db::StoreError),

    /// Lookup miss where presence was required.
    #[error("{table} entity not found: {id}")]
    EntityNotFound { table: String, id: String },

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Inbound payload rejected (wrong shape, wrong type).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// JSON encode/decode failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// No resolver produced an entity for a detected conflict.
    #[error("Conflict requires manual resolution: {entity_id}")]
    ConflictUnresolved { entity_id: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// A status or connectivity channel closed underneath the engine.
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// The engine was disposed.
    #[error("Sync engine disposed")]
    Disposed,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(err.to_string())
        } else {
            SyncError::Network {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<drift_core::CoreError> for SyncError {
    fn from(err: drift_core::CoreError) -> Self {
        match err {
            drift_core::CoreError::Validation(msg) => SyncError::Validation(msg),
            other => SyncError::Serialization(other.to_string()),
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidConfig(format!("invalid URL: {}", err))
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Maps a non-2xx HTTP status to the matching error kind.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => SyncError::Auth(message),
            403 => SyncError::Permission(message),
            429 => SyncError::RateLimited(message),
            408 | 504 => SyncError::Timeout(message),
            _ => SyncError::Network {
                status: Some(status),
                message,
            },
        }
    }

    /// Returns true if the operation can be retried.
    ///
    /// ## Retryable
    /// - Network failures and timeouts
    /// - Rate limiting (after backoff)
    ///
    /// ## Non-Retryable
    /// - Configuration, validation, auth/permission
    /// - Storage failures (retrying cannot fix a rejected statement)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Network { .. } | SyncError::Timeout(_) | SyncError::RateLimited(_)
        )
    }
}
