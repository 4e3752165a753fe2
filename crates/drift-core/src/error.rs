//! # Core Error Types
//!
//! Errors produced by the pure layer: payload validation and the
//! parse-from-wire paths (`RowStatus`, `ConflictKind`, `ResolutionStrategy`).

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors from the I/O-free layer.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An inbound payload failed validation (wrong shape, wrong type).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// JSON encode/decode failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// A wire string did not parse into its enum.
    ///
    /// ## When This Occurs
    /// - Unknown `sync_status` column value
    /// - Unknown conflict kind or resolution strategy in `sync_conflicts`
    #[error("Unknown {what}: '{value}'")]
    UnknownWireValue { what: &'static str, value: String },
}

impl CoreError {
    /// Creates an `UnknownWireValue` error.
    pub fn unknown(what: &'static str, value: impl Into<String>) -> Self {
        CoreError::UnknownWireValue {
            what,
            value: value.into(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}
