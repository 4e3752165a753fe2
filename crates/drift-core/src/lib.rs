//! # drift-core: Pure Sync Vocabulary
//!
//! This crate is the I/O-free heart of the Drift sync engine. It defines
//! the contracts and value types every other crate speaks.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Drift Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Application entities                         │   │
//! │  │        TodoItem, Note, ... (implement SyncEntity)               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ drift-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │  entity   │  │    row    │  │  status   │  │ conflict  │  │   │
//! │  │   │SyncEntity │  │ RowStatus │  │ SyncStatus│  │ Resolver  │  │   │
//! │  │   │ RawEntity │  │   Value   │  │  SyncMode │  │  Default  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │        drift-db (local replica)   drift-sync (engine + facade)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`entity`] - The `SyncEntity` contract and the `RawEntity` fallback
//! - [`row`] - Row status, scalar values, control-column names
//! - [`status`] - Immutable status snapshot + derived predicates
//! - [`conflict`] - Conflict taxonomy, resolver contract, default resolver
//! - [`time`] - Millisecond-epoch timestamp conversions
//! - [`error`] - Core error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod conflict;
pub mod entity;
pub mod error;
pub mod row;
pub mod status;
pub mod time;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use conflict::{
    ConflictKind, ConflictResolver, DefaultResolver, ResolutionStrategy, SyncConflict,
};
pub use entity::{base_json, JsonMap, RawEntity, SyncEntity};
pub use error::{CoreError, CoreResult};
pub use row::{col, Row, RowStatus, Value};
pub use status::{SyncMode, SyncStatus};
