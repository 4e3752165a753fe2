//! # System-Table Repositories
//!
//! Data access for the engine's bookkeeping tables. Each repository wraps
//! the storage driver and owns the SQL for one table:
//!
//! - [`queue`] - `sync_queue`, the durable retry outbox
//! - [`conflict`] - `sync_conflicts`, the manual-resolution store
//! - [`metadata`] - `sync_metadata`, per-table sync summaries

pub mod conflict;
pub mod metadata;
pub mod queue;

pub use conflict::{ConflictRecord, ConflictRepository};
pub use metadata::{MetadataRepository, TableSyncSummary};
pub use queue::{QueueEntry, QueueOperation, QueueRepository};
