//! # drift-db: Local Replica Layer
//!
//! This crate owns the durable local replica for the Drift sync engine:
//! the storage-driver contract, the bundled SQLite driver, schema
//! bootstrap, the entity codec, and the typed local store.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Drift Data Flow                                 │
//! │                                                                         │
//! │  Facade save/update (drift-sync)                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     drift-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │  LocalStore   │    │  Repositories │    │    Codec     │  │   │
//! │  │   │  (store.rs)   │    │ queue/conflict│    │  (codec.rs)  │  │   │
//! │  │   │               │◄───│  /metadata    │    │ entity ⇄ row │  │   │
//! │  │   │ registry +    │    │               │    │              │  │   │
//! │  │   │ typed CRUD    │    └───────────────┘    └──────────────┘  │   │
//! │  │   └───────┬───────┘                                            │   │
//! │  │           │ StorageDriver trait (driver.rs)                    │   │
//! │  │           ▼                                                    │   │
//! │  │   SqliteDriver - pooled sqlx SQLite, WAL mode                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  single file-backed database: sync_metadata, sync_queue,               │
//! │  sync_conflicts, one table per registered entity                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`driver`] - Storage contract + SQLite implementation
//! - [`schema`] - Idempotent DDL for system and entity tables
//! - [`codec`] - Entity ⇄ storage-row serialization
//! - [`store`] - Registry + typed CRUD over the driver
//! - [`repository`] - sync_queue / sync_conflicts / sync_metadata access
//! - [`error`] - Store error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use drift_db::{DriverConfig, LocalStore, SqliteDriver};
//!
//! let driver = Arc::new(SqliteDriver::new(DriverConfig::new("drift.db")));
//! let store = LocalStore::new(driver);
//! store.register_entity("todos", None, todo_factory()).await?;
//! store.initialize().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod codec;
pub mod driver;
pub mod error;
pub mod repository;
pub mod schema;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use codec::{serialize_for_storage, EntityFactory, SerializeOptions};
pub use driver::{DriverConfig, SqliteDriver, Statement, StorageDriver};
pub use error::{StoreError, StoreResult};
pub use store::{EntityRegistration, LocalStore};

// Repository re-exports for convenience
pub use repository::conflict::{ConflictRecord, ConflictRepository};
pub use repository::metadata::{MetadataRepository, TableSyncSummary};
pub use repository::queue::{QueueEntry, QueueOperation, QueueRepository};
