//! # drift-sync: Sync Engine for Drift
//!
//! This crate provides the synchronization layer of Drift: offline-first
//! local writes reconciled against an authoritative HTTP remote.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                   OfflineSync (facade.rs)                        │  │
//! │  │   save / update / delete land rows as 'pending'                  │  │
//! │  │   sync() runs a cycle; register_entity wires table + endpoint    │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │  ┌────────────────────────────▼─────────────────────────────────────┐  │
//! │  │                   SyncEngine (engine.rs)                         │  │
//! │  │                                                                  │  │
//! │  │   queue drain ──► per table: push ──► pull ──► conflicts         │  │
//! │  │   (push.rs)        (push.rs)  (pull.rs)  (pull.rs)               │  │
//! │  │                                                                  │  │
//! │  │   auto-sync timer · connectivity listener · status channel       │  │
//! │  └──────────┬──────────────────────────────┬────────────────────────┘  │
//! │             │                              │                            │
//! │             ▼                              ▼                            │
//! │   LocalStore (drift-db)          NetworkAdapter (network.rs)           │
//! │   rows + queue + conflicts       HTTP push/pull, connectivity          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`facade`] - `OfflineSync` entry point + builder
//! - [`engine`] - `SyncEngine` orchestrator, auto-sync, registries
//! - [`push`] - Push phase and the durable retry queue
//! - [`pull`] - Pull phase, conflict detection and arbitration
//! - [`network`] - `NetworkAdapter` contract + reqwest implementation
//! - [`broadcast`] - watch-channel status snapshots
//! - [`error`] - Engine error taxonomy
//!
//! ## Usage
//!
//! ```rust,ignore
//! use drift_sync::OfflineSync;
//!
//! let sync = OfflineSync::builder()
//!     .base_url("https://api.example")
//!     .database_path("drift.db")
//!     .initialize()
//!     .await?;
//!
//! sync.register_entity("todos", "/todos", None, todo_factory()).await?;
//! sync.save(&todo).await?;      // lands 'pending'
//! sync.sync().await?;           // push, pull, reconcile
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod broadcast;
pub mod engine;
pub mod error;
pub mod facade;
pub mod network;
pub mod pull;
pub mod push;

// =============================================================================
// Re-exports
// =============================================================================

pub use broadcast::StatusChannel;
pub use engine::{SyncEngine, SyncEngineConfig, TableRegistration};
pub use error::{SyncError, SyncResult};
pub use facade::{OfflineSync, OfflineSyncBuilder};
pub use network::{AdapterResponse, HttpNetworkAdapter, NetworkAdapter, NetworkConfig};
pub use pull::has_conflict;

// Core vocabulary re-exported so applications depend on one crate
pub use drift_core::{
    ConflictKind, ConflictResolver, DefaultResolver, JsonMap, RawEntity, ResolutionStrategy,
    RowStatus, SyncConflict, SyncEntity, SyncMode, SyncStatus,
};
