//! # Local Store
//!
//! Typed access to the local replica: schema bootstrap, the table → factory
//! registry, and row CRUD with the sync bookkeeping the engine depends on.
//!
//! ## Store Anatomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           LocalStore                                    │
//! │                                                                         │
//! │  ┌─────────────────────┐   ┌──────────────────────────────────────┐    │
//! │  │  Entity registry    │   │  StorageDriver (SQLite by default)   │    │
//! │  │  table → factory    │   │                                      │    │
//! │  │  (registration      │   │  sync_metadata | sync_queue |        │    │
//! │  │   order preserved)  │   │  sync_conflicts | <entity tables>    │    │
//! │  └─────────────────────┘   └──────────────────────────────────────┘    │
//! │                                                                         │
//! │  initialize() bootstraps every table; register_entity() after          │
//! │  initialization creates the new table lazily.                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The store is the sole writer of entity, queue, and conflict tables; the
//! engine drives every `sync_status` transition through it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use drift_core::{col, time, JsonMap, Row, RowStatus, SyncEntity, Value};

use crate::codec::{self, EntityFactory, SerializeOptions};
use crate::driver::{Statement, StorageDriver};
use crate::error::{StoreError, StoreResult};
use crate::repository::conflict::ConflictRepository;
use crate::repository::metadata::MetadataRepository;
use crate::repository::queue::QueueRepository;
use crate::schema;

// =============================================================================
// Entity Registration
// =============================================================================

/// A registered entity table: DDL plus the factory used by `materialize`.
#[derive(Clone)]
pub struct EntityRegistration {
    pub table: String,
    pub create_sql: String,
    pub factory: EntityFactory,
}

impl std::fmt::Debug for EntityRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRegistration")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Local Store
// =============================================================================

/// Typed row store over a [`StorageDriver`].
#[derive(Clone)]
pub struct LocalStore {
    driver: Arc<dyn StorageDriver>,
    registry: Arc<RwLock<Vec<EntityRegistration>>>,
    initialized: Arc<AtomicBool>,
}

impl LocalStore {
    /// Creates a store over the given driver. Nothing touches storage
    /// until `initialize()`.
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        LocalStore {
            driver,
            registry: Arc::new(RwLock::new(Vec::new())),
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the underlying driver handle.
    pub fn driver(&self) -> Arc<dyn StorageDriver> {
        self.driver.clone()
    }

    fn ensure_initialized(&self) -> StoreResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    // -------------------------------------------------------------------------
    // Bootstrap & registration
    // -------------------------------------------------------------------------

    /// Opens the driver and creates the system tables plus every entity
    /// table registered so far. Idempotent.
    pub async fn initialize(&self) -> StoreResult<()> {
        self.driver.initialize().await?;

        self.driver.create_table(schema::SYNC_METADATA_SQL).await?;
        self.driver.create_table(schema::SYNC_CONFLICTS_SQL).await?;
        self.driver.create_table(schema::SYNC_QUEUE_SQL).await?;
        for index in schema::SYSTEM_INDEX_SQL {
            self.driver.create_table(index).await?;
        }

        let registry = self.registry.read().await;
        for registration in registry.iter() {
            self.create_entity_table(registration).await?;
        }
        drop(registry);

        self.initialized.store(true, Ordering::Release);
        info!("Local store initialized");
        Ok(())
    }

    /// Closes the underlying driver.
    pub async fn close(&self) -> StoreResult<()> {
        self.initialized.store(false, Ordering::Release);
        self.driver.close().await
    }

    /// Registers an entity table and the factory used to materialize its
    /// rows. When `create_sql` is `None` the standard entity schema is
    /// used. If the store is already initialized, the table is created
    /// immediately.
    pub async fn register_entity(
        &self,
        table: &str,
        create_sql: Option<String>,
        factory: EntityFactory,
    ) -> StoreResult<()> {
        schema::checked_identifier(table)?;

        let registration = EntityRegistration {
            table: table.to_string(),
            create_sql: create_sql.unwrap_or_else(|| schema::entity_table_sql(table)),
            factory,
        };

        let mut registry = self.registry.write().await;
        if let Some(existing) = registry.iter_mut().find(|r| r.table == table) {
            *existing = registration.clone();
        } else {
            registry.push(registration.clone());
        }
        drop(registry);

        if self.initialized.load(Ordering::Acquire) {
            self.create_entity_table(&registration).await?;
        }

        debug!(table = %table, "Registered entity table");
        Ok(())
    }

    async fn create_entity_table(&self, registration: &EntityRegistration) -> StoreResult<()> {
        self.driver.create_table(&registration.create_sql).await?;
        for index in schema::entity_index_sql(&registration.table) {
            self.driver.create_table(&index).await?;
        }
        Ok(())
    }

    /// Registered tables in registration order.
    pub async fn registered_tables(&self) -> Vec<String> {
        self.registry
            .read()
            .await
            .iter()
            .map(|r| r.table.clone())
            .collect()
    }

    async fn factory(&self, table: &str) -> StoreResult<EntityFactory> {
        self.registry
            .read()
            .await
            .iter()
            .find(|r| r.table == table)
            .map(|r| r.factory.clone())
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }

    // -------------------------------------------------------------------------
    // Row CRUD
    // -------------------------------------------------------------------------

    /// Inserts a row, stamping `created_at`/`updated_at` when absent.
    pub async fn insert(&self, table: &str, mut row: Row) -> StoreResult<String> {
        self.ensure_initialized()?;
        let table = schema::checked_identifier(table)?;
        let now = time::to_millis(Utc::now());
        row.entry(col::CREATED_AT.to_string())
            .or_insert(Value::Integer(now));
        row.entry(col::UPDATED_AT.to_string())
            .or_insert(Value::Integer(now));
        self.driver.insert(table, &row).await
    }

    /// Updates a row by id, stamping `updated_at` when absent.
    pub async fn update(&self, table: &str, id: &str, mut row: Row) -> StoreResult<u64> {
        self.ensure_initialized()?;
        let table = schema::checked_identifier(table)?;
        row.remove(col::ID);
        row.entry(col::UPDATED_AT.to_string())
            .or_insert(Value::Integer(time::to_millis(Utc::now())));
        self.driver
            .update(table, &row, "id = ?", &[Value::from(id)])
            .await
    }

    /// Inserts the row, or overwrites the existing row with the same id.
    pub async fn upsert(&self, table: &str, row: Row) -> StoreResult<()> {
        self.ensure_initialized()?;
        let table = schema::checked_identifier(table)?;
        let id = row
            .get(col::ID)
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Internal("upsert row missing id".into()))?
            .to_string();

        if self.find_by_id(table, &id).await?.is_some() {
            let mut values = row;
            values.remove(col::ID);
            self.driver
                .update(table, &values, "id = ?", &[Value::from(id.as_str())])
                .await?;
        } else {
            self.driver.insert(table, &row).await?;
        }
        Ok(())
    }

    /// Hard-deletes a row.
    pub async fn delete(&self, table: &str, id: &str) -> StoreResult<u64> {
        self.ensure_initialized()?;
        let table = schema::checked_identifier(table)?;
        self.driver
            .delete(table, "id = ?", &[Value::from(id)])
            .await
    }

    /// Tombstones a row: sets `is_deleted`, `deleted_at`, and marks the
    /// row `pending` with `synced_at` cleared so the tombstone is pushed.
    pub async fn soft_delete(&self, table: &str, id: &str) -> StoreResult<u64> {
        self.ensure_initialized()?;
        let table = schema::checked_identifier(table)?;
        let now = time::to_millis(Utc::now());
        let mut row = Row::new();
        row.insert(col::IS_DELETED.into(), Value::from(true));
        row.insert(col::DELETED_AT.into(), Value::Integer(now));
        row.insert(col::UPDATED_AT.into(), Value::Integer(now));
        row.insert(col::SYNC_STATUS.into(), Value::from(RowStatus::Pending.as_str()));
        row.insert(col::SYNCED_AT.into(), Value::Null);
        self.driver
            .update(table, &row, "id = ?", &[Value::from(id)])
            .await
    }

    /// Fetches a row by id.
    pub async fn find_by_id(&self, table: &str, id: &str) -> StoreResult<Option<Row>> {
        self.ensure_initialized()?;
        let table = schema::checked_identifier(table)?;
        let mut rows = self
            .driver
            .query(table, Some("id = ?"), &[Value::from(id)], None, Some(1))
            .await?;
        Ok(rows.pop())
    }

    /// Fetches all rows, oldest first.
    pub async fn find_all(&self, table: &str) -> StoreResult<Vec<Row>> {
        self.ensure_initialized()?;
        let table = schema::checked_identifier(table)?;
        self.driver
            .query(table, None, &[], Some("created_at ASC"), None)
            .await
    }

    /// Fetches rows that are not in sync with the remote.
    pub async fn find_unsynced(&self, table: &str) -> StoreResult<Vec<Row>> {
        self.ensure_initialized()?;
        let table = schema::checked_identifier(table)?;
        self.driver
            .query(
                table,
                Some("sync_status != ? OR sync_status IS NULL"),
                &[Value::from(RowStatus::Synced.as_str())],
                Some("updated_at ASC"),
                None,
            )
            .await
    }

    /// Counts all rows in a table.
    pub async fn count(&self, table: &str) -> StoreResult<i64> {
        self.ensure_initialized()?;
        let table = schema::checked_identifier(table)?;
        let rows = self
            .driver
            .raw_query(&format!("SELECT COUNT(*) AS n FROM {}", table), &[])
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("n"))
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }

    /// Counts rows not in sync with the remote.
    pub async fn count_unsynced(&self, table: &str) -> StoreResult<i64> {
        self.ensure_initialized()?;
        let table = schema::checked_identifier(table)?;
        let rows = self
            .driver
            .raw_query(
                &format!(
                    "SELECT COUNT(*) AS n FROM {} WHERE sync_status != ? OR sync_status IS NULL",
                    table
                ),
                &[Value::from(RowStatus::Synced.as_str())],
            )
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("n"))
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }

    // -------------------------------------------------------------------------
    // Sync-state transitions (engine writes)
    // -------------------------------------------------------------------------
    // These deliberately bypass the `updated_at` stamping of `update`:
    // a sync-state transition is bookkeeping, not an entity mutation.

    /// Marks a row in sync: `sync_status = 'synced'`, `synced_at` stamped,
    /// `last_error` cleared.
    pub async fn mark_synced(
        &self,
        table: &str,
        id: &str,
        synced_at: chrono::DateTime<Utc>,
    ) -> StoreResult<u64> {
        self.ensure_initialized()?;
        let table = schema::checked_identifier(table)?;
        let mut row = Row::new();
        row.insert(
            col::SYNC_STATUS.into(),
            Value::from(RowStatus::Synced.as_str()),
        );
        row.insert(
            col::SYNCED_AT.into(),
            Value::Integer(time::to_millis(synced_at)),
        );
        row.insert(col::LAST_ERROR.into(), Value::Null);
        self.driver
            .update(table, &row, "id = ?", &[Value::from(id)])
            .await
    }

    /// Moves a row into the given sync state, recording (or clearing) its
    /// last error.
    pub async fn mark_status(
        &self,
        table: &str,
        id: &str,
        status: RowStatus,
        last_error: Option<&str>,
    ) -> StoreResult<u64> {
        self.ensure_initialized()?;
        let table = schema::checked_identifier(table)?;
        let mut row = Row::new();
        row.insert(col::SYNC_STATUS.into(), Value::from(status.as_str()));
        row.insert(col::LAST_ERROR.into(), Value::opt_text(last_error));
        self.driver
            .update(table, &row, "id = ?", &[Value::from(id)])
            .await
    }

    // -------------------------------------------------------------------------
    // Entity codec access
    // -------------------------------------------------------------------------

    /// Serializes an entity and inserts it as a new row.
    pub async fn insert_entity(
        &self,
        entity: &dyn SyncEntity,
        opts: &SerializeOptions,
    ) -> StoreResult<String> {
        let row = codec::serialize_for_storage(entity, opts)?;
        self.insert(entity.table_name(), row).await
    }

    /// Serializes an entity and overwrites its existing row.
    pub async fn write_entity(
        &self,
        entity: &dyn SyncEntity,
        opts: &SerializeOptions,
    ) -> StoreResult<()> {
        let row = codec::serialize_for_storage(entity, opts)?;
        self.upsert(entity.table_name(), row).await
    }

    /// Materializes a row through the table's registered factory.
    pub async fn materialize(&self, table: &str, row: &Row) -> StoreResult<Box<dyn SyncEntity>> {
        let factory = self.factory(table).await?;
        codec::materialize(table, row, &factory)
    }

    /// Builds an entity straight from a JSON map (pull path).
    pub async fn entity_from_json(
        &self,
        table: &str,
        map: JsonMap,
    ) -> StoreResult<Box<dyn SyncEntity>> {
        let factory = self.factory(table).await?;
        factory(map).map_err(|e| {
            StoreError::Serialization(format!("factory for '{}' failed: {}", table, e))
        })
    }

    // -------------------------------------------------------------------------
    // Raw passthrough
    // -------------------------------------------------------------------------

    /// Runs an arbitrary SELECT against the replica.
    pub async fn raw_query(&self, sql: &str, args: &[Value]) -> StoreResult<Vec<Row>> {
        self.ensure_initialized()?;
        self.driver.raw_query(sql, args).await
    }

    /// Runs an arbitrary statement against the replica.
    pub async fn raw_execute(&self, sql: &str, args: &[Value]) -> StoreResult<u64> {
        self.ensure_initialized()?;
        self.driver.raw_execute(sql, args).await
    }

    /// Runs a statement batch atomically.
    pub async fn transaction(&self, statements: &[Statement]) -> StoreResult<()> {
        self.ensure_initialized()?;
        self.driver.transaction(statements).await
    }

    // -------------------------------------------------------------------------
    // System-table repositories
    // -------------------------------------------------------------------------

    /// Returns the retry-queue repository.
    pub fn queue(&self) -> QueueRepository {
        QueueRepository::new(self.driver.clone())
    }

    /// Returns the conflict-store repository.
    pub fn conflicts(&self) -> ConflictRepository {
        ConflictRepository::new(self.driver.clone())
    }

    /// Returns the per-table sync summary repository.
    pub fn metadata(&self) -> MetadataRepository {
        MetadataRepository::new(self.driver.clone())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
