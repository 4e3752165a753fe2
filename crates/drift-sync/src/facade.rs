//! # Facade
//!
//! Single entry point applications talk to. Composes the local store, the
//! network adapter, and the sync engine in initialization order, then
//! routes high-level CRUD and sync calls.
//!
//! ## Composition
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  OfflineSync::builder()                                                 │
//! │      .base_url("https://api.example")                                   │
//! │      .database_path("drift.db")                                         │
//! │      .initialize()                                                      │
//! │                                                                         │
//! │  order: local store ──► network adapter ──► sync engine ──► status     │
//! │                                                                         │
//! │  app calls: save / update / delete / find / sync / register_entity     │
//! │  writes land 'pending'; the engine owns every later state transition   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The facade is an ordinary handle: clone-cheap via the `Arc`s it holds,
//! passed where needed rather than stashed in a global.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use drift_core::{ConflictResolver, Row, SyncEntity, SyncStatus, Value};
use drift_db::{
    DriverConfig, EntityFactory, LocalStore, SerializeOptions, SqliteDriver, Statement,
    StorageDriver,
};

use crate::engine::{SyncEngine, SyncEngineConfig};
use crate::error::{SyncError, SyncResult};
use crate::network::{HttpNetworkAdapter, NetworkAdapter, NetworkConfig};

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`OfflineSync`].
///
/// Either `base_url` (bundled HTTP adapter) or a custom `adapter` is
/// required, and either `database_path` (bundled SQLite driver) or a
/// custom `driver`.
pub struct OfflineSyncBuilder {
    base_url: Option<String>,
    database_path: Option<PathBuf>,
    driver: Option<Arc<dyn StorageDriver>>,
    adapter: Option<Arc<dyn NetworkAdapter>>,
    headers: Vec<(String, String)>,
    timeout: Duration,
    engine_config: SyncEngineConfig,
}

impl OfflineSyncBuilder {
    fn new() -> Self {
        OfflineSyncBuilder {
            base_url: None,
            database_path: None,
            driver: None,
            adapter: None,
            headers: Vec::new(),
            timeout: Duration::from_secs(30),
            engine_config: SyncEngineConfig::default(),
        }
    }

    /// Remote base URL for the bundled HTTP adapter.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// SQLite file path for the bundled storage driver.
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Injects a custom storage driver instead of the bundled SQLite one.
    pub fn driver(mut self, driver: Arc<dyn StorageDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Injects a custom network adapter instead of the bundled HTTP one.
    pub fn adapter(mut self, adapter: Arc<dyn NetworkAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Adds a default request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Request timeout for connect, send, and receive.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Push/pull batch size (clamped to [1, 500] by the engine).
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.engine_config.batch_size = batch_size.clamp(1, 500);
        self
    }

    /// Per-operation retry bound.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.engine_config.max_retries = max_retries;
        self
    }

    /// Auto-sync timer period.
    pub fn auto_sync_interval(mut self, interval: Duration) -> Self {
        self.engine_config.auto_sync_interval = interval;
        self
    }

    /// Initializes everything in dependency order: local store, network
    /// adapter, sync engine, status channel.
    pub async fn initialize(self) -> SyncResult<OfflineSync> {
        let driver = match (self.driver, &self.database_path) {
            (Some(driver), _) => driver,
            (None, Some(path)) => Arc::new(SqliteDriver::new(DriverConfig::new(path.clone())))
                as Arc<dyn StorageDriver>,
            (None, None) => {
                return Err(SyncError::InvalidConfig(
                    "either database_path or a custom driver is required".into(),
                ))
            }
        };

        let store = LocalStore::new(driver);
        store.initialize().await?;

        let adapter = match (self.adapter, self.base_url) {
            (Some(adapter), _) => adapter,
            (None, Some(base_url)) => {
                let mut config = NetworkConfig::new(base_url).timeout(self.timeout);
                for (name, value) in self.headers {
                    config = config.header(name, value);
                }
                Arc::new(HttpNetworkAdapter::new(config)?) as Arc<dyn NetworkAdapter>
            }
            (None, None) => {
                return Err(SyncError::InvalidConfig(
                    "either base_url or a custom adapter is required".into(),
                ))
            }
        };

        // first connectivity observation before the engine starts listening
        adapter.test_connection(None).await;

        let engine = SyncEngine::new(store.clone(), adapter.clone(), self.engine_config);
        engine.start().await?;

        info!("Offline sync initialized");
        Ok(OfflineSync {
            store,
            adapter,
            engine,
        })
    }
}

// =============================================================================
// Facade
// =============================================================================

/// Application-facing handle over the whole sync stack.
pub struct OfflineSync {
    store: LocalStore,
    adapter: Arc<dyn NetworkAdapter>,
    engine: Arc<SyncEngine>,
}

impl std::fmt::Debug for OfflineSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineSync").finish_non_exhaustive()
    }
}

impl OfflineSync {
    pub fn builder() -> OfflineSyncBuilder {
        OfflineSyncBuilder::new()
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Registers an entity: its table (created if needed), the factory
    /// that materializes rows, and the remote endpoint it syncs against.
    pub async fn register_entity(
        &self,
        table: &str,
        endpoint: &str,
        create_sql: Option<String>,
        factory: EntityFactory,
    ) -> SyncResult<()> {
        self.store.register_entity(table, create_sql, factory).await?;
        self.engine.register_table(table, endpoint).await;
        Ok(())
    }

    /// Registers a conflict resolver (replaces by name).
    pub async fn register_conflict_resolver(&self, resolver: Arc<dyn ConflictResolver>) {
        self.engine.register_resolver(resolver).await;
    }

    /// Removes a conflict resolver by name.
    pub async fn remove_conflict_resolver(&self, name: &str) {
        self.engine.remove_resolver(name).await;
    }

    // -------------------------------------------------------------------------
    // CRUD
    // -------------------------------------------------------------------------

    /// Persists a new entity locally: `updated_at` stamped, `synced_at`
    /// cleared, row marked `pending` for the next push.
    pub async fn save(&self, entity: &dyn SyncEntity) -> SyncResult<()> {
        self.store
            .insert_entity(entity, &SerializeOptions::local_write())
            .await?;
        Ok(())
    }

    /// Overwrites an existing entity locally; same stamping as `save`.
    /// Fails with `EntityNotFound` if the row does not exist.
    pub async fn update(&self, entity: &dyn SyncEntity) -> SyncResult<()> {
        let table = entity.table_name();
        if self.store.find_by_id(table, entity.id()).await?.is_none() {
            return Err(SyncError::EntityNotFound {
                table: table.to_string(),
                id: entity.id().to_string(),
            });
        }
        self.store
            .write_entity(entity, &SerializeOptions::local_write())
            .await?;
        Ok(())
    }

    /// Hard-deletes a row.
    pub async fn delete(&self, table: &str, id: &str) -> SyncResult<()> {
        let deleted = self.store.delete(table, id).await?;
        if deleted == 0 {
            return Err(SyncError::EntityNotFound {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Tombstones a row; the tombstone is pushed on the next cycle.
    pub async fn soft_delete(&self, table: &str, id: &str) -> SyncResult<()> {
        let updated = self.store.soft_delete(table, id).await?;
        if updated == 0 {
            return Err(SyncError::EntityNotFound {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Materializes one entity by id.
    pub async fn find_by_id(
        &self,
        table: &str,
        id: &str,
    ) -> SyncResult<Option<Box<dyn SyncEntity>>> {
        match self.store.find_by_id(table, id).await? {
            Some(row) => Ok(Some(self.store.materialize(table, &row).await?)),
            None => Ok(None),
        }
    }

    /// Materializes every entity of a table, tombstones included.
    pub async fn find_all(&self, table: &str) -> SyncResult<Vec<Box<dyn SyncEntity>>> {
        let rows = self.store.find_all(table).await?;
        let mut entities = Vec::with_capacity(rows.len());
        for row in &rows {
            entities.push(self.store.materialize(table, row).await?);
        }
        Ok(entities)
    }

    /// Counts rows in a table.
    pub async fn count(&self, table: &str) -> SyncResult<i64> {
        Ok(self.store.count(table).await?)
    }

    // -------------------------------------------------------------------------
    // Raw passthrough
    // -------------------------------------------------------------------------

    pub async fn raw_query(&self, sql: &str, args: &[Value]) -> SyncResult<Vec<Row>> {
        Ok(self.store.raw_query(sql, args).await?)
    }

    pub async fn raw_execute(&self, sql: &str, args: &[Value]) -> SyncResult<u64> {
        Ok(self.store.raw_execute(sql, args).await?)
    }

    pub async fn transaction(&self, statements: &[Statement]) -> SyncResult<()> {
        Ok(self.store.transaction(statements).await?)
    }

    // -------------------------------------------------------------------------
    // Sync control
    // -------------------------------------------------------------------------

    /// Runs one sync cycle (no-op while offline or already syncing).
    pub async fn sync(&self) -> SyncResult<()> {
        self.engine.sync_all().await
    }

    /// Current status snapshot.
    pub fn status(&self) -> SyncStatus {
        self.engine.status()
    }

    /// Subscribes to status snapshots.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.engine.subscribe()
    }

    pub async fn enable_auto_sync(&self) {
        self.engine.enable_auto_sync().await;
    }

    pub async fn disable_auto_sync(&self) {
        self.engine.disable_auto_sync().await;
    }

    pub async fn set_batch_size(&self, batch_size: usize) {
        self.engine.set_batch_size(batch_size).await;
    }

    pub async fn set_max_retries(&self, max_retries: u32) {
        self.engine.set_max_retries(max_retries).await;
    }

    pub async fn set_auto_sync_interval(&self, interval: Duration) {
        self.engine.set_auto_sync_interval(interval).await;
    }

    // -------------------------------------------------------------------------
    // Accessors & shutdown
    // -------------------------------------------------------------------------

    /// The underlying store, for advanced queries.
    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// The network adapter.
    pub fn adapter(&self) -> &Arc<dyn NetworkAdapter> {
        &self.adapter
    }

    /// Cancels background tasks and closes the store. An in-flight cycle
    /// completes first.
    pub async fn dispose(&self) -> SyncResult<()> {
        self.engine.dispose().await;
        self.store.close().await?;
        Ok(())
    }
}
