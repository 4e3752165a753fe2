//! # Sync Engine
//!
//! Main orchestrator for synchronization. Owns the sync cycle, the table
//! and resolver registries, the auto-sync timer, the connectivity
//! listener, and the status channel.
//!
//! ## Engine Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SyncEngine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                          SyncEngine                              │  │
//! │  │                                                                  │  │
//! │  │  sync_all():                                                     │  │
//! │  │    1. single-flight gate (is_syncing) + online check             │  │
//! │  │    2. drain retry queue (push.rs)                                │  │
//! │  │    3. per table, registration order:                             │  │
//! │  │         push ──► pull ──► stored-conflict retry                  │  │
//! │  │    4. publish final snapshot (pending/failed/last_sync_at)       │  │
//! │  └──────────┬──────────────────────┬────────────────────────────────┘  │
//! │             │                      │                                    │
//! │             ▼                      ▼                                    │
//! │  ┌────────────────┐  ┌──────────────────────┐  ┌───────────────────┐   │
//! │  │ Auto-sync task │  │ Connectivity listener│  │  StatusChannel    │   │
//! │  │ interval tick  │  │ offline→online edge  │  │  watch snapshots  │   │
//! │  │ → sync_all()   │  │ → sync_all()         │  │  to observers     │   │
//! │  └────────────────┘  └──────────────────────┘  └───────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Ordering guarantees: tables are processed in registration order; within
//! one cycle push precedes pull precedes stored-conflict resolution;
//! `sync_all` is serialized with itself (a second call while one runs
//! returns without side effects).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use drift_core::{
    ConflictResolver, DefaultResolver, ResolutionStrategy, SyncConflict, SyncEntity, SyncMode,
    SyncStatus, Value,
};
use drift_db::LocalStore;

use crate::broadcast::StatusChannel;
use crate::error::{SyncError, SyncResult};
use crate::network::NetworkAdapter;

// =============================================================================
// Configuration
// =============================================================================

/// Batch size bounds applied by `set_batch_size`.
const MIN_BATCH_SIZE: usize = 1;
const MAX_BATCH_SIZE: usize = 500;

/// Engine configuration. All timings are deterministic so tests under a
/// paused clock observe exact schedules.
#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// Rows per push batch / remote elements per pull chunk.
    pub batch_size: usize,

    /// Retry bound applied independently to each push and each pull.
    pub max_retries: u32,

    /// Auto-sync timer period.
    pub auto_sync_interval: Duration,

    /// Backoff unit within a push: attempt n sleeps n × this.
    pub push_retry_base: Duration,

    /// Backoff unit between queue retries: (retry_count + 1) × this.
    pub queue_retry_base: Duration,

    /// Delay before the first retry of a freshly queued push.
    pub queue_initial_delay: Duration,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        SyncEngineConfig {
            batch_size: 50,
            max_retries: 3,
            auto_sync_interval: Duration::from_secs(300),
            push_retry_base: Duration::from_secs(2),
            queue_retry_base: Duration::from_secs(3),
            queue_initial_delay: Duration::from_secs(60),
        }
    }
}

/// A registered entity table and its remote endpoint.
#[derive(Debug, Clone)]
pub struct TableRegistration {
    pub table: String,
    pub endpoint: String,
}

// =============================================================================
// Sync Engine
// =============================================================================

/// The synchronization engine.
///
/// Shared as `Arc<SyncEngine>`; the auto-sync timer and connectivity
/// listener hold clones. The engine is the only writer of `sync_status`
/// columns, `sync_queue`, and `sync_conflicts`.
pub struct SyncEngine {
    pub(crate) store: LocalStore,
    pub(crate) adapter: Arc<dyn NetworkAdapter>,
    pub(crate) config: RwLock<SyncEngineConfig>,
    pub(crate) status: StatusChannel,
    tables: RwLock<Vec<TableRegistration>>,
    resolvers: RwLock<Vec<Arc<dyn ConflictResolver>>>,
    is_syncing: AtomicBool,
    auto_sync_task: Mutex<Option<JoinHandle<()>>>,
    connectivity_task: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl SyncEngine {
    /// Creates an engine over an initialized store and adapter, with the
    /// default resolver (`UseLatest`) pre-registered.
    pub fn new(
        store: LocalStore,
        adapter: Arc<dyn NetworkAdapter>,
        config: SyncEngineConfig,
    ) -> Arc<Self> {
        let default_resolver: Arc<dyn ConflictResolver> = Arc::new(DefaultResolver::default());
        Arc::new(SyncEngine {
            store,
            adapter,
            config: RwLock::new(config),
            status: StatusChannel::default(),
            tables: RwLock::new(Vec::new()),
            resolvers: RwLock::new(vec![default_resolver]),
            is_syncing: AtomicBool::new(false),
            auto_sync_task: Mutex::new(None),
            connectivity_task: Mutex::new(None),
            disposed: AtomicBool::new(false),
        })
    }

    /// Starts the connectivity listener and publishes the initial online
    /// state. Idempotent.
    pub async fn start(self: &Arc<Self>) -> SyncResult<()> {
        let mut guard = self.connectivity_task.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let rx = self.adapter.connectivity_stream();
        self.status
            .update(|s| s.with_is_online(self.adapter.is_online()));

        let engine = Arc::clone(self);
        *guard = Some(tokio::spawn(engine.connectivity_loop(rx)));

        info!("Sync engine started");
        Ok(())
    }

    /// Watches connectivity transitions; an offline→online edge triggers a
    /// cycle when auto-sync is enabled.
    async fn connectivity_loop(self: Arc<Self>, mut rx: watch::Receiver<bool>) {
        let mut previous = *rx.borrow_and_update();
        while rx.changed().await.is_ok() {
            let online = *rx.borrow_and_update();
            self.status.update(|s| s.with_is_online(online));

            if online && !previous {
                info!("Connectivity regained");
                if self.status.current().auto_sync_enabled {
                    if let Err(e) = self.sync_all().await {
                        warn!(error = %e, "Sync on reconnect failed");
                    }
                }
            }
            previous = online;
        }
        debug!("Connectivity stream closed");
    }

    // -------------------------------------------------------------------------
    // Registration & configuration
    // -------------------------------------------------------------------------

    /// Registers a table → endpoint pair. Tables sync in registration
    /// order; re-registering a table updates its endpoint in place.
    pub async fn register_table(&self, table: &str, endpoint: &str) {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.iter_mut().find(|t| t.table == table) {
            existing.endpoint = endpoint.to_string();
        } else {
            tables.push(TableRegistration {
                table: table.to_string(),
                endpoint: endpoint.to_string(),
            });
        }
    }

    /// Registered tables in registration order.
    pub async fn registered_tables(&self) -> Vec<TableRegistration> {
        self.tables.read().await.clone()
    }

    /// Registers a conflict resolver, replacing any resolver with the same
    /// name. The chain is kept sorted by descending priority.
    pub async fn register_resolver(&self, resolver: Arc<dyn ConflictResolver>) {
        let mut resolvers = self.resolvers.write().await;
        resolvers.retain(|r| r.name() != resolver.name());
        resolvers.push(resolver);
        resolvers.sort_by_key(|r| std::cmp::Reverse(r.priority()));
    }

    /// Removes a resolver by name; removing an unknown name is a no-op.
    pub async fn remove_resolver(&self, name: &str) {
        self.resolvers.write().await.retain(|r| r.name() != name);
    }

    /// Consults the resolver chain: descending priority, first resolver
    /// accepting the kind that produces an entity wins.
    pub(crate) async fn resolve_with_chain(
        &self,
        conflict: &SyncConflict,
    ) -> Option<(Box<dyn SyncEntity>, ResolutionStrategy)> {
        let resolvers = self.resolvers.read().await.clone();
        for resolver in resolvers {
            if !resolver.can_resolve(conflict.kind) {
                continue;
            }
            if let Some(winner) = resolver.resolve(conflict) {
                debug!(
                    entity_id = %conflict.entity_id,
                    resolver = %resolver.name(),
                    strategy = %resolver.strategy(),
                    "Conflict resolved"
                );
                return Some((winner, resolver.strategy()));
            }
        }
        None
    }

    /// Sets the push/pull batch size, clamped to [1, 500].
    pub async fn set_batch_size(&self, batch_size: usize) {
        let clamped = batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);
        self.config.write().await.batch_size = clamped;
    }

    /// Sets the per-operation retry bound.
    pub async fn set_max_retries(&self, max_retries: u32) {
        self.config.write().await.max_retries = max_retries;
    }

    /// Sets the auto-sync period. Takes effect the next time auto-sync is
    /// enabled.
    pub async fn set_auto_sync_interval(&self, interval: Duration) {
        self.config.write().await.auto_sync_interval = interval;
    }

    /// Snapshot of the current configuration.
    pub async fn config_snapshot(&self) -> SyncEngineConfig {
        self.config.read().await.clone()
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    /// Current status snapshot.
    pub fn status(&self) -> SyncStatus {
        self.status.current()
    }

    /// Subscribes an observer to status snapshots.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Whether a cycle is currently running.
    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::Acquire)
    }

    // -------------------------------------------------------------------------
    // Main loop
    // -------------------------------------------------------------------------

    /// Runs one full sync cycle: drain the retry queue, then push → pull →
    /// stored-conflict resolution per table in registration order.
    ///
    /// Calling while offline or while a cycle is already running returns
    /// immediately without side effects; neither is an error.
    pub async fn sync_all(&self) -> SyncResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(SyncError::Disposed);
        }
        if !self.adapter.is_online() {
            debug!("Offline; skipping sync cycle");
            return Ok(());
        }
        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync already in progress; skipping");
            return Ok(());
        }

        let result = self.run_cycle().await;
        self.is_syncing.store(false, Ordering::Release);

        if let Err(ref e) = result {
            // engine-level failure: re-enter a consistent state
            warn!(error = %e, "Sync cycle aborted");
            let message = e.to_string();
            self.status
                .update(|s| s.with_is_syncing(false).with_last_error(Some(message)));
        }
        result
    }

    async fn run_cycle(&self) -> SyncResult<()> {
        info!("Sync cycle starting");
        self.status.update(|s| {
            s.with_is_syncing(true)
                .with_is_online(true)
                .with_sync_progress(0.0)
        });

        // 1. Drain the durable retry queue
        self.process_sync_queue().await?;

        // 2. Per-table push/pull/conflict pass
        let tables = self.tables.read().await.clone();
        let total = tables.len().max(1);
        let mut failed_count = 0_i64;
        let mut last_error = None;

        for (index, registration) in tables.iter().enumerate() {
            if let Err(e) = self
                .sync_table(&registration.table, &registration.endpoint)
                .await
            {
                warn!(table = %registration.table, error = %e, "Table sync failed");
                failed_count += 1;
                last_error = Some(e.to_string());
            }
            let progress = (index + 1) as f64 / total as f64;
            self.status.update(|s| s.with_sync_progress(progress));
        }

        // 3. Final snapshot
        let mut pending_count = 0_i64;
        for registration in &tables {
            pending_count += self.store.count_unsynced(&registration.table).await?;
        }

        self.status.update(|s| {
            s.with_is_syncing(false)
                .with_last_sync_at(Some(Utc::now()))
                .with_sync_progress(1.0)
                .with_failed_count(failed_count)
                .with_last_error(last_error)
                .with_pending_count(pending_count)
        });

        info!(
            failed = failed_count,
            pending = pending_count,
            "Sync cycle finished"
        );
        Ok(())
    }

    /// Push, then pull, then stored-conflict resolution for one table, and
    /// finally the table's summary row.
    pub async fn sync_table(&self, table: &str, endpoint: &str) -> SyncResult<()> {
        debug!(table = %table, endpoint = %endpoint, "Syncing table");

        self.push_table(table, endpoint).await?;
        self.pull_table(table, endpoint).await?;
        self.retry_stored_conflicts(table).await?;

        let pending = self.store.count_unsynced(table).await?;
        let errored = self.count_error_rows(table).await?;
        self.store
            .metadata()
            .record_sync(table, Utc::now(), pending, errored)
            .await?;
        Ok(())
    }

    async fn count_error_rows(&self, table: &str) -> SyncResult<i64> {
        let rows = self
            .store
            .raw_query(
                &format!(
                    "SELECT COUNT(*) AS n FROM {} WHERE sync_status = ?",
                    table
                ),
                &[Value::from(drift_core::RowStatus::Error.as_str())],
            )
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("n"))
            .and_then(Value::as_i64)
            .unwrap_or(0))
    }

    // -------------------------------------------------------------------------
    // Auto-sync
    // -------------------------------------------------------------------------

    /// Arms the periodic auto-sync timer. Enabling an already-enabled
    /// timer is a no-op.
    pub async fn enable_auto_sync(self: &Arc<Self>) {
        let mut guard = self.auto_sync_task.lock().await;
        if guard.is_some() {
            debug!("Auto-sync already enabled");
            return;
        }

        let period = self.config.read().await.auto_sync_interval;
        self.status.update(|s| {
            s.with_auto_sync_enabled(true)
                .with_sync_mode(SyncMode::Automatic)
                .with_next_sync_at(next_tick_at(period))
        });

        let engine = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if engine.adapter.is_online() && !engine.is_syncing() {
                    if let Err(e) = engine.sync_all().await {
                        warn!(error = %e, "Auto-sync cycle failed");
                    }
                } else {
                    debug!("Auto-sync tick skipped (offline or already syncing)");
                }
                engine
                    .status
                    .update(|s| s.with_next_sync_at(next_tick_at(period)));
            }
        }));

        info!(period_secs = period.as_secs(), "Auto-sync enabled");
    }

    /// Cancels the auto-sync timer. Disabling a disabled timer is a no-op.
    pub async fn disable_auto_sync(&self) {
        let mut guard = self.auto_sync_task.lock().await;
        if let Some(task) = guard.take() {
            task.abort();
            self.status.update(|s| {
                s.with_auto_sync_enabled(false)
                    .with_sync_mode(SyncMode::Manual)
                    .with_next_sync_at(None)
            });
            info!("Auto-sync disabled");
        }
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Cancels the auto-sync timer and the connectivity listener. An
    /// in-flight cycle is allowed to complete; the status channel closes
    /// when the engine is dropped.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.disable_auto_sync().await;
        if let Some(task) = self.connectivity_task.lock().await.take() {
            task.abort();
        }
        info!("Sync engine disposed");
    }
}

/// Wall-clock time of the next timer tick, for status snapshots.
fn next_tick_at(period: Duration) -> Option<chrono::DateTime<Utc>> {
    chrono::Duration::from_std(period)
        .ok()
        .map(|d| Utc::now() + d)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SyncEngineConfig::default();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.auto_sync_interval, Duration::from_secs(300));
        assert_eq!(config.queue_initial_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_next_tick_at_is_in_future() {
        let next = next_tick_at(Duration::from_secs(60)).unwrap();
        assert!(next > Utc::now());
    }
}
