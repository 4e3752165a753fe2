//! # Storage Driver
//!
//! The row-oriented storage contract consumed by the local store, plus the
//! bundled SQLite implementation.
//!
//! ## Contract Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Storage Driver Seam                              │
//! │                                                                         │
//! │  LocalStore / repositories                                             │
//! │       │  string-keyed rows of scalar values                            │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 StorageDriver (trait)                           │   │
//! │  │  initialize · close · create_table · insert · update · delete  │   │
//! │  │  query · raw_query · raw_execute · transaction                 │   │
//! │  └──────────────────────────────┬──────────────────────────────────┘   │
//! │                                 │                                       │
//! │                                 ▼                                       │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                SqliteDriver (sqlx, WAL mode)                    │   │
//! │  │    file-backed database, or :memory: for tests                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All `CREATE TABLE` statements use `IF NOT EXISTS`, so schema bootstrap
//! is idempotent by construction.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Column, Row as _, SqlitePool, TypeInfo, ValueRef};
use tokio::sync::RwLock;
use tracing::{debug, info};

use drift_core::{Row, Value};

use crate::error::{StoreError, StoreResult};

// =============================================================================
// Statement
// =============================================================================

/// One parameterized SQL statement, used by `transaction` batches.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Statement {
            sql: sql.into(),
            args,
        }
    }
}

// =============================================================================
// Driver Contract
// =============================================================================

/// Row-oriented storage API.
///
/// Values are string-keyed maps of primitive scalars; callers own the SQL
/// for `raw_*` and `create_table`, the driver owns statement assembly for
/// the typed operations.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Opens the underlying storage handle. Idempotent.
    async fn initialize(&self) -> StoreResult<()>;

    /// Closes the handle; subsequent operations fail with `NotInitialized`.
    async fn close(&self) -> StoreResult<()>;

    /// Executes a `CREATE TABLE IF NOT EXISTS` (or index) statement.
    async fn create_table(&self, sql: &str) -> StoreResult<()>;

    /// Inserts a row and returns its `id` column value.
    async fn insert(&self, table: &str, values: &Row) -> StoreResult<String>;

    /// Updates matching rows; returns the affected-row count.
    async fn update(
        &self,
        table: &str,
        values: &Row,
        where_clause: &str,
        where_args: &[Value],
    ) -> StoreResult<u64>;

    /// Deletes matching rows; returns the affected-row count.
    async fn delete(
        &self,
        table: &str,
        where_clause: &str,
        where_args: &[Value],
    ) -> StoreResult<u64>;

    /// Selects whole rows from a table.
    async fn query(
        &self,
        table: &str,
        where_clause: Option<&str>,
        where_args: &[Value],
        order_by: Option<&str>,
        limit: Option<u32>,
    ) -> StoreResult<Vec<Row>>;

    /// Runs an arbitrary SELECT.
    async fn raw_query(&self, sql: &str, args: &[Value]) -> StoreResult<Vec<Row>>;

    /// Runs an arbitrary non-SELECT statement; returns the affected count.
    async fn raw_execute(&self, sql: &str, args: &[Value]) -> StoreResult<u64>;

    /// Runs a statement batch atomically: all succeed or none apply.
    async fn transaction(&self, statements: &[Statement]) -> StoreResult<()>;
}

// =============================================================================
// Driver Configuration
// =============================================================================

/// SQLite driver configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DriverConfig::new("/path/to/drift.db").max_connections(5);
/// let driver = SqliteDriver::new(config);
/// ```
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    pub min_connections: u32,

    /// Connection acquire timeout.
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    pub idle_timeout: Duration,
}

impl DriverConfig {
    /// Creates a configuration for a file-backed database. The file is
    /// created on first initialize if it does not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DriverConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection acquire timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// In-memory SQLite is per-connection, so the pool is pinned to a
    /// single connection.
    pub fn in_memory() -> Self {
        DriverConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// SQLite Driver
// =============================================================================

/// Bundled `StorageDriver` over a pooled sqlx SQLite connection.
///
/// WAL journal mode keeps readers and writers from blocking each other;
/// NORMAL synchronous is the usual durability/speed balance for an edge
/// replica that can always re-pull.
#[derive(Debug)]
pub struct SqliteDriver {
    config: DriverConfig,
    pool: RwLock<Option<SqlitePool>>,
}

impl SqliteDriver {
    /// Creates a driver; the database opens on `initialize()`.
    pub fn new(config: DriverConfig) -> Self {
        SqliteDriver {
            config,
            pool: RwLock::new(None),
        }
    }

    /// Creates an in-memory driver for tests.
    pub fn in_memory() -> Self {
        SqliteDriver::new(DriverConfig::in_memory())
    }

    /// Clones the pool handle or fails with `NotInitialized`.
    async fn pool(&self) -> StoreResult<SqlitePool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or(StoreError::NotInitialized)
    }

    /// Checks that the database answers a trivial query.
    pub async fn health_check(&self) -> bool {
        match self.pool().await {
            Ok(pool) => sqlx::query("SELECT 1").execute(&pool).await.is_ok(),
            Err(_) => false,
        }
    }
}

/// Binds a scalar value onto a query.
fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        Value::Text(s) => query.bind(s.as_str()),
        Value::Integer(i) => query.bind(*i),
        Value::Real(f) => query.bind(*f),
        Value::Null => query.bind(None::<String>),
    }
}

/// Decodes a SQLite row into the scalar row map.
fn decode_row(row: &SqliteRow) -> StoreResult<Row> {
    let mut out = BTreeMap::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => Value::Integer(row.try_get::<i64, _>(idx)?),
                "REAL" => Value::Real(row.try_get::<f64, _>(idx)?),
                "BLOB" => {
                    let bytes: Vec<u8> = row.try_get(idx)?;
                    Value::Text(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => Value::Text(row.try_get::<String, _>(idx)?),
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

/// Renders `?` placeholders for a parameter count.
fn placeholders(count: usize) -> String {
    std::iter::repeat("?")
        .take(count)
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl StorageDriver for SqliteDriver {
    async fn initialize(&self) -> StoreResult<()> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            debug!("Storage driver already initialized");
            return Ok(());
        }

        info!(
            path = %self.config.database_path.display(),
            "Opening SQLite database"
        );

        let connect_url = format!("sqlite://{}?mode=rwc", self.config.database_path.display());
        let options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(self.config.max_connections)
            .min_connections(self.config.min_connections)
            .acquire_timeout(self.config.connect_timeout)
            .idle_timeout(Some(self.config.idle_timeout))
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        *guard = Some(pool);
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        let mut guard = self.pool.write().await;
        if let Some(pool) = guard.take() {
            info!("Closing SQLite pool");
            pool.close().await;
        }
        Ok(())
    }

    async fn create_table(&self, sql: &str) -> StoreResult<()> {
        let pool = self.pool().await?;
        sqlx::query(sql).execute(&pool).await?;
        Ok(())
    }

    async fn insert(&self, table: &str, values: &Row) -> StoreResult<String> {
        let pool = self.pool().await?;
        let columns: Vec<&str> = values.keys().map(String::as_str).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders(columns.len())
        );

        let mut query = sqlx::query(&sql);
        for value in values.values() {
            query = bind_value(query, value);
        }
        query.execute(&pool).await?;

        Ok(values
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn update(
        &self,
        table: &str,
        values: &Row,
        where_clause: &str,
        where_args: &[Value],
    ) -> StoreResult<u64> {
        let pool = self.pool().await?;
        let assignments: Vec<String> = values.keys().map(|c| format!("{} = ?", c)).collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            table,
            assignments.join(", "),
            where_clause
        );

        let mut query = sqlx::query(&sql);
        for value in values.values() {
            query = bind_value(query, value);
        }
        for arg in where_args {
            query = bind_value(query, arg);
        }

        let result = query.execute(&pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete(
        &self,
        table: &str,
        where_clause: &str,
        where_args: &[Value],
    ) -> StoreResult<u64> {
        let pool = self.pool().await?;
        let sql = format!("DELETE FROM {} WHERE {}", table, where_clause);

        let mut query = sqlx::query(&sql);
        for arg in where_args {
            query = bind_value(query, arg);
        }

        let result = query.execute(&pool).await?;
        Ok(result.rows_affected())
    }

    async fn query(
        &self,
        table: &str,
        where_clause: Option<&str>,
        where_args: &[Value],
        order_by: Option<&str>,
        limit: Option<u32>,
    ) -> StoreResult<Vec<Row>> {
        let pool = self.pool().await?;

        let mut sql = format!("SELECT * FROM {}", table);
        if let Some(clause) = where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }
        if let Some(order) = order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        let mut query = sqlx::query(&sql);
        for arg in where_args {
            query = bind_value(query, arg);
        }

        let rows = query.fetch_all(&pool).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn raw_query(&self, sql: &str, args: &[Value]) -> StoreResult<Vec<Row>> {
        let pool = self.pool().await?;

        let mut query = sqlx::query(sql);
        for arg in args {
            query = bind_value(query, arg);
        }

        let rows = query.fetch_all(&pool).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn raw_execute(&self, sql: &str, args: &[Value]) -> StoreResult<u64> {
        let pool = self.pool().await?;

        let mut query = sqlx::query(sql);
        for arg in args {
            query = bind_value(query, arg);
        }

        let result = query.execute(&pool).await?;
        Ok(result.rows_affected())
    }

    async fn transaction(&self, statements: &[Statement]) -> StoreResult<()> {
        let pool = self.pool().await?;
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;

        for statement in statements {
            let mut query = sqlx::query(&statement.sql);
            for arg in &statement.args {
                query = bind_value(query, arg);
            }
            query
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
