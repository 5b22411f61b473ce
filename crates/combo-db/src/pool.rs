//! # Connection Pool
//!
//! Opens the bundle store and hands out repositories.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DbConfig::new(path)  or  DbConfig::in_memory()                         │
//! │        │  builder: max/min connections, acquire + busy timeouts         │
//! │        ▼                                                                │
//! │  Database::new(config)                                                  │
//! │        ├── SQLite options: WAL, synchronous=NORMAL, foreign_keys=ON     │
//! │        ├── SqlitePool (shared by service calls and background loops)    │
//! │        └── embedded migrations, unless disabled                         │
//! │        ▼                                                                │
//! │  db.bundles() db.stock() db.orders() db.reservations()                  │
//! │  db.policy()  db.recompute_queue()  db.cache()                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! In WAL mode readers never wait for the writer. Add-to-order takes the
//! write lock as its first statement (see [`OrderRepository`]).

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::bundle::BundleRepository;
use crate::repository::cache::CacheRepository;
use crate::repository::order::OrderRepository;
use crate::repository::policy::PolicyRepository;
use crate::repository::recompute::RecomputeQueueRepository;
use crate::repository::reservation::ReservationRepository;
use crate::repository::stock::StockRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Pool and SQLite settings.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/combo/combo.db")
///     .max_connections(8)
///     .busy_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite file, or `:memory:`.
    pub database_path: PathBuf,

    /// Pool ceiling (default 5).
    pub max_connections: u32,

    /// Connections kept open (default 1).
    pub min_connections: u32,

    /// How long a caller waits for a free connection (default 30s).
    pub connect_timeout: Duration,

    /// Idle connections are closed after this (default 10 min).
    pub idle_timeout: Duration,

    /// How long a writer waits on a locked database before failing (default 5s).
    pub busy_timeout: Duration,

    /// Apply embedded migrations when opening (default true).
    pub run_migrations: bool,
}

impl DbConfig {
    /// Settings for a database file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    /// Pool ceiling.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Connections kept open while idle.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Acquire timeout for callers waiting on the pool.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// SQLite busy timeout for writers.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Disables or enables migrations on open.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Throwaway database for tests and dry runs.
    ///
    /// Every connection to `:memory:` is a separate database, so the pool
    /// is pinned to one connection that never idles out.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(3600),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Handle to the bundle store.
///
/// Clones share the pool. Repositories are created on demand and hold
/// their own pool handle.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database and applies migrations.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(path = %config.database_path.display(), "Opening bundle store");

        let url = format!("sqlite://{}?mode=rwc", config.database_path.display());
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout);

        debug!(busy_timeout_ms = config.busy_timeout.as_millis() as u64, "SQLite options ready");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_with(options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        let db = Database { pool };
        if config.run_migrations {
            db.run_migrations().await?;
        }

        info!(max_connections = config.max_connections, "Bundle store ready");
        Ok(db)
    }

    /// Applies pending embedded migrations.
    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Raw pool, for callers that need their own queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Bundle definitions and components.
    pub fn bundles(&self) -> BundleRepository {
        BundleRepository::new(self.pool.clone())
    }

    /// Stock store.
    pub fn stock(&self) -> StockRepository {
        StockRepository::new(self.pool.clone())
    }

    /// Order store and the add-to-order transaction.
    pub fn orders(&self) -> OrderRepository {
        OrderRepository::new(self.pool.clone())
    }

    /// Reservation counter.
    pub fn reservations(&self) -> ReservationRepository {
        ReservationRepository::new(self.pool.clone())
    }

    /// Promotion policy store.
    pub fn policy(&self) -> PolicyRepository {
        PolicyRepository::new(self.pool.clone())
    }

    /// Recompute request queue.
    pub fn recompute_queue(&self) -> RecomputeQueueRepository {
        RecomputeQueueRepository::new(self.pool.clone())
    }

    /// Health and display caches.
    pub fn cache(&self) -> CacheRepository {
        CacheRepository::new(self.pool.clone())
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        info!("Closing bundle store");
        self.pool.close().await;
    }

    /// True if a trivial query succeeds.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
