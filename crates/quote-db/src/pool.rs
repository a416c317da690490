//! # Database Handle
//!
//! Owns the SQLite pool and hands out the two ways services touch storage:
//! a [`UnitOfWork`] per mutation and a [`Session`] per read.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Quote Store Connections                            │
//! │                                                                         │
//! │  DbConfig::new(path) / DbConfig::in_memory()                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config) ──► open pool ──► embedded migrations            │
//! │       │                                                                 │
//! │       ├── db.session() ──► Session     reads, pricing lookups,          │
//! │       │                                idempotency checks               │
//! │       │                                                                 │
//! │       └── db.begin()   ──► UnitOfWork  number + quote + lines +         │
//! │                                        version, committed together      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! File databases run in WAL mode so list/read sessions don't block the
//! writer. A writer that waits past `busy_timeout` surfaces as
//! [`DbError::Busy`], which callers treat as retryable.
//!
//! An in-memory pool has exactly one connection. Release a `Session` or
//! `UnitOfWork` before asking for the next one.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::unit_of_work::{Session, UnitOfWork};

const MEMORY_PATH: &str = ":memory:";

// =============================================================================
// Configuration
// =============================================================================

/// Pool settings for the quote store.
///
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/quotes/quotes.db")
///     .max_connections(8)
///     .busy_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_path: PathBuf,

    /// Default: 5. Always 1 for in-memory stores.
    pub max_connections: u32,

    /// How long `session()`/`begin()` wait for a free connection.
    pub acquire_timeout: Duration,

    /// How long a statement waits on SQLite's write lock before `Busy`.
    pub busy_timeout: Duration,

    pub run_migrations: bool,
}

impl DbConfig {
    /// File-backed store; the file is created if missing.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    /// Private, migrated store that lives as long as the pool (tests, previews).
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(MEMORY_PATH),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(1),
            run_migrations: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    fn is_memory(&self) -> bool {
        self.database_path.as_os_str() == MEMORY_PATH
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let options = if self.is_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")
        } else {
            SqliteConnectOptions::from_str(&format!("sqlite://{}", self.database_path.display()))
        }
        .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        let options = options
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout)
            .create_if_missing(true);

        Ok(if self.is_memory() {
            options
        } else {
            options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
        })
    }
}

// =============================================================================
// Database
// =============================================================================

/// Shared handle to the quote store.
///
/// Cheap to clone; every clone shares the same pool. Services receive a
/// `Database` at construction and open a [`UnitOfWork`] per mutation.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool and, unless disabled, applies pending migrations.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(path = %config.database_path.display(), "Opening quote store");

        let max_connections = if config.is_memory() { 1 } else { config.max_connections };
        let options = config.connect_options()?;
        debug!(
            max_connections,
            busy_timeout_ms = config.busy_timeout.as_millis() as u64,
            "Connection options configured"
        );

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(config.acquire_timeout)
            // The in-memory database dies with its last connection.
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        let db = Database { pool };
        if config.run_migrations {
            migrations::run_migrations(&db.pool).await?;
        }

        info!(max_connections, "Quote store ready");
        Ok(db)
    }

    /// Starts a transaction. Dropping the returned unit without
    /// [`UnitOfWork::commit`] rolls it back.
    pub async fn begin(&self) -> DbResult<UnitOfWork> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
        Ok(UnitOfWork::new(tx))
    }

    /// Checks out one connection for reads outside a transaction.
    pub async fn session(&self) -> DbResult<Session> {
        let conn = self.pool.acquire().await?;
        Ok(Session::new(conn))
    }

    /// `(embedded, applied)` migration counts.
    pub async fn migration_status(&self) -> DbResult<(usize, usize)> {
        migrations::migration_status(&self.pool).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
