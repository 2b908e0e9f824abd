//! SQLite persistence for threads, outgoing messages, and local notices.
//!
//! The [`Store`] owns the connection pool and applies the schema migrations
//! in `migrations/` on open. Every mutation goes through a
//! [`WriteTransaction`] obtained from [`Store::begin`]; reads that happen
//! after commit (dispatch, listing) may use the pool directly.

pub mod transaction;

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

pub use self::transaction::{TransactionState, WriteTransaction};

/// Schema migrations, applied in order and recorded in `schema_migrations`.
const MIGRATIONS: &[(i64, &str)] = &[
    (1, include_str!("../../migrations/001_schema.sql")),
    (2, include_str!("../../migrations/002_messages.sql")),
    (3, include_str!("../../migrations/003_dispatch_claims.sql")),
];

/// Statement opening every write scope.
const BEGIN_IMMEDIATE: &str = "BEGIN IMMEDIATE";

/// Default pool size for file-backed stores.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// Errors from the store layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A schema migration failed to apply.
    #[error("migration {version} failed: {source}")]
    Migration {
        /// Migration version number.
        version: i64,
        /// Underlying SQLite error.
        #[source]
        source: sqlx::Error,
    },

    /// Filesystem operation failed while preparing the database location.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The transaction scope has already been committed or aborted.
    #[error("transaction is {0}, not active")]
    InactiveTransaction(TransactionState),

    /// A persisted row could not be interpreted.
    #[error("invalid {table} row: {detail}")]
    InvalidRow {
        /// Table the row came from.
        table: &'static str,
        /// What was wrong with it.
        detail: String,
    },
}

/// Handle to the message database.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database at `path` and apply migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the parent directory cannot be created,
    /// or a database/migration error if the file cannot be opened.
    pub async fn open(path: &Path, max_connections: u32) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .pragma("trusted_schema", "OFF")
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "message store opened");
        Self::from_pool(pool).await
    }

    /// Open a private in-memory database.
    ///
    /// In-memory databases are per-connection, so the pool is pinned to a
    /// single connection that never expires. A held [`WriteTransaction`]
    /// owns that connection: any other [`begin`](Self::begin) or pool read
    /// on the same store waits until the scope is committed, aborted, or
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a migration fails.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .pragma("foreign_keys", "ON");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, applying any migrations it has not seen yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Migration`] if a migration fails to apply.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (\
             version INTEGER PRIMARY KEY, \
             applied_at TEXT NOT NULL DEFAULT (datetime('now')))",
        )
        .execute(&self.pool)
        .await?;

        for &(version, sql) in MIGRATIONS {
            // Checked under the write lock so two processes opening the same
            // file apply each migration once.
            let mut tx = self.pool.begin_with(BEGIN_IMMEDIATE).await?;
            let applied: Option<(i64,)> =
                sqlx::query_as("SELECT version FROM schema_migrations WHERE version = ?1")
                    .bind(version)
                    .fetch_optional(&mut *tx)
                    .await?;
            if applied.is_some() {
                tx.rollback().await?;
                continue;
            }

            sqlx::raw_sql(sql)
                .execute(&mut *tx)
                .await
                .map_err(|source| StoreError::Migration { version, source })?;
            sqlx::query("INSERT INTO schema_migrations (version) VALUES (?1)")
                .bind(version)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            debug!(version, "schema migration applied");
        }
        Ok(())
    }

    /// Highest applied schema migration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub async fn schema_version(&self) -> Result<i64, StoreError> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT max(version) FROM schema_migrations")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0.unwrap_or(0))
    }

    /// Start a read/write unit of work.
    ///
    /// The scope takes SQLite's write lock up front (`BEGIN IMMEDIATE`), so
    /// scopes on the same database run one at a time. A second caller waits
    /// for the busy timeout instead of failing when it first writes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if SQLite refuses to begin, including
    /// when another scope holds the lock past the busy timeout.
    pub async fn begin(&self) -> Result<WriteTransaction, StoreError> {
        let inner = self.pool.begin_with(BEGIN_IMMEDIATE).await?;
        Ok(WriteTransaction::new(inner))
    }

    /// Returns a reference to the underlying SQLite pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn close(self) {
        self.pool.close().await;
        debug!("message store closed");
    }
}

/// Convert epoch milliseconds read from SQLite into a UTC timestamp.
pub(crate) fn timestamp_from_ms(
    table: &'static str,
    ms: i64,
) -> Result<chrono::DateTime<chrono::Utc>, StoreError> {
    chrono::DateTime::from_timestamp_millis(ms).ok_or_else(|| StoreError::InvalidRow {
        table,
        detail: format!("timestamp out of range: {ms}"),
    })
}
