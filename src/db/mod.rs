//! Database connection pool, migrations, and health check.
//!
//! SQLite through sqlx. One pool is shared by every component; the process
//! entry point owns it and hands out `Arc<Db>` at construction time.

mod unit;

pub use unit::UnitOfWork;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::{Error, Result};

/// A transaction handle callers can thread through several mutations.
pub type Tx = Transaction<'static, Sqlite>;

/// Pool tuning.
#[derive(Debug, Clone)]
pub struct DbOptions {
    pub max_connections: u32,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            max_connections: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Database handle. Owns the connection pool shared across all modules.
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Open (creating if missing) a database at `url` with default options.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, &DbOptions::default()).await
    }

    /// Open a database at `url`, e.g. `sqlite://flow.db`.
    pub async fn connect_with(url: &str, options: &DbOptions) -> Result<Self> {
        let connect = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(options.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect)
            .await?;

        tracing::debug!(url, max_connections = options.max_connections, "database connected");
        Ok(Self { pool })
    }

    /// A migrated, private in-memory database (for tests and embedding).
    ///
    /// Backed by a single connection that is never recycled, since an
    /// in-memory SQLite database lives and dies with its connection.
    pub async fn in_memory() -> Result<Self> {
        let connect = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(connect)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Begin a transaction for callers composing several mutations.
    ///
    /// Dropping the handle without committing rolls everything back.
    pub async fn begin(&self) -> Result<Tx> {
        Ok(self.pool.begin().await?)
    }

    /// Get a reference to the connection pool (for components).
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
