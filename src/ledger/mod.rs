//! Ledger store
//!
//! The ledger is the persisted half of the system: a registry of peers and
//! one usage row per peer per observed month, kept in SQLite.
//!
//! All writes that read before they write (`record_sample`) run inside an
//! immediate transaction, so concurrent collectors in different processes
//! cannot lose each other's updates.

mod model;
mod peers;
mod schema;
mod usage;

pub use model::{MonthlyUsage, Peer, UsageRow, YearMonth};

use crate::error::{Result, VpnmonError};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Handle to the ledger database
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open (creating if needed) the database at `path`
    ///
    /// The schema is not touched; call [`Ledger::setup`] for that.
    #[tracing::instrument]
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(10))
            // Older databases declare a foreign key on monthly_usage; kept
            // history must be able to outlive its peer.
            .foreign_keys(false)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        info!("Opened ledger at {:?}", path);
        Ok(Self { pool })
    }

    /// A private in-memory database, for tests
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| VpnmonError::Storage(format!("Invalid database URL: {}", e)))?
            .foreign_keys(false);

        // Each connection to :memory: is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        debug!("Opened in-memory ledger");
        Ok(Self { pool })
    }

    /// Create the schema if absent and upgrade older layouts
    #[tracing::instrument(skip(self))]
    pub async fn setup(&self) -> Result<()> {
        schema::apply(&self.pool).await
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
