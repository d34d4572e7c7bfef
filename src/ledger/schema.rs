//! Ledger schema creation and in-place upgrades

use crate::error::Result;
use sqlx::sqlite::SqlitePool;
use tracing::{debug, info};

/// Tables and indexes, created if absent
///
/// `monthly_usage` carries no foreign key: usage may outlive its peer when
/// history is kept on deletion.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS peers (
        public_key TEXT PRIMARY KEY,
        name TEXT,
        email TEXT,
        added_on TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        address TEXT
    )",
    "CREATE TABLE IF NOT EXISTS monthly_usage (
        public_key TEXT NOT NULL,
        year_month TEXT NOT NULL,
        accumulated_received INTEGER NOT NULL DEFAULT 0,
        accumulated_sent INTEGER NOT NULL DEFAULT 0,
        last_received INTEGER NOT NULL DEFAULT 0,
        last_sent INTEGER NOT NULL DEFAULT 0,
        last_updated TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (public_key, year_month)
    )",
];

const INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_peers_address ON peers(address) WHERE address IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_peers_email ON peers(email)",
];

/// Create the schema and bring older databases up to date
///
/// Safe to run any number of times.
pub(crate) async fn apply(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    // Databases from before address tracking have no `address` column
    let (has_address,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM pragma_table_info('peers') WHERE name = 'address'")
            .fetch_one(pool)
            .await?;
    if has_address == 0 {
        info!("Upgrading ledger: adding peers.address");
        sqlx::query("ALTER TABLE peers ADD COLUMN address TEXT")
            .execute(pool)
            .await?;
    }

    for statement in INDEXES {
        sqlx::query(statement).execute(pool).await?;
    }

    debug!("Ledger schema is current");
    Ok(())
}
