//! SQLite Ledger
//!
//! Ledger backed by a SQLite table with a unique `(aid, sequence)` key.
//! Submissions insert-or-ignore and read the stored row back, which makes
//! resubmission a no-op.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::Result;
use crate::ledger::{Confirmation, Ledger, LedgerError};

pub const LEDGER_SCHEMA: &str = include_str!("../../migrations/001_ledger_anchors.sql");

#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Connect to (or create) the ledger database at `database_url`
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let ledger = Self { pool };
        ledger.run_migrations().await?;
        info!("SQLite ledger connected: {}", database_url);
        Ok(ledger)
    }

    /// Private in-memory ledger, mostly for tests
    pub async fn new_in_memory() -> Result<Self> {
        // Each SQLite memory connection is its own database, so pin one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let ledger = Self { pool };
        ledger.run_migrations().await?;
        Ok(ledger)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(LEDGER_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of entries recorded for `identity`
    pub async fn anchor_count(&self, identity: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM ledger_anchors WHERE aid = ?")
            .bind(identity)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }
}

fn unavailable(err: sqlx::Error) -> LedgerError {
    LedgerError::Unavailable(format!("SQLite ledger error: {}", err))
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn submit_anchor(
        &self,
        identity: &str,
        sequence: u64,
        digest: &str,
    ) -> std::result::Result<Confirmation, LedgerError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO ledger_anchors (aid, sequence, digest, confirmed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (aid, sequence) DO NOTHING
            "#,
        )
        .bind(identity)
        .bind(sequence as i64)
        .bind(digest)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        let row = sqlx::query(
            "SELECT id, digest, confirmed_at FROM ledger_anchors WHERE aid = ? AND sequence = ?",
        )
        .bind(identity)
        .bind(sequence as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;

        let existing: String = row.try_get("digest").map_err(unavailable)?;
        if existing != digest {
            return Err(LedgerError::Conflict {
                identity: identity.to_string(),
                sequence,
                existing,
            });
        }

        let id: i64 = row.try_get("id").map_err(unavailable)?;
        let confirmed_at: DateTime<Utc> = row.try_get("confirmed_at").map_err(unavailable)?;
        let newly_recorded = inserted.rows_affected() == 1;
        debug!(
            "Ledger entry {} for {} #{} (new: {})",
            id, identity, sequence, newly_recorded
        );

        Ok(Confirmation {
            identity: identity.to_string(),
            sequence,
            digest: existing,
            block_number: id as u64,
            newly_recorded,
            confirmed_at,
        })
    }

    async fn get_anchor(
        &self,
        identity: &str,
        sequence: u64,
    ) -> std::result::Result<Option<String>, LedgerError> {
        let row = sqlx::query("SELECT digest FROM ledger_anchors WHERE aid = ? AND sequence = ?")
            .bind(identity)
            .bind(sequence as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        row.map(|row| row.try_get::<String, _>("digest"))
            .transpose()
            .map_err(unavailable)
    }
}
