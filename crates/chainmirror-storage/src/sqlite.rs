//! SQLite storage backend.
//!
//! Persists event records and sync cursors to a single SQLite file. Uses
//! `sqlx` with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use chainmirror_storage::{sqlite::SqliteStorage, Tables};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./mirror.db", Tables::default()).await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory(Tables::default()).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainmirror_core::cursor::CursorStore;
use chainmirror_core::error::MirrorError;
use chainmirror_core::store::EventStore;
use chainmirror_core::types::{DedupKey, EventRecord};

use crate::Tables;

fn storage_err(e: sqlx::Error) -> MirrorError {
    MirrorError::Storage(e.to_string())
}

/// SQLite-backed event and cursor store.
pub struct SqliteStorage {
    pool: SqlitePool,
    tables: Tables,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./mirror.db"`) or a full SQLite
    /// URL (`"sqlite:./mirror.db?mode=rwc"`). `sqlite::memory:` opens an
    /// in-memory database.
    pub async fn open(path: &str, tables: Tables) -> Result<Self, MirrorError> {
        if path.contains(":memory:") {
            return Self::in_memory(tables).await;
        }
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let storage = Self { pool, tables };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every pooled connection would get its own empty database, so the pool
    /// holds exactly one connection and never recycles it. All data is lost
    /// when the storage is dropped.
    pub async fn in_memory(tables: Tables) -> Result<Self, MirrorError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool, tables };
        storage.init_schema().await?;
        Ok(storage)
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), MirrorError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                timestamp        INTEGER NOT NULL,
                tx_hash          TEXT    NOT NULL,
                network          TEXT    NOT NULL,
                contract_address TEXT    NOT NULL,
                coin_name        TEXT    NOT NULL,
                event_type       TEXT    NOT NULL,
                data             TEXT    NOT NULL,
                PRIMARY KEY (tx_hash, event_type)
            )",
            self.tables.events
        ))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{0}_type ON {0} (event_type)",
            self.tables.events
        ))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                service_id   TEXT    NOT NULL PRIMARY KEY,
                synced_block INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL
            )",
            self.tables.cursors
        ))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(events = %self.tables.events, cursors = %self.tables.cursors, "SQLite schema initialised");
        Ok(())
    }

    /// Total number of stored records.
    pub async fn event_count(&self) -> Result<u64, MirrorError> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS cnt FROM {}", self.tables.events))
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let count: i64 = row.try_get("cnt").map_err(storage_err)?;
        Ok(count as u64)
    }

    /// All records of one event type, oldest first.
    pub async fn events_by_type(&self, event_type: &str) -> Result<Vec<EventRecord>, MirrorError> {
        let rows = sqlx::query(&format!(
            "SELECT timestamp, tx_hash, network, contract_address, coin_name, event_type, data
             FROM {} WHERE event_type = ? ORDER BY timestamp ASC, tx_hash ASC",
            self.tables.events
        ))
        .bind(event_type)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|row| -> Result<EventRecord, sqlx::Error> {
                Ok(EventRecord {
                    timestamp: row.try_get("timestamp")?,
                    tx_hash: row.try_get("tx_hash")?,
                    network: row.try_get("network")?,
                    contract_address: row.try_get("contract_address")?,
                    coin_name: row.try_get("coin_name")?,
                    event_type: row.try_get("event_type")?,
                    data_payload: row.try_get("data")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)
    }
}

// ─── EventStore impl ──────────────────────────────────────────────────────────

#[async_trait]
impl EventStore for SqliteStorage {
    async fn exists(&self, key: &DedupKey) -> Result<bool, MirrorError> {
        let row = sqlx::query(&format!(
            "SELECT 1 FROM {} WHERE tx_hash = ? AND event_type = ? AND network = ? LIMIT 1",
            self.tables.events
        ))
        .bind(&key.tx_hash)
        .bind(&key.event_type)
        .bind(&key.network)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(row.is_some())
    }

    async fn insert(&self, record: &EventRecord) -> Result<bool, MirrorError> {
        let result = sqlx::query(&format!(
            "INSERT OR IGNORE INTO {}
                (timestamp, tx_hash, network, contract_address, coin_name, event_type, data)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.tables.events
        ))
        .bind(record.timestamp)
        .bind(&record.tx_hash)
        .bind(&record.network)
        .bind(&record.contract_address)
        .bind(&record.coin_name)
        .bind(&record.event_type)
        .bind(&record.data_payload)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        let inserted = result.rows_affected() == 1;
        debug!(tx_hash = %record.tx_hash, event_type = %record.event_type, inserted, "event row written");
        Ok(inserted)
    }
}

// ─── CursorStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl CursorStore for SqliteStorage {
    async fn get_synced_block(&self, service_id: &str) -> Result<Option<u64>, MirrorError> {
        let row = sqlx::query(&format!(
            "SELECT synced_block FROM {} WHERE service_id = ?",
            self.tables.cursors
        ))
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        match row {
            None => Ok(None),
            Some(r) => {
                let block: i64 = r.try_get("synced_block").map_err(storage_err)?;
                Ok(Some(block as u64))
            }
        }
    }

    async fn set_synced_block(&self, service_id: &str, block: u64) -> Result<bool, MirrorError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(&format!(
            "INSERT OR REPLACE INTO {} (service_id, synced_block, updated_at) VALUES (?, ?, ?)",
            self.tables.cursors
        ))
        .bind(service_id)
        .bind(block as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(service_id, block, "cursor saved");
        Ok(result.rows_affected() > 0)
    }

    async fn reset(&self, service_id: &str) -> Result<(), MirrorError> {
        sqlx::query(&format!("DELETE FROM {} WHERE service_id = ?", self.tables.cursors))
            .bind(service_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}
