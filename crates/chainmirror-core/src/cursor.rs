//! Sync cursor: persists the last block height fully reconciled for a service.
//!
//! The cursor is read once when a backfill pass starts and written once when
//! the pass succeeds. It never moves backwards.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MirrorError;

/// The service's position in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Cursor key (see `ServiceConfig::service_id`).
    pub service_id: String,
    /// Last fully reconciled block; `None` means the service never synced.
    pub last_synced_block: Option<u64>,
}

impl SyncCursor {
    /// A cursor for a service that has never completed a pass.
    pub fn never_synced(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            last_synced_block: None,
        }
    }

    pub fn at(service_id: impl Into<String>, block: u64) -> Self {
        Self {
            service_id: service_id.into(),
            last_synced_block: Some(block),
        }
    }

    pub fn is_never_synced(&self) -> bool {
        self.last_synced_block.is_none()
    }

    /// Return the cursor advanced to `block`, never moving backwards.
    pub fn advanced_to(&self, block: u64) -> Self {
        let next = match self.last_synced_block {
            Some(prev) => prev.max(block),
            None => block,
        };
        Self::at(self.service_id.clone(), next)
    }
}

/// Trait for loading and persisting sync cursors.
///
/// Implementations include `MemoryCursorStore`, `SqliteStorage`, and
/// `MySqlStorage`. A single writer per `service_id` is assumed.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the synced block for a service; `None` if it never synced.
    async fn get_synced_block(&self, service_id: &str) -> Result<Option<u64>, MirrorError>;

    /// Upsert the synced block. Returns `true` if the store acknowledged the write.
    async fn set_synced_block(&self, service_id: &str, block: u64) -> Result<bool, MirrorError>;

    /// Delete the cursor (next pass starts from the deploy block).
    async fn reset(&self, service_id: &str) -> Result<(), MirrorError>;

    /// Load the full cursor for a service.
    async fn load(&self, service_id: &str) -> Result<SyncCursor, MirrorError> {
        Ok(SyncCursor {
            service_id: service_id.to_string(),
            last_synced_block: self.get_synced_block(service_id).await?,
        })
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory cursor store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCursorStore {
    data: Mutex<HashMap<String, u64>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a cursor (tests).
    pub fn with_block(self, service_id: &str, block: u64) -> Self {
        self.data.lock().unwrap().insert(service_id.to_string(), block);
        self
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn get_synced_block(&self, service_id: &str) -> Result<Option<u64>, MirrorError> {
        Ok(self.data.lock().unwrap().get(service_id).copied())
    }

    async fn set_synced_block(&self, service_id: &str, block: u64) -> Result<bool, MirrorError> {
        self.data.lock().unwrap().insert(service_id.to_string(), block);
        Ok(true)
    }

    async fn reset(&self, service_id: &str) -> Result<(), MirrorError> {
        self.data.lock().unwrap().remove(service_id);
        Ok(())
    }
}
