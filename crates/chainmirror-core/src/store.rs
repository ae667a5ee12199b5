//! Event store contract and the dedup-guarded insert used by every ingest path.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::MirrorError;
use crate::types::{DedupKey, EventRecord};

/// Trait for persisting normalized event records.
///
/// Implementations must enforce `(tx_hash, event_type)` uniqueness at the
/// storage layer so that concurrent check-then-insert paths cannot both write.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Returns `true` if a record with this key is already stored.
    async fn exists(&self, key: &DedupKey) -> Result<bool, MirrorError>;

    /// Insert if absent. Returns `true` if a new row was written, `false` if
    /// the key already existed.
    async fn insert(&self, record: &EventRecord) -> Result<bool, MirrorError>;
}

/// Outcome of a dedup-guarded insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Check for the key, then insert. Both the backfill and the live path go
/// through here.
pub async fn insert_if_absent(
    store: &dyn EventStore,
    record: &EventRecord,
) -> Result<InsertOutcome, MirrorError> {
    insert_if_absent_with(store, &record.dedup_key(), || Ok(record.clone())).await
}

/// Like [`insert_if_absent`], but the record is only built once `key` is known
/// to be absent.
pub async fn insert_if_absent_with<F>(
    store: &dyn EventStore,
    key: &DedupKey,
    build: F,
) -> Result<InsertOutcome, MirrorError>
where
    F: FnOnce() -> Result<EventRecord, MirrorError>,
{
    if store.exists(key).await? {
        return Ok(InsertOutcome::Duplicate);
    }
    let record = build()?;
    // A concurrent path may have won the race since `exists`; the store's
    // uniqueness constraint turns that into a no-op.
    if store.insert(&record).await? {
        Ok(InsertOutcome::Inserted)
    } else {
        Ok(InsertOutcome::Duplicate)
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory event store. All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryEventStore {
    rows: Mutex<HashMap<(String, String), EventRecord>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored records.
    pub fn event_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    /// All records of one event type.
    pub fn events_by_type(&self, event_type: &str) -> Vec<EventRecord> {
        self.rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn exists(&self, key: &DedupKey) -> Result<bool, MirrorError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .get(&(key.tx_hash.clone(), key.event_type.clone()))
            .is_some_and(|r| r.network == key.network))
    }

    async fn insert(&self, record: &EventRecord) -> Result<bool, MirrorError> {
        let mut rows = self.rows.lock().unwrap();
        let key = (record.tx_hash.clone(), record.event_type.clone());
        if rows.contains_key(&key) {
            return Ok(false);
        }
        rows.insert(key, record.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tx: &str, kind: &str) -> EventRecord {
        EventRecord {
            timestamp: 1_700_000_000,
            tx_hash: tx.into(),
            network: "bsc_testnet".into(),
            contract_address: "0xc0ffee".into(),
            coin_name: "BNB".into(),
            event_type: kind.into(),
            data_payload: r#"{"_amount":"1.00"}"#.into(),
        }
    }

    #[tokio::test]
    async fn insert_then_duplicate() {
        let store = MemoryEventStore::new();
        let rec = record("0x01", "BuyEggs");

        assert_eq!(insert_if_absent(&store, &rec).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(insert_if_absent(&store, &rec).await.unwrap(), InsertOutcome::Duplicate);
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn same_tx_different_kind_is_distinct() {
        let store = MemoryEventStore::new();
        insert_if_absent(&store, &record("0x01", "BuyEggs")).await.unwrap();
        insert_if_absent(&store, &record("0x01", "HatchEggs")).await.unwrap();
        assert_eq!(store.event_count(), 2);
        assert_eq!(store.events_by_type("HatchEggs").len(), 1);
    }

    #[tokio::test]
    async fn raw_insert_is_noop_on_existing_key() {
        let store = MemoryEventStore::new();
        assert!(store.insert(&record("0x02", "SellEggs")).await.unwrap());
        assert!(!store.insert(&record("0x02", "SellEggs")).await.unwrap());
    }

    #[tokio::test]
    async fn existing_key_skips_building_the_record() {
        let store = MemoryEventStore::new();
        let rec = record("0x04", "BuyEggs");
        store.insert(&rec).await.unwrap();

        let outcome = insert_if_absent_with(&store, &rec.dedup_key(), || {
            Err(MirrorError::Decode("record must not be built".into()))
        })
        .await
        .unwrap();
        assert_eq!(outcome, InsertOutcome::Duplicate);

        let fresh = record("0x05", "BuyEggs");
        let outcome = insert_if_absent_with(&store, &fresh.dedup_key(), || Ok(fresh.clone()))
            .await
            .unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);
    }

    #[tokio::test]
    async fn exists_checks_network() {
        let store = MemoryEventStore::new();
        let rec = record("0x03", "SellEggs");
        store.insert(&rec).await.unwrap();

        let mut key = rec.dedup_key();
        assert!(store.exists(&key).await.unwrap());
        key.network = "bsc".into();
        assert!(!store.exists(&key).await.unwrap());
    }
}
