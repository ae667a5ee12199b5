//! Scripted ledger and fixtures for tests.
//!
//! Enabled inside this crate's tests and, for other crates, through the
//! `test-utils` feature.

use alloy_primitives::U256;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{mpsc, watch};

use crate::config::{ContractConfig, ServiceConfig, ServiceDatabase};
use crate::cursor::{CursorStore, MemoryCursorStore};
use crate::error::MirrorError;
use crate::ledger::{EventStream, LedgerClient};
use crate::store::EventStore;
use crate::types::{DedupKey, EventRecord, RawArg, RawArgValue, RawEvent, TxReceipt};

/// Timestamp the mock reports for block 0; block `n` is `BASE_TIMESTAMP + n`.
pub const BASE_TIMESTAMP: i64 = 1_600_000_000;

/// In-memory ledger with scripted logs, failures, live events, and reconnects.
pub struct MockLedger {
    head: AtomicU64,
    receipts: Mutex<HashMap<String, u64>>,
    logs: Mutex<Vec<RawEvent>>,
    failing_windows: Mutex<HashSet<u64>>,
    failing_timestamps: Mutex<HashSet<u64>>,
    failing_receipts: AtomicBool,
    queries: Mutex<Vec<(u64, u64)>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<RawEvent>>>>,
    head_calls: AtomicUsize,
    timestamp_calls: AtomicUsize,
    epoch: watch::Sender<u64>,
}

impl MockLedger {
    /// A connected ledger (epoch 1) at chain height `head`.
    pub fn new(head: u64) -> Self {
        let (epoch, _) = watch::channel(1);
        Self {
            head: AtomicU64::new(head),
            receipts: Mutex::new(HashMap::new()),
            logs: Mutex::new(Vec::new()),
            failing_windows: Mutex::new(HashSet::new()),
            failing_timestamps: Mutex::new(HashSet::new()),
            failing_receipts: AtomicBool::new(false),
            queries: Mutex::new(Vec::new()),
            subscribers: Mutex::new(HashMap::new()),
            head_calls: AtomicUsize::new(0),
            timestamp_calls: AtomicUsize::new(0),
            epoch,
        }
    }

    pub fn with_receipt(self, tx_hash: &str, block: u64) -> Self {
        self.receipts.lock().unwrap().insert(tx_hash.to_string(), block);
        self
    }

    pub fn with_event(self, event: RawEvent) -> Self {
        self.logs.lock().unwrap().push(event);
        self
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    /// Make every query whose window starts at `start` fail.
    pub fn fail_window(&self, start: u64) {
        self.failing_windows.lock().unwrap().insert(start);
    }

    pub fn clear_failures(&self) {
        self.failing_windows.lock().unwrap().clear();
        self.failing_timestamps.lock().unwrap().clear();
    }

    /// Make timestamp lookups for `block` fail.
    pub fn fail_timestamp(&self, block: u64) {
        self.failing_timestamps.lock().unwrap().insert(block);
    }

    /// Make receipt lookups fail with a ledger error.
    pub fn fail_receipts(&self) {
        self.failing_receipts.store(true, Ordering::SeqCst);
    }

    /// Add an event to history only, as if it was mined while disconnected.
    pub fn push_log(&self, event: RawEvent) {
        self.logs.lock().unwrap().push(event);
    }

    /// Add an event to history and deliver it to live subscribers of its kind.
    pub fn emit(&self, event: RawEvent) {
        self.push_log(event.clone());
        let mut subs = self.subscribers.lock().unwrap();
        if let Some(senders) = subs.get_mut(&event.kind) {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Simulate a dropped and re-established connection: live streams end and
    /// the epoch advances.
    pub fn reconnect(&self) {
        self.subscribers.lock().unwrap().clear();
        self.epoch.send_modify(|e| *e += 1);
    }

    /// Windows queried so far, in order.
    pub fn queries(&self) -> Vec<(u64, u64)> {
        self.queries.lock().unwrap().clone()
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub fn timestamp_calls(&self) -> usize {
        self.timestamp_calls.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self, kind: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .get(kind)
            .map_or(0, |s| s.iter().filter(|tx| !tx.is_closed()).count())
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn get_block_number(&self) -> Result<u64, MirrorError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_block_timestamp(&self, block: u64) -> Result<i64, MirrorError> {
        self.timestamp_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_timestamps.lock().unwrap().contains(&block) {
            return Err(MirrorError::Ledger(format!("block {block} unavailable")));
        }
        Ok(BASE_TIMESTAMP + block as i64)
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TxReceipt>, MirrorError> {
        if self.failing_receipts.load(Ordering::SeqCst) {
            return Err(MirrorError::Ledger(format!("receipt {tx_hash} unavailable")));
        }
        Ok(self
            .receipts
            .lock()
            .unwrap()
            .get(tx_hash)
            .map(|&block_number| TxReceipt { block_number }))
    }

    async fn query_logs(&self, from: u64, to: u64) -> Result<Vec<RawEvent>, MirrorError> {
        self.queries.lock().unwrap().push((from, to));
        if self.failing_windows.lock().unwrap().contains(&from) {
            return Err(MirrorError::Ledger(format!("query {from}..={to} timed out")));
        }
        let mut events: Vec<RawEvent> = self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|e| (from..=to).contains(&e.block_number))
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.block_number, e.log_index));
        Ok(events)
    }

    async fn subscribe(&self, kind: &str) -> Result<EventStream, MirrorError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap()
            .entry(kind.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    fn reconnects(&self) -> watch::Receiver<u64> {
        self.epoch.subscribe()
    }
}

// ─── Failing stores ───────────────────────────────────────────────────────────

/// Event store whose writes always fail, as if the database went away.
pub struct FailingEventStore {
    reason: String,
}

impl FailingEventStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl EventStore for FailingEventStore {
    async fn exists(&self, _key: &DedupKey) -> Result<bool, MirrorError> {
        Ok(false)
    }

    async fn insert(&self, _record: &EventRecord) -> Result<bool, MirrorError> {
        Err(MirrorError::Storage(self.reason.clone()))
    }
}

/// Cursor store that reads normally but never acknowledges a write.
#[derive(Default)]
pub struct UnackedCursorStore {
    inner: MemoryCursorStore,
}

impl UnackedCursorStore {
    pub fn with_block(service_id: &str, block: u64) -> Self {
        Self {
            inner: MemoryCursorStore::new().with_block(service_id, block),
        }
    }
}

#[async_trait]
impl CursorStore for UnackedCursorStore {
    async fn get_synced_block(&self, service_id: &str) -> Result<Option<u64>, MirrorError> {
        self.inner.get_synced_block(service_id).await
    }

    async fn set_synced_block(&self, _service_id: &str, _block: u64) -> Result<bool, MirrorError> {
        Ok(false)
    }

    async fn reset(&self, service_id: &str) -> Result<(), MirrorError> {
        self.inner.reset(service_id).await
    }
}

// ─── Fixtures ─────────────────────────────────────────────────────────────────

/// A decoded event with an `_amount` argument of `amount_wei`.
pub fn raw_event(kind: &str, tx_hash: &str, block: u64, amount_wei: u128) -> RawEvent {
    RawEvent {
        kind: kind.to_string(),
        tx_hash: tx_hash.to_string(),
        block_number: block,
        log_index: 0,
        args: vec![
            RawArg::new("0", "0x00000000000000000000000000000000000000b0"),
            RawArg::new("_from", "0x00000000000000000000000000000000000000b0"),
            RawArg::new("_amount", RawArgValue::Uint(U256::from(amount_wei))),
        ],
    }
}

/// Service config mirroring `wanted_events`, deployed by tx `0xdeploy`.
pub fn service_config(wanted_events: &str) -> ServiceConfig {
    ServiceConfig {
        network_name: "bsc_testnet".to_string(),
        database: ServiceDatabase {
            environment: "test".to_string(),
            table_name: "events".to_string(),
            cursor_table: "service_sync".to_string(),
        },
        contract: ContractConfig {
            name: "Miner".to_string(),
            address: "0x00000000000000000000000000000000000000aa".to_string(),
            deploy_tx: "0xdeploy".to_string(),
            abi_path: PathBuf::from("abi/Miner.json"),
            wanted_events: wanted_events.to_string(),
            format_ether: "_amount".to_string(),
            coin_name: "BNB".to_string(),
            display_decimals: 2,
            scale_decimals: 18,
        },
    }
}
