//! Backfill reconciler: scans `[scan_start, chain_head)` in fixed windows and
//! stores every whitelisted event that is not already present.
//!
//! Windows are processed strictly in order. The cursor is advanced once, after
//! the last window succeeds; any failure aborts the pass and leaves the cursor
//! untouched so the next pass retries from the same start.

use std::collections::HashMap;

use tracing::{debug, error, info};

use crate::config::Whitelist;
use crate::context::SyncContext;
use crate::cursor::SyncCursor;
use crate::error::MirrorError;
use crate::pipeline;
use crate::store::InsertOutcome;
use crate::window::{self, WindowIter, WindowRange, WINDOW_SIZE};

/// Summary of one backfill pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scan_start: u64,
    pub chain_head: u64,
    /// Number of window queries issued.
    pub windows: u64,
    /// Whitelisted events returned by the ledger.
    pub events_seen: u64,
    pub inserted: u64,
    pub duplicates: u64,
    /// Events of non-whitelisted kinds.
    pub skipped: u64,
    /// Cursor as persisted at the end of the pass.
    pub cursor: SyncCursor,
}

/// Drives one chunked historical scan per call.
pub struct BackfillReconciler {
    ctx: SyncContext,
    window_size: u64,
}

impl BackfillReconciler {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            window_size: WINDOW_SIZE,
        }
    }

    /// Override the window size (must be at least 1).
    pub fn with_window_size(mut self, size: u64) -> Self {
        self.window_size = size.max(1);
        self
    }

    /// Load the stored cursor and reconcile against the configured whitelist.
    pub async fn run_pass(&self) -> Result<ReconcileReport, MirrorError> {
        let cursor = self.ctx.cursors.load(&self.ctx.service_id()).await?;
        let whitelist = self.ctx.config.whitelist();
        self.reconcile(&cursor, &whitelist).await
    }

    /// Where a pass over `cursor` begins.
    ///
    /// A never-synced cursor resolves the contract's deploy block through the
    /// deploy transaction receipt; otherwise the margin is subtracted.
    pub async fn scan_start(&self, cursor: &SyncCursor) -> Result<u64, MirrorError> {
        if !cursor.is_never_synced() {
            return Ok(window::scan_start(cursor.last_synced_block, None));
        }

        let tx_hash = &self.ctx.config.contract.deploy_tx;
        let receipt = match self.ctx.ledger.get_transaction_receipt(tx_hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!(tx_hash = %tx_hash, error = %e, "deploy receipt lookup failed");
                None
            }
        };
        let receipt = receipt.ok_or_else(|| MirrorError::DeployTxUnresolved {
            tx_hash: tx_hash.clone(),
        })?;
        info!(
            tx_hash = %tx_hash,
            deploy_block = receipt.block_number,
            "first run, scanning from deploy block"
        );
        Ok(window::scan_start(None, Some(receipt.block_number)))
    }

    /// Reconcile the event store up to the current chain head and persist the
    /// advanced cursor.
    pub async fn reconcile(
        &self,
        cursor: &SyncCursor,
        whitelist: &Whitelist,
    ) -> Result<ReconcileReport, MirrorError> {
        let scan_start = self.scan_start(cursor).await?;
        let chain_head = self.ctx.ledger.get_block_number().await?;
        let windows = WindowIter::new(scan_start, chain_head, self.window_size);

        info!(
            service = %cursor.service_id,
            scan_start,
            chain_head,
            windows = windows.remaining(),
            "backfill pass starting"
        );

        let mut report = ReconcileReport {
            scan_start,
            chain_head,
            windows: 0,
            events_seen: 0,
            inserted: 0,
            duplicates: 0,
            skipped: 0,
            cursor: cursor.clone(),
        };

        for range in windows {
            if let Err(e) = self.process_window(range, whitelist, &mut report).await {
                error!(
                    window_start = range.start,
                    window_end = range.end,
                    error = %e,
                    "backfill pass aborted, cursor not advanced"
                );
                return Err(e);
            }
        }

        let next = cursor.advanced_to(chain_head);
        let block = next.last_synced_block.unwrap_or(chain_head);
        if !self.ctx.cursors.set_synced_block(&next.service_id, block).await? {
            return Err(MirrorError::Storage(format!(
                "cursor write for {} was not acknowledged",
                next.service_id
            )));
        }
        report.cursor = next;

        info!(
            inserted = report.inserted,
            seen = report.events_seen,
            duplicates = report.duplicates,
            "Inserted [{}/{}] events",
            report.inserted,
            report.events_seen
        );
        info!(block, "event store is now in sync until block");
        Ok(report)
    }

    async fn process_window(
        &self,
        range: WindowRange,
        whitelist: &Whitelist,
        report: &mut ReconcileReport,
    ) -> Result<(), MirrorError> {
        let events = self.ctx.ledger.query_logs(range.start, range.end).await?;
        report.windows += 1;
        info!(
            window_start = range.start,
            window_end = range.end,
            events = events.len(),
            "window fetched"
        );

        // Timestamps are per block; a window often holds many events per block.
        let mut timestamps: HashMap<u64, i64> = HashMap::new();

        for event in &events {
            if !whitelist.contains(&event.kind) {
                report.skipped += 1;
                debug!(event_type = %event.kind, "event kind not whitelisted, skipping");
                continue;
            }
            report.events_seen += 1;

            let timestamp = match timestamps.get(&event.block_number) {
                Some(&ts) => ts,
                None => {
                    let ts = self.ctx.ledger.get_block_timestamp(event.block_number).await?;
                    timestamps.insert(event.block_number, ts);
                    ts
                }
            };

            match pipeline::ingest(&self.ctx, event, timestamp).await? {
                InsertOutcome::Inserted => report.inserted += 1,
                InsertOutcome::Duplicate => report.duplicates += 1,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{CursorStore, MemoryCursorStore};
    use crate::store::MemoryEventStore;
    use crate::testing::{
        raw_event, service_config, FailingEventStore, MockLedger, UnackedCursorStore,
        BASE_TIMESTAMP,
    };
    use std::sync::Arc;

    const SERVICE_ID: &str = "bsc_testnet:Miner";
    const ONE_ETHER: u128 = 1_000_000_000_000_000_000;

    struct Harness {
        ledger: Arc<MockLedger>,
        events: Arc<MemoryEventStore>,
        cursors: Arc<MemoryCursorStore>,
        reconciler: BackfillReconciler,
    }

    fn harness(ledger: MockLedger, cursors: MemoryCursorStore) -> Harness {
        let ledger = Arc::new(ledger);
        let events = Arc::new(MemoryEventStore::new());
        let cursors = Arc::new(cursors);
        let ctx = SyncContext::new(
            service_config("BuyEggs, SellEggs"),
            ledger.clone(),
            events.clone(),
            cursors.clone(),
        );
        Harness {
            ledger,
            events,
            cursors,
            reconciler: BackfillReconciler::new(ctx),
        }
    }

    #[tokio::test]
    async fn three_windows_then_cursor_at_head() {
        // cursor 150 → scan start 100
        let h = harness(MockLedger::new(25_000), MemoryCursorStore::new().with_block(SERVICE_ID, 150));

        let report = h.reconciler.run_pass().await.unwrap();

        assert_eq!(
            h.ledger.queries(),
            vec![(100, 10_099), (10_100, 20_099), (20_100, 25_000)]
        );
        assert_eq!(report.scan_start, 100);
        assert_eq!(report.windows, 3);
        assert_eq!(report.cursor.last_synced_block, Some(25_000));
        assert_eq!(h.cursors.get_synced_block(SERVICE_ID).await.unwrap(), Some(25_000));
    }

    #[tokio::test]
    async fn first_run_starts_at_deploy_block_without_margin() {
        let ledger = MockLedger::new(5_200).with_receipt("0xdeploy", 5_000);
        let h = harness(ledger, MemoryCursorStore::new());

        let report = h.reconciler.run_pass().await.unwrap();
        assert_eq!(report.scan_start, 5_000);
        assert_eq!(h.ledger.queries(), vec![(5_000, 5_200)]);
    }

    #[tokio::test]
    async fn unresolvable_deploy_tx_is_fatal() {
        let h = harness(MockLedger::new(100), MemoryCursorStore::new());

        let err = h.reconciler.run_pass().await.unwrap_err();
        assert!(matches!(err, MirrorError::DeployTxUnresolved { ref tx_hash } if tx_hash == "0xdeploy"));
        assert!(err.is_fatal());
        assert!(h.ledger.queries().is_empty());
    }

    #[tokio::test]
    async fn deploy_receipt_lookup_error_is_fatal() {
        let ledger = MockLedger::new(5_200).with_receipt("0xdeploy", 5_000);
        ledger.fail_receipts();
        let h = harness(ledger, MemoryCursorStore::new());

        let err = h.reconciler.run_pass().await.unwrap_err();
        assert!(matches!(err, MirrorError::DeployTxUnresolved { .. }));
        assert!(err.is_fatal());
        assert!(h.ledger.queries().is_empty());
        assert!(h.cursors.get_synced_block(SERVICE_ID).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_failure_aborts_without_advancing() {
        let ledger = Arc::new(
            MockLedger::new(1_000).with_event(raw_event("BuyEggs", "0x01", 950, ONE_ETHER)),
        );
        let cursors = Arc::new(MemoryCursorStore::new().with_block(SERVICE_ID, 900));
        let ctx = SyncContext::new(
            service_config("BuyEggs"),
            ledger.clone(),
            Arc::new(FailingEventStore::new("db gone")),
            cursors.clone(),
        );

        let err = BackfillReconciler::new(ctx).run_pass().await.unwrap_err();
        assert!(matches!(err, MirrorError::Storage(ref reason) if reason == "db gone"));
        assert!(!err.is_fatal());
        assert_eq!(cursors.get_synced_block(SERVICE_ID).await.unwrap(), Some(900));
    }

    #[tokio::test]
    async fn unacknowledged_cursor_write_is_storage_error() {
        let ctx = SyncContext::new(
            service_config("BuyEggs"),
            Arc::new(MockLedger::new(1_000)),
            Arc::new(MemoryEventStore::new()),
            Arc::new(UnackedCursorStore::with_block(SERVICE_ID, 900)),
        );

        let err = BackfillReconciler::new(ctx).run_pass().await.unwrap_err();
        assert!(matches!(err, MirrorError::Storage(ref reason) if reason.contains("not acknowledged")));
    }

    #[tokio::test]
    async fn stores_whitelisted_events_only() {
        let ledger = MockLedger::new(1_000)
            .with_event(raw_event("BuyEggs", "0x01", 120, 5 * ONE_ETHER))
            .with_event(raw_event("HatchEggs", "0x02", 130, 0))
            .with_event(raw_event("SellEggs", "0x03", 140, ONE_ETHER / 2));
        let h = harness(ledger, MemoryCursorStore::new().with_block(SERVICE_ID, 100));

        let report = h.reconciler.run_pass().await.unwrap();
        assert_eq!(report.events_seen, 2);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(h.events.event_count(), 2);

        let buys = h.events.events_by_type("BuyEggs");
        assert_eq!(buys[0].timestamp, BASE_TIMESTAMP + 120);
        assert_eq!(buys[0].coin_name, "BNB");
        assert_eq!(
            buys[0].data_payload,
            r#"{"_from":"0x00000000000000000000000000000000000000b0","_amount":"5.00"}"#
        );
        assert!(h.events.events_by_type("SellEggs")[0].data_payload.contains(r#""_amount":"0.50""#));
    }

    #[tokio::test]
    async fn second_pass_is_idempotent() {
        let ledger = MockLedger::new(1_000)
            .with_event(raw_event("BuyEggs", "0x01", 990, ONE_ETHER))
            .with_event(raw_event("SellEggs", "0x02", 995, ONE_ETHER));
        let h = harness(ledger, MemoryCursorStore::new().with_block(SERVICE_ID, 900));

        h.reconciler.run_pass().await.unwrap();
        let second = h.reconciler.run_pass().await.unwrap();

        // cursor 1000 → scan start 950 overlaps both events
        assert_eq!(second.scan_start, 950);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 2);
        assert_eq!(h.events.event_count(), 2);
    }

    #[tokio::test]
    async fn failed_window_aborts_without_advancing() {
        let ledger = MockLedger::new(25_000)
            .with_event(raw_event("BuyEggs", "0x01", 500, ONE_ETHER));
        let h = harness(ledger, MemoryCursorStore::new().with_block(SERVICE_ID, 150));
        h.ledger.fail_window(10_100);

        let err = h.reconciler.run_pass().await.unwrap_err();
        assert!(err.is_ledger());
        assert_eq!(h.ledger.queries().len(), 2, "no window after the failure");
        assert_eq!(h.cursors.get_synced_block(SERVICE_ID).await.unwrap(), Some(150));

        h.ledger.clear_failures();
        let report = h.reconciler.run_pass().await.unwrap();
        assert_eq!(report.scan_start, 100, "retry starts from the same scan start");
        assert_eq!(report.duplicates, 1);
    }

    #[tokio::test]
    async fn empty_range_still_advances_cursor() {
        let h = harness(MockLedger::new(1_020), MemoryCursorStore::new().with_block(SERVICE_ID, 1_000));
        h.ledger.set_head(900);

        let report = h.reconciler.run_pass().await.unwrap();
        assert_eq!(report.windows, 0);
        // lagging head never moves the cursor backwards
        assert_eq!(report.cursor.last_synced_block, Some(1_000));
    }

    #[tokio::test]
    async fn timestamps_cached_per_block() {
        let mut second = raw_event("SellEggs", "0x02", 300, ONE_ETHER);
        second.log_index = 1;
        let ledger = MockLedger::new(1_000)
            .with_event(raw_event("BuyEggs", "0x01", 300, ONE_ETHER))
            .with_event(second);
        let h = harness(ledger, MemoryCursorStore::new().with_block(SERVICE_ID, 250));

        h.reconciler.run_pass().await.unwrap();
        assert_eq!(h.ledger.timestamp_calls(), 1);
    }

    #[tokio::test]
    async fn custom_window_size() {
        let h = harness(MockLedger::new(30), MemoryCursorStore::new().with_block(SERVICE_ID, 50));
        let reconciler = h.reconciler.with_window_size(10);
        reconciler.run_pass().await.unwrap();
        assert_eq!(h.ledger.queries(), vec![(0, 9), (10, 19), (20, 29)]);
    }
}
