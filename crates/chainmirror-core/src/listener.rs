//! Live tail listener with one handler loop per whitelisted event kind.

use futures::future::try_join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Whitelist;
use crate::context::SyncContext;
use crate::error::MirrorError;
use crate::ledger::EventStream;
use crate::pipeline;
use crate::store::InsertOutcome;
use crate::types::RawEvent;

/// Subscribes to live events and stores them through the shared pipeline.
#[derive(Clone)]
pub struct LiveTailListener {
    ctx: SyncContext,
}

impl LiveTailListener {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Subscribe to every kind in `whitelist` and spawn one handler loop per
    /// kind. Fails if any subscription cannot be opened; no loop is started
    /// in that case.
    pub async fn listen(&self, whitelist: &Whitelist) -> Result<ListenerHandle, MirrorError> {
        let ledger = &self.ctx.ledger;
        let streams = try_join_all(whitelist.iter().map(|kind| async move {
            let stream = ledger.subscribe(kind).await?;
            Ok::<_, MirrorError>((kind.to_string(), stream))
        }))
        .await?;

        let mut kinds = Vec::with_capacity(streams.len());
        let mut tasks = Vec::with_capacity(streams.len());
        for (kind, stream) in streams {
            info!(event_type = %kind, "listening for live events");
            tasks.push(tokio::spawn(handler_loop(self.ctx.clone(), kind.clone(), stream)));
            kinds.push(kind);
        }
        Ok(ListenerHandle { kinds, tasks })
    }
}

async fn handler_loop(ctx: SyncContext, kind: String, mut stream: EventStream) {
    while let Some(event) = stream.recv().await {
        if event.kind != kind {
            debug!(expected = %kind, got = %event.kind, "event kind mismatch, skipping");
            continue;
        }
        if let Err(e) = handle_event(&ctx, &event).await {
            let e = MirrorError::Handler {
                kind: kind.clone(),
                reason: e.to_string(),
            };
            warn!(tx_hash = %event.tx_hash, block = event.block_number, error = %e, "live event dropped");
        }
    }
    debug!(event_type = %kind, "live stream ended");
}

async fn handle_event(ctx: &SyncContext, event: &RawEvent) -> Result<InsertOutcome, MirrorError> {
    let timestamp = ctx.ledger.get_block_timestamp(event.block_number).await?;
    let outcome = pipeline::ingest(ctx, event, timestamp).await?;
    if outcome == InsertOutcome::Inserted {
        info!(event_type = %event.kind, tx_hash = %event.tx_hash, "live event stored");
    }
    Ok(outcome)
}

/// Running handler loops. Dropping the handle stops them.
pub struct ListenerHandle {
    kinds: Vec<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Event kinds being listened to.
    pub fn kinds(&self) -> &[String] {
        &self.kinds
    }

    /// `true` once every handler loop has exited (all streams ended).
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(JoinHandle::is_finished)
    }

    /// Stop all handler loops.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::MemoryCursorStore;
    use crate::reconciler::BackfillReconciler;
    use crate::store::MemoryEventStore;
    use crate::testing::{raw_event, service_config, MockLedger};
    use std::sync::Arc;
    use std::time::Duration;

    const ONE_ETHER: u128 = 1_000_000_000_000_000_000;

    fn setup() -> (Arc<MockLedger>, Arc<MemoryEventStore>, SyncContext) {
        let ledger = Arc::new(MockLedger::new(1_000));
        let events = Arc::new(MemoryEventStore::new());
        let cursors = Arc::new(MemoryCursorStore::new().with_block("bsc_testnet:Miner", 900));
        let ctx = SyncContext::new(
            service_config("BuyEggs, SellEggs"),
            ledger.clone(),
            events.clone(),
            cursors,
        );
        (ledger, events, ctx)
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn subscribes_per_whitelisted_kind() {
        let (ledger, _events, ctx) = setup();
        let handle = LiveTailListener::new(ctx.clone())
            .listen(&ctx.config.whitelist())
            .await
            .unwrap();

        assert_eq!(handle.kinds(), ["BuyEggs", "SellEggs"]);
        assert_eq!(ledger.subscriber_count("BuyEggs"), 1);
        assert_eq!(ledger.subscriber_count("HatchEggs"), 0);
    }

    #[tokio::test]
    async fn live_events_are_stored() {
        let (ledger, events, ctx) = setup();
        let _handle = LiveTailListener::new(ctx.clone())
            .listen(&ctx.config.whitelist())
            .await
            .unwrap();

        ledger.emit(raw_event("BuyEggs", "0x10", 1_001, ONE_ETHER));
        ledger.emit(raw_event("SellEggs", "0x11", 1_002, ONE_ETHER));
        ledger.emit(raw_event("HatchEggs", "0x12", 1_003, ONE_ETHER));

        wait_for(|| events.event_count() == 2).await;
        assert!(events.events_by_type("HatchEggs").is_empty());
    }

    #[tokio::test]
    async fn handler_failure_keeps_listener_armed() {
        let (ledger, events, ctx) = setup();
        let handle = LiveTailListener::new(ctx.clone())
            .listen(&ctx.config.whitelist())
            .await
            .unwrap();

        ledger.fail_timestamp(1_001);
        ledger.emit(raw_event("BuyEggs", "0x10", 1_001, ONE_ETHER));
        ledger.emit(raw_event("BuyEggs", "0x11", 1_002, ONE_ETHER));

        wait_for(|| events.event_count() == 1).await;
        assert_eq!(events.events_by_type("BuyEggs")[0].tx_hash, "0x11");
        assert!(!handle.is_finished());
    }

    #[tokio::test]
    async fn live_then_backfill_does_not_duplicate() {
        let (ledger, events, ctx) = setup();
        let _handle = LiveTailListener::new(ctx.clone())
            .listen(&ctx.config.whitelist())
            .await
            .unwrap();

        ledger.emit(raw_event("BuyEggs", "0x10", 990, ONE_ETHER));
        wait_for(|| events.event_count() == 1).await;

        let report = BackfillReconciler::new(ctx).run_pass().await.unwrap();
        assert_eq!(report.events_seen, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(events.event_count(), 1);
    }

    #[tokio::test]
    async fn stream_end_finishes_loops() {
        let (ledger, _events, ctx) = setup();
        let handle = LiveTailListener::new(ctx.clone())
            .listen(&ctx.config.whitelist())
            .await
            .unwrap();

        ledger.reconnect();
        wait_for(|| handle.is_finished()).await;
    }
}
