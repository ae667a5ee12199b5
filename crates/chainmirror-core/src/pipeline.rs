//! Shared normalize → dedup → insert path used by the backfill and the live tail.

use tracing::info;

use crate::context::SyncContext;
use crate::error::MirrorError;
use crate::normalize::to_payload;
use crate::store::{insert_if_absent_with, InsertOutcome};
use crate::types::{DedupKey, EventRecord, RawEvent};

/// The dedup key `event` will be stored under.
pub fn dedup_key(ctx: &SyncContext, event: &RawEvent) -> DedupKey {
    DedupKey {
        tx_hash: event.tx_hash.clone(),
        event_type: event.kind.clone(),
        network: ctx.config.network_name.clone(),
    }
}

/// Build the storable record for a decoded event.
pub fn build_record(
    ctx: &SyncContext,
    event: &RawEvent,
    timestamp: i64,
) -> Result<EventRecord, MirrorError> {
    let args = ctx.normalizer().normalize(event);
    Ok(EventRecord {
        timestamp,
        tx_hash: event.tx_hash.clone(),
        network: ctx.config.network_name.clone(),
        contract_address: ctx.config.contract.address.clone(),
        coin_name: ctx.config.contract.coin_name.clone(),
        event_type: event.kind.clone(),
        data_payload: to_payload(&args)?,
    })
}

/// Store `event` unless its dedup key is already present. Normalization only
/// runs on a miss.
pub async fn ingest(
    ctx: &SyncContext,
    event: &RawEvent,
    timestamp: i64,
) -> Result<InsertOutcome, MirrorError> {
    let key = dedup_key(ctx, event);
    let outcome = insert_if_absent_with(ctx.events.as_ref(), &key, || {
        build_record(ctx, event, timestamp)
    })
    .await?;
    match outcome {
        InsertOutcome::Inserted => info!(
            tx_hash = %key.tx_hash,
            event_type = %key.event_type,
            block = event.block_number,
            "event stored"
        ),
        InsertOutcome::Duplicate => info!(
            tx_hash = %key.tx_hash,
            event_type = %key.event_type,
            "event already stored, skipping"
        ),
    }
    Ok(outcome)
}
