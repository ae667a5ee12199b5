//! Ledger client abstraction consumed by the reconciler, listener, and supervisor.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::MirrorError;
use crate::types::{RawEvent, TxReceipt};

/// Stream of decoded live events for one event kind.
///
/// The stream ends when the underlying subscription is dropped (for example
/// when the transport disconnects).
pub type EventStream = mpsc::UnboundedReceiver<RawEvent>;

/// Minimal ledger interface needed to mirror one contract.
///
/// Implement this for your chain transport. The EVM implementation lives in
/// `chainmirror-evm`.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current chain height.
    async fn get_block_number(&self) -> Result<u64, MirrorError>;

    /// Unix timestamp of a block.
    async fn get_block_timestamp(&self, block: u64) -> Result<i64, MirrorError>;

    /// Look up a transaction receipt; `None` if the ledger does not know it.
    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TxReceipt>, MirrorError>;

    /// All decoded contract events in `[from, to]` (inclusive), every kind.
    async fn query_logs(&self, from: u64, to: u64) -> Result<Vec<RawEvent>, MirrorError>;

    /// Subscribe to live events of one kind.
    async fn subscribe(&self, kind: &str) -> Result<EventStream, MirrorError>;

    /// Connection epoch. Increments every time the transport (re)connects.
    fn reconnects(&self) -> watch::Receiver<u64>;
}
