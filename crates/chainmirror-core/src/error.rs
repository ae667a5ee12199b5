//! Error types for the chainmirror pipeline.

use thiserror::Error;

/// Errors that can occur while mirroring contract events.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Transient ledger failure (RPC error, dropped socket, timeout).
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// The deploy transaction receipt could not be resolved on a first run.
    #[error("Deploy transaction {tx_hash} could not be resolved; no cursor to fall back on")]
    DeployTxUnresolved { tx_hash: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Handler error for '{kind}': {reason}")]
    Handler { kind: String, reason: String },

    #[error("Sync aborted: {reason}")]
    Aborted { reason: String },
}

impl MirrorError {
    /// Returns `true` if retrying on the next reconnect cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeployTxUnresolved { .. } | Self::Config(_))
    }

    /// Returns `true` if the error came from the ledger side.
    pub fn is_ledger(&self) -> bool {
        matches!(self, Self::Ledger(_))
    }
}
