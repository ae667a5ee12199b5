//! chainmirror-evm: EVM [`LedgerClient`](chainmirror_core::ledger::LedgerClient)
//! over WebSocket JSON-RPC.
//!
//! - [`ws::WsTransport`]: socket task, request multiplexing, reconnect epoch
//! - [`abi::AbiDecoder`]: JSON ABI → decoded, kind-tagged event arguments
//! - [`client::EvmLedgerClient`]: the two glued together for one contract

pub mod abi;
pub mod client;
pub mod rpc;
pub mod subscriptions;
pub mod ws;

pub use abi::{AbiDecoder, RawLog};
pub use client::EvmLedgerClient;
pub use rpc::TransportError;
pub use ws::{WsConfig, WsTransport};
