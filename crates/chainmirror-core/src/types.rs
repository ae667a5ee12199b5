//! Shared types for the sync pipeline.

use alloy_primitives::{I256, U256};
use serde::{Deserialize, Serialize};

// ─── RawEvent ─────────────────────────────────────────────────────────────────

/// The value of a decoded event argument, tagged by its ledger encoding.
///
/// The tag is fixed once when the log is decoded; the normalizer only looks at
/// the tag and the argument name, never at the runtime shape of the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawArgValue {
    /// Ledger-native unsigned integer (`uint8` .. `uint256`).
    Uint(U256),
    /// Ledger-native signed integer (`int8` .. `int256`).
    Int(I256),
    /// Anything else, already rendered as text (addresses, bools, bytes, strings).
    Text(String),
}

impl From<&str> for RawArgValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<u64> for RawArgValue {
    fn from(v: u64) -> Self {
        Self::Uint(U256::from(v))
    }
}

/// One named argument of a decoded event.
///
/// Unnamed ABI parameters carry their positional index as name (`"0"`, `"1"`, …).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawArg {
    pub name: String,
    pub value: RawArgValue,
}

impl RawArg {
    pub fn new(name: impl Into<String>, value: impl Into<RawArgValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Returns `true` if the name is a positional index rather than an identifier.
    pub fn is_positional(&self) -> bool {
        !self.name.is_empty() && self.name.bytes().all(|b| b.is_ascii_digit())
    }
}

/// A contract event as delivered by the ledger client, already ABI-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Event kind (ABI event name, e.g. `"BuyEggs"`).
    pub kind: String,
    /// Transaction hash (`0x…`).
    pub tx_hash: String,
    /// Containing block number.
    pub block_number: u64,
    /// Log index within the block.
    pub log_index: u64,
    /// Decoded arguments in ABI order.
    pub args: Vec<RawArg>,
}

// ─── EventRecord ──────────────────────────────────────────────────────────────

/// A normalized event row as persisted in the event store.
///
/// Records are append-only: created once, never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unix timestamp of the containing block.
    pub timestamp: i64,
    pub tx_hash: String,
    pub network: String,
    pub contract_address: String,
    pub coin_name: String,
    pub event_type: String,
    /// JSON object of normalized argument name → value.
    pub data_payload: String,
}

impl EventRecord {
    /// The dedup key identifying this record.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            tx_hash: self.tx_hash.clone(),
            event_type: self.event_type.clone(),
            network: self.network.clone(),
        }
    }
}

/// Identifies a unique event record: `(tx_hash, event_type, network)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub tx_hash: String,
    pub event_type: String,
    pub network: String,
}

// ─── Ledger responses ─────────────────────────────────────────────────────────

/// The part of a transaction receipt the reconciler needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub block_number: u64,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_arg_detection() {
        assert!(RawArg::new("0", "x").is_positional());
        assert!(RawArg::new("12", "x").is_positional());
        assert!(!RawArg::new("_amount", "x").is_positional());
        assert!(!RawArg::new("a1", "x").is_positional());
        assert!(!RawArg::new("", "x").is_positional());
    }

    #[test]
    fn dedup_key_from_record() {
        let rec = EventRecord {
            timestamp: 1,
            tx_hash: "0xaa".into(),
            network: "bsc".into(),
            contract_address: "0x1".into(),
            coin_name: "BNB".into(),
            event_type: "BuyEggs".into(),
            data_payload: "{}".into(),
        };
        let key = rec.dedup_key();
        assert_eq!(key.tx_hash, "0xaa");
        assert_eq!(key.event_type, "BuyEggs");
        assert_eq!(key.network, "bsc");
    }
}
