//! ABI-driven log decoding.
//!
//! `topics[0]` selects the event. Indexed parameters decode from `topics[1..]`;
//! reference types (string, bytes, arrays, tuples) are stored as a keccak hash
//! in topic position, so their raw topic hex is returned as text. The data
//! section decodes as the tuple of non-indexed parameters.

use std::collections::HashMap;
use std::path::Path;

use alloy_dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_json_abi::{Event, JsonAbi};
use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use chainmirror_core::error::MirrorError;
use chainmirror_core::types::{RawArg, RawArgValue, RawEvent};

use crate::rpc::parse_hex_u64;

/// A raw EVM log as returned by `eth_getLogs` and `logs` subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

struct EventDef {
    name: String,
    /// (name, type, indexed) in ABI order; unnamed params are named by position.
    params: Vec<(String, DynSolType, bool)>,
}

/// Decodes logs of one contract against its JSON ABI.
pub struct AbiDecoder {
    by_selector: HashMap<B256, EventDef>,
    by_name: HashMap<String, B256>,
}

impl AbiDecoder {
    pub fn from_abi(abi: &JsonAbi) -> Result<Self, MirrorError> {
        let mut by_selector = HashMap::new();
        let mut by_name = HashMap::new();
        for event in abi.events().filter(|e| !e.anonymous) {
            let selector = event.selector();
            by_selector.insert(selector, event_def(event)?);
            by_name.entry(event.name.clone()).or_insert(selector);
        }
        Ok(Self {
            by_selector,
            by_name,
        })
    }

    /// Parse a JSON ABI: either a bare array or an object with an `abi` key.
    pub fn from_json(json: &str) -> Result<Self, MirrorError> {
        let mut value: Value = serde_json::from_str(json)
            .map_err(|e| MirrorError::Config(format!("invalid ABI JSON: {e}")))?;
        if let Some(inner) = value.get_mut("abi") {
            value = inner.take();
        }
        let abi: JsonAbi = serde_json::from_value(value)
            .map_err(|e| MirrorError::Config(format!("invalid ABI: {e}")))?;
        Self::from_abi(&abi)
    }

    pub fn from_file(path: &Path) -> Result<Self, MirrorError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::Config(format!("cannot read ABI {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// `topics[0]` of an event kind.
    pub fn selector(&self, kind: &str) -> Option<B256> {
        self.by_name.get(kind).copied()
    }

    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    /// Decode a log. `Ok(None)` for removed logs and unknown selectors.
    pub fn decode(&self, log: &RawLog) -> Result<Option<RawEvent>, MirrorError> {
        if log.is_removed() {
            return Ok(None);
        }
        let Some(topic0) = log.topics.first() else {
            return Ok(None);
        };
        let selector: B256 = topic0
            .parse()
            .map_err(|e| MirrorError::Decode(format!("invalid topic0 {topic0}: {e}")))?;
        let Some(def) = self.by_selector.get(&selector) else {
            return Ok(None);
        };

        let mut topics = log.topics.iter().skip(1);
        let mut data_types = Vec::new();
        let mut slots: Vec<Option<RawArgValue>> = Vec::with_capacity(def.params.len());
        for (name, ty, indexed) in &def.params {
            if *indexed {
                let topic = topics.next().ok_or_else(|| {
                    MirrorError::Decode(format!("{}: missing topic for {name}", def.name))
                })?;
                slots.push(Some(decode_topic(topic, ty)?));
            } else {
                data_types.push(ty.clone());
                slots.push(None);
            }
        }

        let data = hex_bytes(&log.data)?;
        let mut data_values = if data_types.is_empty() {
            Vec::new()
        } else {
            match DynSolType::Tuple(data_types).abi_decode_params(&data) {
                Ok(DynSolValue::Tuple(values)) => values,
                Ok(other) => vec![other],
                Err(e) => {
                    return Err(MirrorError::Decode(format!("{}: data decode: {e}", def.name)))
                }
            }
        }
        .into_iter();

        let mut args = Vec::with_capacity(slots.len());
        for ((name, _, _), slot) in def.params.iter().zip(slots) {
            let value = match slot {
                Some(v) => v,
                None => data_values.next().map(raw_value).ok_or_else(|| {
                    MirrorError::Decode(format!("{}: missing data value for {name}", def.name))
                })?,
            };
            args.push(RawArg::new(name.clone(), value));
        }

        let block_number = parse_hex_u64(&log.block_number).ok_or_else(|| {
            MirrorError::Decode(format!("invalid blockNumber {}", log.block_number))
        })?;
        Ok(Some(RawEvent {
            kind: def.name.clone(),
            tx_hash: log.tx_hash.clone(),
            block_number,
            log_index: parse_hex_u64(&log.log_index).unwrap_or_default(),
            args,
        }))
    }
}

fn event_def(event: &Event) -> Result<EventDef, MirrorError> {
    let params = event
        .inputs
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let ty = p.resolve().map_err(|e| {
                MirrorError::Config(format!("{}: unsupported type {}: {e}", event.name, p.ty))
            })?;
            let name = if p.name.is_empty() { i.to_string() } else { p.name.clone() };
            Ok((name, ty, p.indexed))
        })
        .collect::<Result<Vec<_>, MirrorError>>()?;
    Ok(EventDef {
        name: event.name.clone(),
        params,
    })
}

fn decode_topic(topic: &str, ty: &DynSolType) -> Result<RawArgValue, MirrorError> {
    if matches!(
        ty,
        DynSolType::String
            | DynSolType::Bytes
            | DynSolType::Array(_)
            | DynSolType::FixedArray(..)
            | DynSolType::Tuple(_)
    ) {
        return Ok(RawArgValue::Text(topic.to_lowercase()));
    }
    let bytes = hex_bytes(topic)?;
    ty.abi_decode(&bytes)
        .map(raw_value)
        .map_err(|e| MirrorError::Decode(format!("topic decode: {e}")))
}

/// Tag a decoded value: integers keep their width-agnostic numeric form,
/// everything else is rendered as text.
pub fn raw_value(value: DynSolValue) -> RawArgValue {
    match value {
        DynSolValue::Uint(u, _) => RawArgValue::Uint(u),
        DynSolValue::Int(i, _) => RawArgValue::Int(i),
        other => RawArgValue::Text(render(&other)),
    }
}

fn render(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::Address(a) => format!("{a:#x}"),
        DynSolValue::FixedBytes(word, size) => format!("0x{}", hex::encode(&word[..*size])),
        DynSolValue::Bytes(b) => format!("0x{}", hex::encode(b)),
        DynSolValue::Function(f) => format!("0x{}", hex::encode(f)),
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            let items: Vec<Value> = items.iter().map(|v| Value::String(render(v))).collect();
            Value::Array(items).to_string()
        }
        #[allow(unreachable_patterns)]
        other => format!("{other:?}"),
    }
}

fn hex_bytes(s: &str) -> Result<Vec<u8>, MirrorError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|e| MirrorError::Decode(format!("invalid hex: {e}")))
}
