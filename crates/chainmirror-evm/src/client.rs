//! [`LedgerClient`] implementation for EVM chains over WebSocket JSON-RPC.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use chainmirror_core::error::MirrorError;
use chainmirror_core::ledger::{EventStream, LedgerClient};
use chainmirror_core::types::{RawEvent, TxReceipt};

use crate::abi::{AbiDecoder, RawLog};
use crate::rpc::{hex_quantity, parse_hex_u64};
use crate::ws::{WsConfig, WsTransport};

/// Ledger client bound to one contract address.
pub struct EvmLedgerClient {
    transport: WsTransport,
    address: String,
    decoder: Arc<AbiDecoder>,
}

impl EvmLedgerClient {
    pub fn new(transport: WsTransport, address: impl Into<String>, decoder: AbiDecoder) -> Self {
        Self {
            transport,
            address: address.into().to_lowercase(),
            decoder: Arc::new(decoder),
        }
    }

    /// Open a transport to `url` with the default reconnect backoff.
    pub fn connect(url: &str, address: &str, decoder: AbiDecoder) -> Self {
        Self::new(WsTransport::connect(url, WsConfig::default()), address, decoder)
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }
}

fn quantity(v: &Value, field: &str) -> Result<u64, MirrorError> {
    v[field]
        .as_str()
        .and_then(parse_hex_u64)
        .ok_or_else(|| MirrorError::Ledger(format!("missing or invalid {field} in {v}")))
}

#[async_trait]
impl LedgerClient for EvmLedgerClient {
    async fn get_block_number(&self) -> Result<u64, MirrorError> {
        let hex: String = self.transport.request("eth_blockNumber", vec![]).await?;
        parse_hex_u64(&hex).ok_or_else(|| MirrorError::Ledger(format!("invalid block number {hex}")))
    }

    async fn get_block_timestamp(&self, block: u64) -> Result<i64, MirrorError> {
        let header: Value = self
            .transport
            .request(
                "eth_getBlockByNumber",
                vec![json!(hex_quantity(block)), json!(false)],
            )
            .await?;
        if header.is_null() {
            return Err(MirrorError::Ledger(format!("block {block} not found")));
        }
        Ok(quantity(&header, "timestamp")? as i64)
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TxReceipt>, MirrorError> {
        let receipt: Value = self
            .transport
            .request("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await?;
        if receipt.is_null() {
            return Ok(None);
        }
        Ok(Some(TxReceipt {
            block_number: quantity(&receipt, "blockNumber")?,
        }))
    }

    async fn query_logs(&self, from: u64, to: u64) -> Result<Vec<RawEvent>, MirrorError> {
        let filter = json!({
            "address": self.address,
            "fromBlock": hex_quantity(from),
            "toBlock": hex_quantity(to),
        });
        let logs: Vec<RawLog> = self.transport.request("eth_getLogs", vec![filter]).await?;
        debug!(from, to, logs = logs.len(), "eth_getLogs");

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            match self.decoder.decode(log) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => warn!(tx_hash = %log.tx_hash, error = %e, "undecodable log skipped"),
            }
        }
        Ok(events)
    }

    async fn subscribe(&self, kind: &str) -> Result<EventStream, MirrorError> {
        let selector = self
            .decoder
            .selector(kind)
            .ok_or_else(|| MirrorError::Config(format!("event {kind} is not in the ABI")))?;
        let filter = json!({
            "address": self.address,
            "topics": [format!("{selector:#x}")],
        });
        let (sub_id, mut notes) = self.transport.subscribe("logs", vec![filter]).await?;
        debug!(event_type = %kind, subscription = %sub_id, "subscribed");

        let (tx, rx) = mpsc::unbounded_channel();
        let decoder = self.decoder.clone();
        tokio::spawn(async move {
            while let Some(note) = notes.recv().await {
                let event = serde_json::from_value::<RawLog>(note)
                    .map_err(|e| MirrorError::Decode(e.to_string()))
                    .and_then(|log| decoder.decode(&log));
                match event {
                    Ok(Some(event)) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "undecodable live log skipped"),
                }
            }
        });
        Ok(rx)
    }

    fn reconnects(&self) -> watch::Receiver<u64> {
        self.transport.epoch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    const ABI: &str = r#"[{"type":"event","name":"SellEggs","anonymous":false,"inputs":[
        {"name":"_from","type":"address","indexed":true},
        {"name":"_amount","type":"uint256","indexed":false}]}]"#;

    fn sell_log(decoder: &AbiDecoder, block: u64) -> Value {
        let selector = decoder.selector("SellEggs").unwrap();
        json!({
            "address": "0x00000000000000000000000000000000000000aa",
            "topics": [format!("{selector:#x}"), format!("0x{:0>64}", "b0")],
            "data": format!("0x{:0>64}", "0de0b6b3a7640000"),
            "blockNumber": hex_quantity(block),
            "transactionHash": format!("0x{block:064x}"),
            "logIndex": "0x0",
            "removed": false
        })
    }

    /// Minimal node answering the methods the client uses.
    async fn spawn_node() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let decoder = AbiDecoder::from_json(ABI).unwrap();
            while let Ok((tcp, _)) = listener.accept().await {
                let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                while let Some(Ok(Message::Text(text))) = ws.next().await {
                    let req: Value = serde_json::from_str(text.as_str()).unwrap();
                    let result = match req["method"].as_str().unwrap() {
                        "eth_blockNumber" => json!("0x61a8"),
                        "eth_getBlockByNumber" => {
                            json!({"number": req["params"][0], "timestamp": "0x5f5e1000"})
                        }
                        "eth_getTransactionReceipt" if req["params"][0] == "0xdeploy" => {
                            json!({"blockNumber": "0x1388"})
                        }
                        "eth_getTransactionReceipt" => Value::Null,
                        "eth_getLogs" => json!([
                            sell_log(&decoder, 5_001),
                            {
                                "address": "0xaa",
                                "topics": [format!("0x{}", "ee".repeat(32))],
                                "data": "0x",
                                "blockNumber": "0x1",
                                "transactionHash": "0x1",
                                "logIndex": "0x0"
                            }
                        ]),
                        "eth_subscribe" => json!("0xfeed"),
                        _ => Value::Null,
                    };
                    let resp = json!({"jsonrpc": "2.0", "id": req["id"], "result": result});
                    ws.send(Message::Text(resp.to_string().into())).await.unwrap();
                    if req["method"] == "eth_subscribe" {
                        let note = json!({
                            "jsonrpc": "2.0",
                            "method": "eth_subscription",
                            "params": {"subscription": "0xfeed", "result": sell_log(&decoder, 25_001)}
                        });
                        ws.send(Message::Text(note.to_string().into())).await.unwrap();
                    }
                }
            }
        });
        format!("ws://{addr}")
    }

    async fn client() -> EvmLedgerClient {
        let url = spawn_node().await;
        let decoder = AbiDecoder::from_json(ABI).unwrap();
        EvmLedgerClient::connect(&url, "0x00000000000000000000000000000000000000AA", decoder)
    }

    #[tokio::test]
    async fn chain_queries() {
        let client = client().await;
        assert_eq!(client.get_block_number().await.unwrap(), 25_000);
        assert_eq!(client.get_block_timestamp(5_001).await.unwrap(), 1_600_000_000);
        assert_eq!(
            client.get_transaction_receipt("0xdeploy").await.unwrap(),
            Some(TxReceipt { block_number: 5_000 })
        );
        assert_eq!(client.get_transaction_receipt("0xunknown").await.unwrap(), None);
    }

    #[tokio::test]
    async fn query_logs_drops_unknown_selectors() {
        let client = client().await;
        let events = client.query_logs(5_000, 5_100).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "SellEggs");
        assert_eq!(events[0].block_number, 5_001);
    }

    #[tokio::test]
    async fn live_subscription_decodes_events() {
        let client = client().await;
        let mut stream = client.subscribe("SellEggs").await.unwrap();
        assert_eq!(*client.reconnects().borrow(), 1);
        let event = tokio::time::timeout(Duration::from_secs(2), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.block_number, 25_001);
        assert_eq!(event.args[0].name, "_from");

        let err = client.subscribe("BuyEggs").await.unwrap_err();
        assert!(err.is_fatal());
    }
}
