//! JSON-RPC substrate client

use std::collections::HashMap;
use std::str::FromStr;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use cordon_types::ModuleEvent;

use crate::{IndexerError, LogCodec, ParserRegistry, RawLog, Result, SubstrateClient};

fn rpc_err(message: impl Into<String>) -> IndexerError {
    IndexerError::Rpc {
        message: message.into(),
    }
}

fn parse_hex_u64(value: &str) -> Result<u64> {
    let trimmed = value.trim_start_matches("0x");
    u64::from_str_radix(trimmed, 16).map_err(|e| rpc_err(format!("bad hex quantity {value}: {e}")))
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcBlock {
    hash: String,
    timestamp: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
    block_number: String,
    transaction_hash: String,
    log_index: String,
}

/// Substrate access over JSON-RPC, decoding module logs with [`LogCodec`].
pub struct JsonRpcClient {
    http: reqwest::Client,
    endpoint: String,
    module: Address,
    codec: LogCodec,
}

impl JsonRpcClient {
    pub fn new(endpoint: impl Into<String>, module: Address) -> Self {
        Self::with_parsers(endpoint, module, ParserRegistry::new())
    }

    /// Client whose codec can recover raw-calldata executions through the
    /// given per-target parsers.
    pub fn with_parsers(
        endpoint: impl Into<String>,
        module: Address,
        parsers: ParserRegistry,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            module,
            codec: LogCodec::with_parsers(parsers),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response: RpcResponse = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| rpc_err(e.to_string()))?
            .json()
            .await
            .map_err(|e| rpc_err(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(rpc_err(format!("{} ({})", error.message, error.code)));
        }
        response
            .result
            .ok_or_else(|| rpc_err(format!("{method}: empty result")))
    }

    async fn block_header(&self, height: u64) -> Result<RpcBlock> {
        let result = self
            .call(
                "eth_getBlockByNumber",
                json!([format!("{height:#x}"), false]),
            )
            .await?;
        serde_json::from_value(result).map_err(|e| rpc_err(format!("bad block: {e}")))
    }
}

#[async_trait]
impl SubstrateClient for JsonRpcClient {
    async fn block_number(&self) -> Result<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| rpc_err("eth_blockNumber: not a string"))?;
        parse_hex_u64(hex)
    }

    async fn block_hash(&self, height: u64) -> Result<B256> {
        let header = self.block_header(height).await?;
        B256::from_str(&header.hash).map_err(|e| rpc_err(format!("bad block hash: {e}")))
    }

    async fn module_events(&self, from_block: u64, to_block: u64) -> Result<Vec<ModuleEvent>> {
        let result = self
            .call(
                "eth_getLogs",
                json!([{
                    "fromBlock": format!("{from_block:#x}"),
                    "toBlock": format!("{to_block:#x}"),
                    "address": format!("{:#x}", self.module),
                }]),
            )
            .await?;
        let logs: Vec<RpcLog> =
            serde_json::from_value(result).map_err(|e| rpc_err(format!("bad logs: {e}")))?;

        // Logs carry no timestamp; fetch each distinct header once.
        let mut timestamps: HashMap<u64, u64> = HashMap::new();
        let mut events = Vec::new();
        for log in logs {
            let block_number = parse_hex_u64(&log.block_number)?;
            let timestamp = match timestamps.get(&block_number) {
                Some(ts) => *ts,
                None => {
                    let header = self.block_header(block_number).await?;
                    let ts = parse_hex_u64(&header.timestamp)?;
                    timestamps.insert(block_number, ts);
                    ts
                }
            };

            let raw = RawLog {
                address: Address::from_str(&log.address)
                    .map_err(|e| rpc_err(format!("bad log address: {e}")))?,
                topics: log
                    .topics
                    .iter()
                    .map(|t| B256::from_str(t))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| rpc_err(format!("bad topic: {e}")))?,
                data: hex_decode(&log.data)?,
                block_number,
                tx_hash: B256::from_str(&log.transaction_hash)
                    .map_err(|e| rpc_err(format!("bad tx hash: {e}")))?,
                log_index: parse_hex_u64(&log.log_index)?,
                timestamp,
            };
            if let Some(event) = self.codec.decode(&raw)? {
                events.push(event);
            }
        }
        Ok(events)
    }
}

fn hex_decode(value: &str) -> Result<Vec<u8>> {
    let trimmed = value.trim_start_matches("0x");
    if trimmed.len() % 2 != 0 {
        return Err(rpc_err("odd-length hex data"));
    }
    (0..trimmed.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&trimmed[i..i + 2], 16)
                .map_err(|e| rpc_err(format!("bad hex data: {e}")))
        })
        .collect()
}
