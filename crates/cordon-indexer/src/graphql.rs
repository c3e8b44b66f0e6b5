//! GraphQL indexer client
//!
//! The indexer serves fully decoded module events; this client issues the
//! range query and maps the JSON rows into domain events. A row that fails
//! to decode fails the whole query loudly — a half-read range must not be
//! marked processed.

use std::str::FromStr;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use serde_json::json;

use cordon_types::{
    AcquiredBalanceUpdated, ChainRef, ModuleEvent, OpType, ProtocolExecution, SafeValueUpdated,
    SpendAuthorized, SpendingAllowanceUpdated, TransferExecuted,
};

use crate::{IndexerError, Result};

const MODULE_EVENTS_QUERY: &str = r#"
query ModuleEvents($fromBlock: Int!, $toBlock: Int!) {
  moduleEvents(
    where: { blockNumber_gte: $fromBlock, blockNumber_lte: $toBlock }
    orderBy: [timestamp_ASC, blockNumber_ASC, logIndex_ASC]
  ) {
    kind
    subAccount
    target
    opType
    tokensIn
    amountsIn
    tokensOut
    amountsOut
    spendingCost
    token
    recipient
    amount
    avatar
    eoa
    recipientHash
    transferType
    nonce
    totalValueUsd
    updateCount
    newAllowance
    newBalance
    blockNumber
    txHash
    logIndex
    timestamp
  }
}
"#;

#[derive(Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: serde_json::Value,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<ModuleEventsData>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
struct ModuleEventsData {
    #[serde(rename = "moduleEvents")]
    module_events: Vec<IndexedEventRow>,
}

/// One row as the indexer serves it; unused columns stay `None` per kind.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexedEventRow {
    kind: String,
    sub_account: Option<String>,
    target: Option<String>,
    op_type: Option<String>,
    tokens_in: Option<Vec<String>>,
    amounts_in: Option<Vec<String>>,
    tokens_out: Option<Vec<String>>,
    amounts_out: Option<Vec<String>>,
    spending_cost: Option<String>,
    token: Option<String>,
    recipient: Option<String>,
    amount: Option<String>,
    avatar: Option<String>,
    eoa: Option<String>,
    recipient_hash: Option<String>,
    transfer_type: Option<u8>,
    nonce: Option<u64>,
    total_value_usd: Option<String>,
    update_count: Option<u64>,
    new_allowance: Option<String>,
    new_balance: Option<String>,
    block_number: u64,
    tx_hash: String,
    log_index: u64,
    timestamp: u64,
}

fn decode_err(message: impl Into<String>) -> IndexerError {
    IndexerError::Decode {
        message: message.into(),
    }
}

fn parse_address(field: &str, value: Option<&String>) -> Result<Address> {
    let value = value.ok_or_else(|| decode_err(format!("missing field {field}")))?;
    Address::from_str(value).map_err(|e| decode_err(format!("{field}: {e}")))
}

fn parse_hash(field: &str, value: Option<&String>) -> Result<B256> {
    let value = value.ok_or_else(|| decode_err(format!("missing field {field}")))?;
    B256::from_str(value).map_err(|e| decode_err(format!("{field}: {e}")))
}

fn parse_amount(field: &str, value: Option<&String>) -> Result<U256> {
    let value = value.ok_or_else(|| decode_err(format!("missing field {field}")))?;
    U256::from_str(value).map_err(|e| decode_err(format!("{field}: {e}")))
}

fn parse_address_list(field: &str, values: Option<&Vec<String>>) -> Result<Vec<Address>> {
    values
        .map(|v| v.iter().map(|s| Address::from_str(s)).collect())
        .unwrap_or(Ok(Vec::new()))
        .map_err(|e| decode_err(format!("{field}: {e}")))
}

fn parse_amount_list(field: &str, values: Option<&Vec<String>>) -> Result<Vec<U256>> {
    values
        .map(|v| v.iter().map(|s| U256::from_str(s)).collect())
        .unwrap_or(Ok(Vec::new()))
        .map_err(|e| decode_err(format!("{field}: {e}")))
}

fn parse_op_type(value: Option<&String>) -> Result<OpType> {
    match value.map(String::as_str) {
        Some("SWAP") => Ok(OpType::Swap),
        Some("DEPOSIT") => Ok(OpType::Deposit),
        Some("WITHDRAW") => Ok(OpType::Withdraw),
        Some("CLAIM") => Ok(OpType::Claim),
        Some("APPROVE") => Ok(OpType::Approve),
        other => Err(decode_err(format!("unknown opType {other:?}"))),
    }
}

impl IndexedEventRow {
    fn chain(&self) -> Result<ChainRef> {
        Ok(ChainRef {
            block_number: self.block_number,
            tx_hash: B256::from_str(&self.tx_hash)
                .map_err(|e| decode_err(format!("txHash: {e}")))?,
            log_index: self.log_index,
            timestamp: self.timestamp,
        })
    }

    fn into_event(self) -> Result<ModuleEvent> {
        let chain = self.chain()?;
        match self.kind.as_str() {
            "PROTOCOL_EXECUTION" => Ok(ModuleEvent::Protocol(ProtocolExecution {
                sub_account: parse_address("subAccount", self.sub_account.as_ref())?,
                target: parse_address("target", self.target.as_ref())?,
                op_type: parse_op_type(self.op_type.as_ref())?,
                tokens_in: parse_address_list("tokensIn", self.tokens_in.as_ref())?,
                amounts_in: parse_amount_list("amountsIn", self.amounts_in.as_ref())?,
                tokens_out: parse_address_list("tokensOut", self.tokens_out.as_ref())?,
                amounts_out: parse_amount_list("amountsOut", self.amounts_out.as_ref())?,
                spending_cost: parse_amount("spendingCost", self.spending_cost.as_ref())?,
                chain,
            })),
            "TRANSFER_EXECUTED" => Ok(ModuleEvent::Transfer(TransferExecuted {
                sub_account: parse_address("subAccount", self.sub_account.as_ref())?,
                token: parse_address("token", self.token.as_ref())?,
                recipient: parse_address("recipient", self.recipient.as_ref())?,
                amount: parse_amount("amount", self.amount.as_ref())?,
                spending_cost: parse_amount("spendingCost", self.spending_cost.as_ref())?,
                chain,
            })),
            "SPEND_AUTHORIZED" => Ok(ModuleEvent::Authorization(SpendAuthorized {
                avatar: parse_address("avatar", self.avatar.as_ref())?,
                eoa: parse_address("eoa", self.eoa.as_ref())?,
                amount: parse_amount("amount", self.amount.as_ref())?,
                recipient_hash: parse_hash("recipientHash", self.recipient_hash.as_ref())?,
                transfer_type: self
                    .transfer_type
                    .ok_or_else(|| decode_err("missing field transferType"))?,
                nonce: self.nonce.ok_or_else(|| decode_err("missing field nonce"))?,
                chain,
            })),
            "SAFE_VALUE_UPDATED" => Ok(ModuleEvent::SafeValue(SafeValueUpdated {
                total_value_usd: parse_amount("totalValueUsd", self.total_value_usd.as_ref())?,
                update_count: self
                    .update_count
                    .ok_or_else(|| decode_err("missing field updateCount"))?,
                chain,
            })),
            "SPENDING_ALLOWANCE_UPDATED" => {
                Ok(ModuleEvent::AllowanceUpdated(SpendingAllowanceUpdated {
                    sub_account: parse_address("subAccount", self.sub_account.as_ref())?,
                    new_allowance: parse_amount("newAllowance", self.new_allowance.as_ref())?,
                    chain,
                }))
            }
            "ACQUIRED_BALANCE_UPDATED" => {
                Ok(ModuleEvent::AcquiredBalance(AcquiredBalanceUpdated {
                    sub_account: parse_address("subAccount", self.sub_account.as_ref())?,
                    token: parse_address("token", self.token.as_ref())?,
                    new_balance: parse_amount("newBalance", self.new_balance.as_ref())?,
                    chain,
                }))
            }
            other => Err(decode_err(format!("unknown event kind {other}"))),
        }
    }
}

/// Client for the GraphQL indexer.
#[derive(Clone)]
pub struct IndexerClient {
    http: reqwest::Client,
    endpoint: String,
}

impl IndexerClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Fetch decoded events for a block range, inclusive on both ends.
    pub async fn module_events(&self, from_block: u64, to_block: u64) -> Result<Vec<ModuleEvent>> {
        let request = GraphQlRequest {
            query: MODULE_EVENTS_QUERY,
            variables: json!({ "fromBlock": from_block, "toBlock": to_block }),
        };
        let response: GraphQlResponse = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| IndexerError::Indexer {
                message: e.to_string(),
            })?
            .json()
            .await
            .map_err(|e| IndexerError::Indexer {
                message: e.to_string(),
            })?;

        if let Some(errors) = response.errors {
            let message = errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(IndexerError::Indexer { message });
        }

        let data = response.data.ok_or_else(|| IndexerError::Indexer {
            message: "empty response".to_string(),
        })?;
        data.module_events
            .into_iter()
            .map(IndexedEventRow::into_event)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_row(kind: &str) -> IndexedEventRow {
        IndexedEventRow {
            kind: kind.to_string(),
            sub_account: Some(format!("{:#x}", Address::repeat_byte(0xaa))),
            target: Some(format!("{:#x}", Address::repeat_byte(0xfe))),
            op_type: Some("SWAP".to_string()),
            tokens_in: Some(vec![format!("{:#x}", Address::repeat_byte(1))]),
            amounts_in: Some(vec!["100".to_string()]),
            tokens_out: Some(vec![format!("{:#x}", Address::repeat_byte(2))]),
            amounts_out: Some(vec!["40".to_string()]),
            spending_cost: Some("5".to_string()),
            token: Some(format!("{:#x}", Address::repeat_byte(1))),
            recipient: Some(format!("{:#x}", Address::repeat_byte(9))),
            amount: Some("77".to_string()),
            avatar: Some(format!("{:#x}", Address::repeat_byte(3))),
            eoa: Some(format!("{:#x}", Address::repeat_byte(4))),
            recipient_hash: Some(format!("{:#x}", B256::repeat_byte(5))),
            transfer_type: Some(0),
            nonce: Some(7),
            total_value_usd: Some("1000".to_string()),
            update_count: Some(3),
            new_allowance: Some("900".to_string()),
            new_balance: Some("800".to_string()),
            block_number: 1_234,
            tx_hash: format!("{:#x}", B256::repeat_byte(6)),
            log_index: 2,
            timestamp: 99_000,
        }
    }

    #[test]
    fn decodes_protocol_execution_row() {
        let event = base_row("PROTOCOL_EXECUTION").into_event().unwrap();
        let ModuleEvent::Protocol(e) = event else {
            panic!("wrong variant");
        };
        assert_eq!(e.op_type, OpType::Swap);
        assert_eq!(e.amounts_in, vec![U256::from(100u64)]);
        assert_eq!(e.chain.block_number, 1_234);
        assert_eq!(e.chain.log_index, 2);
    }

    #[test]
    fn decodes_authorization_row() {
        let event = base_row("SPEND_AUTHORIZED").into_event().unwrap();
        let ModuleEvent::Authorization(e) = event else {
            panic!("wrong variant");
        };
        assert_eq!(e.nonce, 7);
        assert_eq!(e.transfer_type, 0);
    }

    #[test]
    fn unknown_kind_fails_loudly() {
        let result = base_row("MYSTERY").into_event();
        assert!(matches!(result, Err(IndexerError::Decode { .. })));
    }

    #[test]
    fn missing_field_fails_loudly() {
        let mut row = base_row("TRANSFER_EXECUTED");
        row.amount = None;
        assert!(matches!(row.into_event(), Err(IndexerError::Decode { .. })));
    }

    #[test]
    fn malformed_address_fails_loudly() {
        let mut row = base_row("PROTOCOL_EXECUTION");
        row.sub_account = Some("0xnope".to_string());
        assert!(matches!(row.into_event(), Err(IndexerError::Decode { .. })));
    }
}
