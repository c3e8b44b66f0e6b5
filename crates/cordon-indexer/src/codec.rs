//! Substrate log decoding
//!
//! Decodes raw module logs into domain events for the direct-RPC fallback
//! path. Topic zero selects the event; indexed fields come from topics,
//! everything else from 32-byte words in the data section. Dynamic arrays
//! use the standard head/tail offset encoding.
//!
//! Two execution shapes exist on chain: `ProtocolExecution` carries decoded
//! token arrays, while `ProtocolCallExecuted` carries only the opaque
//! calldata sent to the target. The latter is recovered through the
//! per-target [`ParserRegistry`]; a target nobody registered a parser for
//! fails the decode loudly.

use alloy_primitives::{keccak256, Address, B256, U256};

use cordon_types::{
    AcquiredBalanceUpdated, ChainRef, ModuleEvent, OpType, ProtocolExecution, SafeValueUpdated,
    SpendAuthorized, SpendingAllowanceUpdated, TransferExecuted,
};

use crate::{IndexerError, ParserRegistry, Result};

const WORD: usize = 32;

/// A raw log as served by the substrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    /// Timestamp of the containing block.
    pub timestamp: u64,
}

impl RawLog {
    fn chain(&self) -> ChainRef {
        ChainRef {
            block_number: self.block_number,
            tx_hash: self.tx_hash,
            log_index: self.log_index,
            timestamp: self.timestamp,
        }
    }
}

fn decode_err(message: impl Into<String>) -> IndexerError {
    IndexerError::Decode {
        message: message.into(),
    }
}

fn word(data: &[u8], index: usize) -> Result<[u8; 32]> {
    let start = index * WORD;
    let end = start + WORD;
    if data.len() < end {
        return Err(decode_err(format!(
            "data too short: want word {index}, have {} bytes",
            data.len()
        )));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&data[start..end]);
    Ok(out)
}

fn word_u256(data: &[u8], index: usize) -> Result<U256> {
    Ok(U256::from_be_bytes(word(data, index)?))
}

fn word_usize(data: &[u8], index: usize) -> Result<usize> {
    let value = word_u256(data, index)?;
    usize::try_from(value).map_err(|_| decode_err(format!("word {index} out of usize range")))
}

fn word_address(data: &[u8], index: usize) -> Result<Address> {
    let w = word(data, index)?;
    Ok(Address::from_slice(&w[12..]))
}

fn topic_address(log: &RawLog, index: usize) -> Result<Address> {
    let topic = log
        .topics
        .get(index)
        .ok_or_else(|| decode_err(format!("missing topic {index}")))?;
    Ok(Address::from_slice(&topic.as_slice()[12..]))
}

/// Dynamic array of addresses at the byte offset stored in head word `head`.
fn dynamic_addresses(data: &[u8], head: usize) -> Result<Vec<Address>> {
    let offset = word_usize(data, head)?;
    if offset % WORD != 0 {
        return Err(decode_err("misaligned array offset"));
    }
    let base = offset / WORD;
    let len = word_usize(data, base)?;
    (0..len).map(|i| word_address(data, base + 1 + i)).collect()
}

/// Dynamic array of uint256 at the byte offset stored in head word `head`.
fn dynamic_amounts(data: &[u8], head: usize) -> Result<Vec<U256>> {
    let offset = word_usize(data, head)?;
    if offset % WORD != 0 {
        return Err(decode_err("misaligned array offset"));
    }
    let base = offset / WORD;
    let len = word_usize(data, base)?;
    (0..len).map(|i| word_u256(data, base + 1 + i)).collect()
}

/// Dynamic `bytes` at the byte offset stored in head word `head`.
fn dynamic_bytes(data: &[u8], head: usize) -> Result<Vec<u8>> {
    let offset = word_usize(data, head)?;
    if offset % WORD != 0 {
        return Err(decode_err("misaligned bytes offset"));
    }
    let base = offset / WORD;
    let len = word_usize(data, base)?;
    let start = (base + 1) * WORD;
    let end = start + len;
    if data.len() < end {
        return Err(decode_err(format!(
            "bytes field truncated: want {len} bytes at {start}, have {}",
            data.len()
        )));
    }
    Ok(data[start..end].to_vec())
}

fn op_type_from_u256(value: U256) -> Result<OpType> {
    match u8::try_from(value).map_err(|_| decode_err("opType out of range"))? {
        0 => Ok(OpType::Swap),
        1 => Ok(OpType::Deposit),
        2 => Ok(OpType::Withdraw),
        3 => Ok(OpType::Claim),
        4 => Ok(OpType::Approve),
        other => Err(decode_err(format!("unknown opType {other}"))),
    }
}

/// Decoder for the module's event set.
pub struct LogCodec {
    protocol_execution: B256,
    protocol_call_executed: B256,
    transfer_executed: B256,
    spend_authorized: B256,
    safe_value_updated: B256,
    allowance_updated: B256,
    acquired_balance_updated: B256,
    parsers: ParserRegistry,
}

impl Default for LogCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LogCodec {
    pub fn new() -> Self {
        Self::with_parsers(ParserRegistry::new())
    }

    /// Codec with parsers for targets that emit raw-calldata executions.
    pub fn with_parsers(parsers: ParserRegistry) -> Self {
        Self {
            protocol_execution: keccak256(
                "ProtocolExecution(address,address,uint8,address[],uint256[],address[],uint256[],uint256)",
            ),
            protocol_call_executed: keccak256(
                "ProtocolCallExecuted(address,address,bytes,uint256)",
            ),
            transfer_executed: keccak256(
                "TransferExecuted(address,address,address,uint256,uint256)",
            ),
            spend_authorized: keccak256(
                "SpendAuthorized(address,address,uint256,bytes32,uint8,uint256)",
            ),
            safe_value_updated: keccak256("SafeValueUpdated(uint256,uint256)"),
            allowance_updated: keccak256("SpendingAllowanceUpdated(address,uint256)"),
            acquired_balance_updated: keccak256(
                "AcquiredBalanceUpdated(address,address,uint256)",
            ),
            parsers,
        }
    }

    /// Decode one log. `Ok(None)` means the log is not a module event
    /// (foreign topic zero); decode failures on a recognized topic are
    /// errors, never silently dropped.
    pub fn decode(&self, log: &RawLog) -> Result<Option<ModuleEvent>> {
        let Some(topic0) = log.topics.first() else {
            return Ok(None);
        };
        let event = match *topic0 {
            t if t == self.protocol_execution => {
                ModuleEvent::Protocol(self.decode_protocol_execution(log)?)
            }
            t if t == self.protocol_call_executed => {
                ModuleEvent::Protocol(self.decode_protocol_call(log)?)
            }
            t if t == self.transfer_executed => {
                ModuleEvent::Transfer(self.decode_transfer_executed(log)?)
            }
            t if t == self.spend_authorized => {
                ModuleEvent::Authorization(self.decode_spend_authorized(log)?)
            }
            t if t == self.safe_value_updated => ModuleEvent::SafeValue(SafeValueUpdated {
                total_value_usd: word_u256(&log.data, 0)?,
                update_count: u64::try_from(word_u256(&log.data, 1)?)
                    .map_err(|_| decode_err("updateCount out of range"))?,
                chain: log.chain(),
            }),
            t if t == self.allowance_updated => {
                ModuleEvent::AllowanceUpdated(SpendingAllowanceUpdated {
                    sub_account: topic_address(log, 1)?,
                    new_allowance: word_u256(&log.data, 0)?,
                    chain: log.chain(),
                })
            }
            t if t == self.acquired_balance_updated => {
                ModuleEvent::AcquiredBalance(AcquiredBalanceUpdated {
                    sub_account: topic_address(log, 1)?,
                    token: topic_address(log, 2)?,
                    new_balance: word_u256(&log.data, 0)?,
                    chain: log.chain(),
                })
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    fn decode_protocol_execution(&self, log: &RawLog) -> Result<ProtocolExecution> {
        Ok(ProtocolExecution {
            sub_account: topic_address(log, 1)?,
            target: topic_address(log, 2)?,
            op_type: op_type_from_u256(word_u256(&log.data, 0)?)?,
            tokens_in: dynamic_addresses(&log.data, 1)?,
            amounts_in: dynamic_amounts(&log.data, 2)?,
            tokens_out: dynamic_addresses(&log.data, 3)?,
            amounts_out: dynamic_amounts(&log.data, 4)?,
            spending_cost: word_u256(&log.data, 5)?,
            chain: log.chain(),
        })
    }

    /// Recover token flows from an opaque-calldata execution through the
    /// per-target parser. Output amounts are not present in calldata, so
    /// outputs decode with amount zero and credit nothing downstream.
    fn decode_protocol_call(&self, log: &RawLog) -> Result<ProtocolExecution> {
        let sub_account = topic_address(log, 1)?;
        let target = topic_address(log, 2)?;
        let calldata = dynamic_bytes(&log.data, 0)?;
        let spending_cost = word_u256(&log.data, 1)?;

        let op_type = self.parsers.classify(target, &calldata)?;
        let parser = self.parsers.parser_for(target)?;
        let tokens_in = parser.extract_input_tokens(&calldata)?;
        let amounts_in = parser.extract_input_amounts(&calldata)?;
        let tokens_out = parser.extract_output_tokens(&calldata)?;
        let amounts_out = vec![U256::ZERO; tokens_out.len()];

        Ok(ProtocolExecution {
            sub_account,
            target,
            op_type,
            tokens_in,
            amounts_in,
            tokens_out,
            amounts_out,
            spending_cost,
            chain: log.chain(),
        })
    }

    fn decode_transfer_executed(&self, log: &RawLog) -> Result<TransferExecuted> {
        Ok(TransferExecuted {
            sub_account: topic_address(log, 1)?,
            token: topic_address(log, 2)?,
            recipient: topic_address(log, 3)?,
            amount: word_u256(&log.data, 0)?,
            spending_cost: word_u256(&log.data, 1)?,
            chain: log.chain(),
        })
    }

    fn decode_spend_authorized(&self, log: &RawLog) -> Result<SpendAuthorized> {
        Ok(SpendAuthorized {
            avatar: topic_address(log, 1)?,
            eoa: topic_address(log, 2)?,
            amount: word_u256(&log.data, 0)?,
            recipient_hash: B256::from(word(&log.data, 1)?),
            transfer_type: u8::try_from(word_u256(&log.data, 2)?)
                .map_err(|_| decode_err("transferType out of range"))?,
            nonce: u64::try_from(word_u256(&log.data, 3)?)
                .map_err(|_| decode_err("nonce out of range"))?,
            chain: log.chain(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_word_u256(data: &mut Vec<u8>, value: U256) {
        data.extend_from_slice(&value.to_be_bytes::<32>());
    }

    fn push_word_address(data: &mut Vec<u8>, value: Address) {
        let mut w = [0u8; 32];
        w[12..].copy_from_slice(value.as_slice());
        data.extend_from_slice(&w);
    }

    fn topic_of(addr: Address) -> B256 {
        let mut w = [0u8; 32];
        w[12..].copy_from_slice(addr.as_slice());
        B256::from(w)
    }

    fn log(topics: Vec<B256>, data: Vec<u8>) -> RawLog {
        RawLog {
            address: Address::repeat_byte(0xee),
            topics,
            data,
            block_number: 100,
            tx_hash: B256::repeat_byte(1),
            log_index: 3,
            timestamp: 9_000,
        }
    }

    #[test]
    fn decodes_transfer_executed() {
        let codec = LogCodec::new();
        let mut data = Vec::new();
        push_word_u256(&mut data, U256::from(77u64));
        push_word_u256(&mut data, U256::from(5u64));

        let raw = log(
            vec![
                codec.transfer_executed,
                topic_of(Address::repeat_byte(0xaa)),
                topic_of(Address::repeat_byte(1)),
                topic_of(Address::repeat_byte(2)),
            ],
            data,
        );
        let event = codec.decode(&raw).unwrap().unwrap();
        let ModuleEvent::Transfer(e) = event else {
            panic!("wrong variant");
        };
        assert_eq!(e.sub_account, Address::repeat_byte(0xaa));
        assert_eq!(e.amount, U256::from(77u64));
        assert_eq!(e.spending_cost, U256::from(5u64));
        assert_eq!(e.chain.timestamp, 9_000);
    }

    #[test]
    fn decodes_protocol_execution_with_dynamic_arrays() {
        let codec = LogCodec::new();
        let token_in = Address::repeat_byte(1);
        let token_out = Address::repeat_byte(2);

        // Head: opType, four offsets, spendingCost. Tail: the four arrays.
        let mut data = Vec::new();
        push_word_u256(&mut data, U256::from(0u64)); // Swap
        push_word_u256(&mut data, U256::from(6 * 32u64)); // tokensIn
        push_word_u256(&mut data, U256::from(8 * 32u64)); // amountsIn
        push_word_u256(&mut data, U256::from(10 * 32u64)); // tokensOut
        push_word_u256(&mut data, U256::from(12 * 32u64)); // amountsOut
        push_word_u256(&mut data, U256::from(42u64)); // spendingCost
        push_word_u256(&mut data, U256::from(1u64));
        push_word_address(&mut data, token_in);
        push_word_u256(&mut data, U256::from(1u64));
        push_word_u256(&mut data, U256::from(100u64));
        push_word_u256(&mut data, U256::from(1u64));
        push_word_address(&mut data, token_out);
        push_word_u256(&mut data, U256::from(1u64));
        push_word_u256(&mut data, U256::from(40u64));

        let raw = log(
            vec![
                codec.protocol_execution,
                topic_of(Address::repeat_byte(0xaa)),
                topic_of(Address::repeat_byte(0xfe)),
            ],
            data,
        );
        let event = codec.decode(&raw).unwrap().unwrap();
        let ModuleEvent::Protocol(e) = event else {
            panic!("wrong variant");
        };
        assert_eq!(e.op_type, OpType::Swap);
        assert_eq!(e.tokens_in, vec![token_in]);
        assert_eq!(e.amounts_in, vec![U256::from(100u64)]);
        assert_eq!(e.tokens_out, vec![token_out]);
        assert_eq!(e.amounts_out, vec![U256::from(40u64)]);
        assert_eq!(e.spending_cost, U256::from(42u64));
    }

    #[test]
    fn foreign_logs_are_skipped_not_erred() {
        let codec = LogCodec::new();
        let raw = log(vec![B256::repeat_byte(0x99)], vec![]);
        assert_eq!(codec.decode(&raw).unwrap(), None);
    }

    #[test]
    fn truncated_data_on_recognized_topic_fails_loudly() {
        let codec = LogCodec::new();
        let raw = log(
            vec![
                codec.transfer_executed,
                topic_of(Address::repeat_byte(0xaa)),
                topic_of(Address::repeat_byte(1)),
                topic_of(Address::repeat_byte(2)),
            ],
            vec![0u8; 16],
        );
        assert!(matches!(
            codec.decode(&raw),
            Err(IndexerError::Decode { .. })
        ));
    }

    #[test]
    fn decodes_protocol_call_through_registered_parser() {
        use crate::LendingPoolParser;
        use std::collections::HashMap;
        use std::sync::Arc;

        let pool = Address::repeat_byte(0xf0);
        let usdc = Address::repeat_byte(0x01);
        let a_usdc = Address::repeat_byte(0x02);

        let mut registry = ParserRegistry::new();
        registry.register(
            pool,
            Arc::new(LendingPoolParser::new(HashMap::from([(usdc, a_usdc)]))),
        );
        let codec = LogCodec::with_parsers(registry);

        // supply(usdc, 100, onBehalfOf)
        let mut calldata = {
            let hash = keccak256("supply(address,uint256,address)".as_bytes());
            hash[..4].to_vec()
        };
        push_word_address(&mut calldata, usdc);
        push_word_u256(&mut calldata, U256::from(100u64));
        push_word_address(&mut calldata, Address::repeat_byte(0xaa));

        // Head: bytes offset, spendingCost. Tail: len + padded calldata.
        let mut data = Vec::new();
        push_word_u256(&mut data, U256::from(64u64));
        push_word_u256(&mut data, U256::from(42u64));
        push_word_u256(&mut data, U256::from(calldata.len() as u64));
        data.extend_from_slice(&calldata);
        data.resize(data.len().div_ceil(32) * 32, 0);

        let raw = log(
            vec![
                codec.protocol_call_executed,
                topic_of(Address::repeat_byte(0xaa)),
                topic_of(pool),
            ],
            data,
        );
        let event = codec.decode(&raw).unwrap().unwrap();
        let ModuleEvent::Protocol(e) = event else {
            panic!("wrong variant");
        };
        assert_eq!(e.op_type, OpType::Deposit);
        assert_eq!(e.tokens_in, vec![usdc]);
        assert_eq!(e.amounts_in, vec![U256::from(100u64)]);
        assert_eq!(e.tokens_out, vec![a_usdc]);
        assert_eq!(e.amounts_out, vec![U256::ZERO]);
        assert_eq!(e.spending_cost, U256::from(42u64));
    }

    #[test]
    fn protocol_call_for_unregistered_target_fails_loudly() {
        let codec = LogCodec::new();

        let mut data = Vec::new();
        push_word_u256(&mut data, U256::from(64u64));
        push_word_u256(&mut data, U256::ZERO);
        push_word_u256(&mut data, U256::from(4u64));
        data.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        data.resize(data.len().div_ceil(32) * 32, 0);

        let raw = log(
            vec![
                codec.protocol_call_executed,
                topic_of(Address::repeat_byte(0xaa)),
                topic_of(Address::repeat_byte(0x77)),
            ],
            data,
        );
        assert!(matches!(
            codec.decode(&raw),
            Err(IndexerError::Decode { .. })
        ));
    }

    #[test]
    fn decodes_spend_authorized() {
        let codec = LogCodec::new();
        let mut data = Vec::new();
        push_word_u256(&mut data, U256::from(1_000u64));
        data.extend_from_slice(B256::repeat_byte(0x44).as_slice());
        push_word_u256(&mut data, U256::from(2u64));
        push_word_u256(&mut data, U256::from(9u64));

        let raw = log(
            vec![
                codec.spend_authorized,
                topic_of(Address::repeat_byte(0x0a)),
                topic_of(Address::repeat_byte(0x0b)),
            ],
            data,
        );
        let event = codec.decode(&raw).unwrap().unwrap();
        let ModuleEvent::Authorization(e) = event else {
            panic!("wrong variant");
        };
        assert_eq!(e.recipient_hash, B256::repeat_byte(0x44));
        assert_eq!(e.transfer_type, 2);
        assert_eq!(e.nonce, 9);
    }
}
