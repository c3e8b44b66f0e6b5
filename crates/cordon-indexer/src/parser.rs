//! Per-target calldata parsing
//!
//! Protocol interactions arrive as opaque calldata against a target
//! contract. Each supported target registers a parser that classifies the
//! selector and extracts token flows; an unknown target or selector fails
//! loudly rather than being silently classified.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, U256};

use cordon_types::OpType;

use crate::{IndexerError, Result};

const WORD: usize = 32;
const SELECTOR_LEN: usize = 4;

fn parse_err(message: impl Into<String>) -> IndexerError {
    IndexerError::Decode {
        message: message.into(),
    }
}

/// Extracts operation semantics from one protocol's calldata.
pub trait CalldataParser: Send + Sync {
    fn supports_selector(&self, selector: [u8; 4]) -> bool;

    fn operation_type(&self, selector: [u8; 4]) -> Result<OpType>;

    fn extract_input_tokens(&self, calldata: &[u8]) -> Result<Vec<Address>>;

    fn extract_input_amounts(&self, calldata: &[u8]) -> Result<Vec<U256>>;

    fn extract_output_tokens(&self, calldata: &[u8]) -> Result<Vec<Address>>;

    fn extract_recipient(&self, calldata: &[u8]) -> Result<Address>;
}

/// Dispatches calldata to the parser registered for its target.
#[derive(Default, Clone)]
pub struct ParserRegistry {
    parsers: HashMap<Address, Arc<dyn CalldataParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, target: Address, parser: Arc<dyn CalldataParser>) {
        self.parsers.insert(target, parser);
    }

    pub fn parser_for(&self, target: Address) -> Result<Arc<dyn CalldataParser>> {
        self.parsers
            .get(&target)
            .cloned()
            .ok_or_else(|| parse_err(format!("no parser registered for target {target:#x}")))
    }

    /// Classify a call. Fails on an unregistered target or a selector the
    /// target's parser does not support.
    pub fn classify(&self, target: Address, calldata: &[u8]) -> Result<OpType> {
        let parser = self.parser_for(target)?;
        let selector = selector_of(calldata)?;
        if !parser.supports_selector(selector) {
            return Err(parse_err(format!(
                "unsupported selector {:02x}{:02x}{:02x}{:02x} for target {target:#x}",
                selector[0], selector[1], selector[2], selector[3]
            )));
        }
        parser.operation_type(selector)
    }
}

pub fn selector_of(calldata: &[u8]) -> Result<[u8; 4]> {
    if calldata.len() < SELECTOR_LEN {
        return Err(parse_err("calldata shorter than a selector"));
    }
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&calldata[..SELECTOR_LEN]);
    Ok(selector)
}

fn arg_word(calldata: &[u8], index: usize) -> Result<[u8; 32]> {
    let start = SELECTOR_LEN + index * WORD;
    let end = start + WORD;
    if calldata.len() < end {
        return Err(parse_err(format!(
            "calldata too short for argument {index}"
        )));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&calldata[start..end]);
    Ok(out)
}

fn arg_address(calldata: &[u8], index: usize) -> Result<Address> {
    let w = arg_word(calldata, index)?;
    Ok(Address::from_slice(&w[12..]))
}

fn arg_u256(calldata: &[u8], index: usize) -> Result<U256> {
    Ok(U256::from_be_bytes(arg_word(calldata, index)?))
}

/// Parser for lending-pool style targets:
/// `supply(address asset, uint256 amount, address onBehalfOf)` /
/// `withdraw(address asset, uint256 amount, address to)` /
/// `claimRewards(address to)`.
pub struct LendingPoolParser {
    supply: [u8; 4],
    withdraw: [u8; 4],
    claim: [u8; 4],
    /// Receipt token minted per supplied asset.
    receipt_tokens: HashMap<Address, Address>,
}

impl LendingPoolParser {
    pub fn new(receipt_tokens: HashMap<Address, Address>) -> Self {
        Self {
            supply: selector("supply(address,uint256,address)"),
            withdraw: selector("withdraw(address,uint256,address)"),
            claim: selector("claimRewards(address)"),
            receipt_tokens,
        }
    }
}

fn selector(signature: &str) -> [u8; 4] {
    let hash = alloy_primitives::keccak256(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..SELECTOR_LEN]);
    out
}

impl CalldataParser for LendingPoolParser {
    fn supports_selector(&self, selector: [u8; 4]) -> bool {
        selector == self.supply || selector == self.withdraw || selector == self.claim
    }

    fn operation_type(&self, sel: [u8; 4]) -> Result<OpType> {
        if sel == self.supply {
            Ok(OpType::Deposit)
        } else if sel == self.withdraw {
            Ok(OpType::Withdraw)
        } else if sel == self.claim {
            Ok(OpType::Claim)
        } else {
            Err(parse_err("unsupported selector"))
        }
    }

    fn extract_input_tokens(&self, calldata: &[u8]) -> Result<Vec<Address>> {
        let sel = selector_of(calldata)?;
        if sel == self.supply {
            Ok(vec![arg_address(calldata, 0)?])
        } else {
            Ok(vec![])
        }
    }

    fn extract_input_amounts(&self, calldata: &[u8]) -> Result<Vec<U256>> {
        let sel = selector_of(calldata)?;
        if sel == self.supply {
            Ok(vec![arg_u256(calldata, 1)?])
        } else {
            Ok(vec![])
        }
    }

    fn extract_output_tokens(&self, calldata: &[u8]) -> Result<Vec<Address>> {
        let sel = selector_of(calldata)?;
        if sel == self.supply {
            let asset = arg_address(calldata, 0)?;
            let receipt = self
                .receipt_tokens
                .get(&asset)
                .copied()
                .ok_or_else(|| parse_err(format!("no receipt token for asset {asset:#x}")))?;
            Ok(vec![receipt])
        } else if sel == self.withdraw {
            Ok(vec![arg_address(calldata, 0)?])
        } else {
            Ok(vec![])
        }
    }

    fn extract_recipient(&self, calldata: &[u8]) -> Result<Address> {
        let sel = selector_of(calldata)?;
        if sel == self.supply || sel == self.withdraw {
            arg_address(calldata, 2)
        } else if sel == self.claim {
            arg_address(calldata, 0)
        } else {
            Err(parse_err("unsupported selector"))
        }
    }
}
