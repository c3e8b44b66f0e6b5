//! Events consumed from the enforcement substrate
//!
//! Every event carries its chain coordinates; `(tx_hash, log_index)` is the
//! idempotence key across the whole pipeline.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::{CordonTypeError, Result};

/// Where an event landed on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainRef {
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    /// Block timestamp, Unix seconds.
    pub timestamp: u64,
}

impl ChainRef {
    /// Chronological ordering key: `(timestamp, block_number, log_index)`.
    pub fn ordering_key(&self) -> (u64, u64, u64) {
        (self.timestamp, self.block_number, self.log_index)
    }
}

/// Operation class of a protocol execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    Swap,
    Deposit,
    Withdraw,
    Claim,
    /// Guard-only; affects neither queues nor spending.
    Approve,
}

/// A protocol execution observed on the DeFi interactor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolExecution {
    pub sub_account: Address,
    /// Protocol target contract.
    pub target: Address,
    pub op_type: OpType,
    pub tokens_in: Vec<Address>,
    pub amounts_in: Vec<U256>,
    pub tokens_out: Vec<Address>,
    pub amounts_out: Vec<U256>,
    /// USD cost counted against the spending allowance, 18-decimal fixed point.
    pub spending_cost: U256,
    pub chain: ChainRef,
}

impl ProtocolExecution {
    /// Reject events whose parallel arrays are out of step.
    ///
    /// Such an event must never be silently ingested; callers log and skip.
    pub fn validate(&self) -> Result<()> {
        if self.tokens_in.len() != self.amounts_in.len() {
            return Err(CordonTypeError::LengthMismatch {
                context: "tokens_in/amounts_in",
                left: self.tokens_in.len(),
                right: self.amounts_in.len(),
            });
        }
        if self.tokens_out.len() != self.amounts_out.len() {
            return Err(CordonTypeError::LengthMismatch {
                context: "tokens_out/amounts_out",
                left: self.tokens_out.len(),
                right: self.amounts_out.len(),
            });
        }
        Ok(())
    }
}

/// A direct token transfer executed by a sub-account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferExecuted {
    pub sub_account: Address,
    pub token: Address,
    pub recipient: Address,
    pub amount: U256,
    /// USD cost counted against the spending allowance, 18-decimal fixed point.
    pub spending_cost: U256,
    pub chain: ChainRef,
}

/// Portfolio safe value refreshed on the substrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeValueUpdated {
    pub total_value_usd: U256,
    pub update_count: u64,
    pub chain: ChainRef,
}

/// Spending allowance pushed for a sub-account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingAllowanceUpdated {
    pub sub_account: Address,
    pub new_allowance: U256,
    pub chain: ChainRef,
}

/// Acquired balance pushed for a `(sub-account, token)` slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquiredBalanceUpdated {
    pub sub_account: Address,
    pub token: Address,
    pub new_balance: U256,
    pub chain: ChainRef,
}

/// A spend authorization observed on the enforcement substrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendAuthorized {
    pub avatar: Address,
    pub eoa: Address,
    pub amount: U256,
    pub recipient_hash: B256,
    pub transfer_type: u8,
    pub nonce: u64,
    pub chain: ChainRef,
}

/// Any event the core ingests, merged into one chronological stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ModuleEvent {
    Protocol(ProtocolExecution),
    Transfer(TransferExecuted),
    Authorization(SpendAuthorized),
    SafeValue(SafeValueUpdated),
    AllowanceUpdated(SpendingAllowanceUpdated),
    AcquiredBalance(AcquiredBalanceUpdated),
}

impl ModuleEvent {
    pub fn chain(&self) -> &ChainRef {
        match self {
            ModuleEvent::Protocol(e) => &e.chain,
            ModuleEvent::Transfer(e) => &e.chain,
            ModuleEvent::Authorization(e) => &e.chain,
            ModuleEvent::SafeValue(e) => &e.chain,
            ModuleEvent::AllowanceUpdated(e) => &e.chain,
            ModuleEvent::AcquiredBalance(e) => &e.chain,
        }
    }

    /// Sub-account the event belongs to, if it is account-scoped.
    pub fn sub_account(&self) -> Option<Address> {
        match self {
            ModuleEvent::Protocol(e) => Some(e.sub_account),
            ModuleEvent::Transfer(e) => Some(e.sub_account),
            ModuleEvent::Authorization(e) => Some(e.eoa),
            ModuleEvent::SafeValue(_) => None,
            ModuleEvent::AllowanceUpdated(e) => Some(e.sub_account),
            ModuleEvent::AcquiredBalance(e) => Some(e.sub_account),
        }
    }

    /// Idempotence key for the ledger store.
    pub fn event_key(&self) -> (B256, u64) {
        let chain = self.chain();
        (chain.tx_hash, chain.log_index)
    }
}

/// Sort a batch of events into canonical chronological order.
pub fn sort_chronologically(events: &mut [ModuleEvent]) {
    events.sort_by_key(|e| e.chain().ordering_key());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_ref(timestamp: u64, block_number: u64, log_index: u64) -> ChainRef {
        ChainRef {
            block_number,
            tx_hash: B256::repeat_byte(1),
            log_index,
            timestamp,
        }
    }

    fn transfer_at(timestamp: u64, block_number: u64, log_index: u64) -> ModuleEvent {
        ModuleEvent::Transfer(TransferExecuted {
            sub_account: Address::repeat_byte(1),
            token: Address::repeat_byte(2),
            recipient: Address::repeat_byte(3),
            amount: U256::from(1u64),
            spending_cost: U256::ZERO,
            chain: chain_ref(timestamp, block_number, log_index),
        })
    }

    #[test]
    fn chronological_ordering_breaks_ties_in_order() {
        let mut events = vec![
            transfer_at(100, 5, 2),
            transfer_at(100, 5, 1),
            transfer_at(100, 4, 9),
            transfer_at(99, 6, 0),
        ];
        sort_chronologically(&mut events);
        let keys: Vec<_> = events.iter().map(|e| e.chain().ordering_key()).collect();
        assert_eq!(keys, vec![(99, 6, 0), (100, 4, 9), (100, 5, 1), (100, 5, 2)]);
    }

    #[test]
    fn validate_rejects_ragged_arrays() {
        let event = ProtocolExecution {
            sub_account: Address::repeat_byte(1),
            target: Address::repeat_byte(2),
            op_type: OpType::Swap,
            tokens_in: vec![Address::repeat_byte(3)],
            amounts_in: vec![],
            tokens_out: vec![],
            amounts_out: vec![],
            spending_cost: U256::ZERO,
            chain: chain_ref(1, 1, 0),
        };
        assert!(matches!(
            event.validate(),
            Err(CordonTypeError::LengthMismatch { .. })
        ));
    }
}
