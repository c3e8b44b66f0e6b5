//! Rebuilt per-sub-account state

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::{AcquiredQueue, DepositRecord};

/// One spend counted toward the rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingRecord {
    pub cost: U256,
    pub timestamp: u64,
}

/// The rebuilder's output for one sub-account at a reference time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubAccountState {
    pub sub_account: Address,
    /// Sum of spending costs inside the rolling window.
    pub total_spending_in_window: U256,
    /// Sum of non-expired queue entries per token.
    pub acquired_balances: HashMap<Address, U256>,
    /// Live deposit records, oldest first.
    pub deposit_records: Vec<DepositRecord>,
    /// The queues themselves, kept for re-entrant updates.
    pub queues: HashMap<Address, AcquiredQueue>,
    /// Individual in-window spends, oldest first.
    pub spending_records: Vec<SpendingRecord>,
}

impl SubAccountState {
    pub fn new(sub_account: Address) -> Self {
        Self {
            sub_account,
            ..Default::default()
        }
    }

    /// Acquired balance for a token after the final pruning pass.
    pub fn acquired_balance(&self, token: &Address) -> U256 {
        self.acquired_balances.get(token).copied().unwrap_or(U256::ZERO)
    }
}
