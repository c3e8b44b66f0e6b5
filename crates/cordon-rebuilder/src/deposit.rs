//! Deposit records
//!
//! A deposit record links a deposit's input to its output so a later
//! withdraw or claim can be matched back to the original acquisition and
//! inherit its timestamp.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// One input → output pairing of a swap or deposit.
///
/// Invariants: `remaining_amount <= amount_in` and
/// `remaining_output_amount <= amount_out`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRecord {
    pub sub_account: Address,
    /// Protocol target the deposit went into.
    pub target: Address,
    pub token_in: Address,
    pub amount_in: U256,
    pub token_out: Address,
    pub amount_out: U256,
    /// Input not yet matched by a withdraw.
    pub remaining_amount: U256,
    /// Output (e.g. the receipt token minted at deposit) not yet consumed
    /// back out of its queue.
    pub remaining_output_amount: U256,
    /// Inherited from acquired inputs, or the event timestamp if the deposit
    /// was paid from non-acquired funds.
    pub original_acquisition_timestamp: u64,
}

impl DepositRecord {
    pub fn new(
        sub_account: Address,
        target: Address,
        token_in: Address,
        amount_in: U256,
        token_out: Address,
        amount_out: U256,
        original_acquisition_timestamp: u64,
    ) -> Self {
        Self {
            sub_account,
            target,
            token_in,
            amount_in,
            token_out,
            amount_out,
            remaining_amount: amount_in,
            remaining_output_amount: amount_out,
            original_acquisition_timestamp,
        }
    }

    /// Whether a withdraw/claim of `token` from `target` can match here.
    pub fn matches(&self, target: Address, token: Address) -> bool {
        self.target == target && self.token_in == token && !self.remaining_amount.is_zero()
    }
}
