//! Allowance computation and update policy

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cordon_types::{CoreConfig, BPS_DENOMINATOR};

use crate::{AllowanceError, Result};

/// The substrate's current view of one sub-account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnChainAccountState {
    pub allowance: U256,
    pub acquired_balances: HashMap<Address, U256>,
}

/// Portfolio safe value with its refresh time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafeValue {
    pub total_value_usd: U256,
    pub updated_at: u64,
}

/// Read access to the substrate state the planner compares against.
#[async_trait]
pub trait StateReader: Send + Sync {
    async fn safe_value(&self) -> Result<SafeValue>;

    async fn account_state(&self, sub_account: Address) -> Result<OnChainAccountState>;
}

/// One batched update ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowancePlan {
    pub module: Address,
    pub sub_account: Address,
    pub new_allowance: U256,
    pub tokens: Vec<Address>,
    pub balances: Vec<U256>,
}

/// Why a sub-account is being updated this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateReason {
    /// Some acquired-balance slot differs from the substrate.
    BalanceDrift,
    /// Any decrease is pushed immediately.
    AllowanceDecrease,
    /// Increase past the threshold (or from zero).
    SignificantIncrease,
    /// Unchanged but older than the staleness bound.
    Staleness,
}

/// Computes allowances and decides which updates are worth a transaction.
#[derive(Debug, Clone)]
pub struct AllowanceCalculator {
    config: CoreConfig,
}

impl AllowanceCalculator {
    pub fn new(config: CoreConfig) -> Self {
        Self { config }
    }

    /// Reject a safe value older than the configured bound.
    pub fn check_safe_value_freshness(&self, updated_at: u64, now: u64) -> Result<()> {
        let age = now.saturating_sub(updated_at);
        if age > self.config.max_safe_value_age_seconds {
            return Err(AllowanceError::StalePortfolioValue {
                age_seconds: age,
                max_age_seconds: self.config.max_safe_value_age_seconds,
            });
        }
        Ok(())
    }

    /// Hard ceiling: no allowance may exceed
    /// `safe_value × absolute_max_spending_bps / 10 000`.
    pub fn check_ceiling(&self, requested: U256, safe_value_usd: U256) -> Result<()> {
        let maximum = safe_value_usd * U256::from(self.config.absolute_max_spending_bps)
            / U256::from(BPS_DENOMINATOR);
        if requested > maximum {
            return Err(AllowanceError::ExceedsAbsoluteMaxSpending { requested, maximum });
        }
        Ok(())
    }

    /// `max(safe_value × max_bps / 10 000 − spending, 0)`, ceiling-checked.
    pub fn compute_allowance(
        &self,
        safe_value_usd: U256,
        max_spending_bps: u64,
        total_spending_in_window: U256,
    ) -> Result<U256> {
        let budget =
            safe_value_usd * U256::from(max_spending_bps) / U256::from(BPS_DENOMINATOR);
        let allowance = budget.saturating_sub(total_spending_in_window);
        self.check_ceiling(allowance, safe_value_usd)?;
        Ok(allowance)
    }

    /// Guard a proposed protocol spending cost against the live allowance.
    ///
    /// This mirrors the substrate's own check so a doomed execution can be
    /// rejected before it is ever submitted.
    pub fn check_spending_cost(&self, cost: U256, allowance: U256) -> Result<()> {
        if cost > allowance {
            return Err(AllowanceError::ExceedsSpendingLimit { cost, allowance });
        }
        Ok(())
    }

    /// Apply the update policy. `None` means the update is skipped.
    pub fn decide_update(
        &self,
        new_allowance: U256,
        rebuilt_balances: &HashMap<Address, U256>,
        on_chain: &OnChainAccountState,
        last_update_at: Option<u64>,
        now: u64,
    ) -> Option<UpdateReason> {
        if self.balances_drifted(rebuilt_balances, on_chain) {
            return Some(UpdateReason::BalanceDrift);
        }
        if new_allowance < on_chain.allowance {
            return Some(UpdateReason::AllowanceDecrease);
        }
        if new_allowance > on_chain.allowance {
            if on_chain.allowance.is_zero() {
                return Some(UpdateReason::SignificantIncrease);
            }
            let increase_bps = (new_allowance - on_chain.allowance)
                * U256::from(BPS_DENOMINATOR)
                / on_chain.allowance;
            if increase_bps > U256::from(self.config.allowance_increase_threshold_bps) {
                return Some(UpdateReason::SignificantIncrease);
            }
        }
        let stale = match last_update_at {
            Some(at) => now.saturating_sub(at) > self.config.max_staleness_seconds,
            None => true,
        };
        if stale {
            return Some(UpdateReason::Staleness);
        }
        None
    }

    fn balances_drifted(
        &self,
        rebuilt: &HashMap<Address, U256>,
        on_chain: &OnChainAccountState,
    ) -> bool {
        for (token, balance) in rebuilt {
            let current = on_chain
                .acquired_balances
                .get(token)
                .copied()
                .unwrap_or(U256::ZERO);
            if current != *balance {
                return true;
            }
        }
        // On-chain slots the rebuild no longer produces must be cleared.
        on_chain
            .acquired_balances
            .iter()
            .any(|(token, balance)| !balance.is_zero() && !rebuilt.contains_key(token))
    }

    /// Build the batched update. Tokens present on chain but absent from the
    /// rebuild are included with balance zero so they are cleared.
    pub fn build_plan(
        &self,
        module: Address,
        sub_account: Address,
        new_allowance: U256,
        rebuilt_balances: &HashMap<Address, U256>,
        on_chain: &OnChainAccountState,
    ) -> AllowancePlan {
        let mut tokens: Vec<Address> = rebuilt_balances.keys().copied().collect();
        for token in on_chain.acquired_balances.keys() {
            if !rebuilt_balances.contains_key(token) {
                tokens.push(*token);
            }
        }
        tokens.sort();
        let balances = tokens
            .iter()
            .map(|t| rebuilt_balances.get(t).copied().unwrap_or(U256::ZERO))
            .collect();
        AllowancePlan {
            module,
            sub_account,
            new_allowance,
            tokens,
            balances,
        }
    }
}
