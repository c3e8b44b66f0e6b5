//! Cordon Allowance - Spending allowance computation and push
//!
//! Computes `new_allowance = safe_value × max_bps / 10 000 − rolling_spend`,
//! applies the update-threshold policy (skip updates that are not worth a
//! transaction), and submits batched state updates to the enforcement
//! substrate with pipelined sequence numbers.
//!
//! # Invariants
//!
//! 1. No pushed allowance ever exceeds `safe_value × absolute_max_bps / 10 000`
//! 2. `last_update_timestamp` advances only after confirmation, never on
//!    submission — a lost confirmation is retried next cycle
//! 3. Stale on-chain balance slots are pushed as zero, never left behind

pub mod calculator;
pub mod pusher;

pub use calculator::*;
pub use pusher::*;

use alloy_primitives::U256;
use thiserror::Error;

/// Errors surfaced by allowance computation and push
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllowanceError {
    #[error("Allowance {requested} exceeds absolute maximum {maximum}")]
    ExceedsAbsoluteMaxSpending { requested: U256, maximum: U256 },

    #[error("Spending cost {cost} exceeds remaining allowance {allowance}")]
    ExceedsSpendingLimit { cost: U256, allowance: U256 },

    #[error("Safe value is stale: age {age_seconds}s exceeds {max_age_seconds}s")]
    StalePortfolioValue {
        age_seconds: u64,
        max_age_seconds: u64,
    },

    #[error("Submission failed: {message}")]
    Submission { message: String },
}

pub type Result<T> = std::result::Result<T, AllowanceError>;
