//! Cordon Vault - Treasury vault collaborator interface
//!
//! The core consumes this interface; the production vault lives on the
//! enforcement substrate and is not implemented here. The crate ships the
//! role/whitelist/reserve guard surface, the time-delay operation queue, and
//! an in-memory reference double used by integration tests.

pub mod guard;
pub mod timelock;

pub use guard::*;
pub use timelock::*;

use alloy_primitives::U256;
use thiserror::Error;

/// Errors surfaced by vault guards and the timelock queue
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    #[error("Caller holds no treasury role")]
    NotAuthorized,

    #[error("Amount {requested} exceeds role limit {limit}")]
    AmountExceedsRoleLimit { requested: U256, limit: U256 },

    #[error("Target not whitelisted")]
    TargetNotWhitelisted,

    #[error("Reserve violation: balance after transfer {balance_after} below reserve {reserve}")]
    ReserveViolation { balance_after: U256, reserve: U256 },

    #[error("Insufficient balance: have {available}, need {required}")]
    InsufficientBalance { available: U256, required: U256 },

    #[error("Role limits must be monotonic: operator {operator_limit} exceeds manager {manager_limit}")]
    NonMonotonicLimits {
        operator_limit: U256,
        manager_limit: U256,
    },

    #[error("Amount {usd_amount} below timelock threshold {threshold}")]
    BelowTimelockThreshold { usd_amount: U256, threshold: U256 },

    #[error("Operation not found")]
    OperationNotFound,

    #[error("Operation already scheduled")]
    OperationAlreadyScheduled,

    #[error("Operation not ready until {ready_at}")]
    OperationNotReady { ready_at: u64 },

    #[error("Operation is not pending")]
    OperationNotPending,
}

pub type Result<T> = std::result::Result<T, VaultError>;
