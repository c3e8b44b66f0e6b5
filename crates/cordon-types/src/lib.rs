//! Cordon Types - Canonical domain types for the authorization & accounting core
//!
//! This crate contains all foundational types for Cordon with zero dependencies
//! on other cordon crates. It defines:
//!
//! - Sub-account identities, spend records and authorization records
//! - Transfer types and the allowed-types bitmap
//! - Protocol execution and transfer events with chain coordinates
//! - Core configuration with the canonical defaults
//!
//! # Architectural Invariants
//!
//! These types support the core security invariants:
//!
//! 1. Authorization is separated from execution — no type here moves funds
//! 2. Every event is addressable by `(tx_hash, log_index)`
//! 3. All USD amounts are 18-decimal fixed point in 256-bit integers

pub mod account;
pub mod config;
pub mod error;
pub mod events;
pub mod transfer;

pub use account::*;
pub use config::*;
pub use error::*;
pub use events::*;
pub use transfer::*;

/// Fixed-point precision used for USD amounts and ratio arithmetic.
pub const PRECISION_DECIMALS: u8 = 18;

/// `10^18`, the multiplier behind [`PRECISION_DECIMALS`].
pub fn precision() -> alloy_primitives::U256 {
    alloy_primitives::U256::from(10u64).pow(alloy_primitives::U256::from(18u64))
}

/// Basis-point denominator for allowance math.
pub const BPS_DENOMINATOR: u64 = 10_000;
