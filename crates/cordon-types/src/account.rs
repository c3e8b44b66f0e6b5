//! Sub-account state, spend records and authorization records

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::TypeBitmap;

/// A sub-account (EOA) registered under an avatar.
///
/// Revocation zeroes the fields and clears `registered`; the identity may be
/// re-registered later with fresh parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubAccount {
    /// Daily spending limit in USD, 18-decimal fixed point. Always > 0 while live.
    pub daily_limit: U256,
    /// Transfer types this sub-account may authorize.
    pub allowed_types: TypeBitmap,
    /// Whether the sub-account is currently live.
    pub registered: bool,
}

/// One authorized spend, packed for compact per-EOA storage.
///
/// Records are append-only; expiry never removes them in place, it only
/// advances the account's `start_index` cursor past them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendRecord {
    /// Authorized amount in USD, 18-decimal fixed point.
    pub amount: u128,
    /// Unix timestamp of the authorization.
    pub timestamp: u64,
}

/// The durable ground truth for downstream execution.
///
/// Emitted exactly once per successful spend authorization. Nonces are
/// strictly monotonic per authorizer instance and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRecord {
    /// The parent avatar the authorizer is attached to.
    pub avatar: Address,
    /// The authorizing sub-account.
    pub eoa: Address,
    /// Authorized amount in USD, 18-decimal fixed point.
    pub amount: U256,
    /// Commitment to the recipient; the core never sees the clear recipient.
    pub recipient_hash: B256,
    /// Transfer type the spend was authorized under.
    pub transfer_type: u8,
    /// Monotonic per-instance nonce.
    pub nonce: u64,
}
