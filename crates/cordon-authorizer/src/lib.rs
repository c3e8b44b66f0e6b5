//! Cordon Authorizer - Per-EOA rolling spend state machine
//!
//! The authorizer validates spending intents against rolling-window daily
//! limits and transfer-type policy, assigns monotonic nonces, and emits
//! authorization records. It never moves funds.
//!
//! # Invariants
//!
//! 1. `rolling_spend(eoa) <= daily_limit(eoa)` after every successful authorization
//! 2. Emitted nonces are strictly monotonic; the counter advances only on success
//! 3. No partial state change is observable on failure
//! 4. Live record count per EOA never exceeds the configured cap
//!
//! All mutating operations take `now` explicitly: the enforcement contract
//! reads block time, and the off-chain mirror must be able to replay it.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use cordon_types::{
    AuthorizationRecord, CordonTypeError, SpendRecord, SubAccount, TransferType, TypeBitmap,
};

/// Errors surfaced by authorizer operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorizerError {
    #[error("Caller is not the owner")]
    NotOwner,

    #[error("Authorizer is paused")]
    Paused,

    #[error("Invalid address")]
    InvalidAddress,

    #[error("Cannot register the avatar or module address as an EOA")]
    CannotRegisterCoreAddress,

    #[error("EOA already registered")]
    EOAAlreadyRegistered,

    /// The limit must be positive and fit the packed spend-record range.
    #[error("Invalid daily limit")]
    InvalidDailyLimit,

    #[error("Invalid transfer type {transfer_type} (max 7)")]
    InvalidTransferType { transfer_type: u8 },

    #[error("EOA not registered")]
    EOANotRegistered,

    #[error("Transfer type {transfer_type} not allowed for this EOA")]
    TransferTypeNotAllowed { transfer_type: u8 },

    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Daily limit exceeded: requested {requested}, remaining {remaining}")]
    DailyLimitExceeded { requested: U256, remaining: U256 },

    #[error("Too many spend records in window")]
    TooManySpendRecords,
}

impl From<CordonTypeError> for AuthorizerError {
    fn from(e: CordonTypeError) -> Self {
        match e {
            CordonTypeError::InvalidTransferType { transfer_type } => {
                AuthorizerError::InvalidTransferType { transfer_type }
            }
            CordonTypeError::LengthMismatch { .. } => AuthorizerError::InvalidAddress,
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthorizerError>;

/// Static configuration of one authorizer instance.
#[derive(Debug, Clone)]
pub struct AuthorizerConfig {
    /// The parent avatar this authorizer is attached to.
    pub avatar: Address,
    /// Account allowed to manage the EOA registry.
    pub owner: Address,
    /// Rolling spend window, seconds.
    pub window_duration_seconds: u64,
    /// Cap on live spend records per EOA.
    pub max_records_per_eoa: usize,
}

/// Per-EOA storage: the live account plus its append-only spend history.
#[derive(Debug, Clone, Default)]
struct EoaState {
    account: SubAccount,
    /// Append-only; expired records are skipped via `start_index`, never removed.
    records: Vec<SpendRecord>,
    start_index: usize,
}

impl EoaState {
    fn live_record_count(&self) -> usize {
        self.records.len() - self.start_index
    }
}

#[derive(Debug, Default)]
struct AuthorizerState {
    owner: Address,
    paused: bool,
    accounts: HashMap<Address, EoaState>,
    /// Enumeration order; revocation removes via swap-and-pop.
    eoa_list: Vec<Address>,
    next_nonce: u64,
    emitted: Vec<AuthorizationRecord>,
}

/// The Spend Authorizer
///
/// Strictly sequential per instance: every successful `authorize_spend`
/// commits before the next begins, so concurrent callers see serializable
/// outcomes on `(rolling_spend, nonce)`.
#[derive(Clone)]
pub struct SpendAuthorizer {
    avatar: Address,
    window: u64,
    max_records: usize,
    inner: Arc<RwLock<AuthorizerState>>,
}

impl SpendAuthorizer {
    pub fn new(config: AuthorizerConfig) -> Self {
        Self {
            avatar: config.avatar,
            window: config.window_duration_seconds,
            max_records: config.max_records_per_eoa,
            inner: Arc::new(RwLock::new(AuthorizerState {
                owner: config.owner,
                ..Default::default()
            })),
        }
    }

    fn validate_daily_limit(daily_limit: U256) -> Result<()> {
        if daily_limit.is_zero() || daily_limit > U256::from(u128::MAX) {
            return Err(AuthorizerError::InvalidDailyLimit);
        }
        Ok(())
    }

    /// Register a sub-account. Owner only.
    pub async fn register_eoa(
        &self,
        caller: Address,
        eoa: Address,
        daily_limit: U256,
        allowed_types: &[TransferType],
    ) -> Result<()> {
        let mut state = self.inner.write().await;
        if caller != state.owner {
            return Err(AuthorizerError::NotOwner);
        }
        if eoa == Address::ZERO {
            return Err(AuthorizerError::InvalidAddress);
        }
        if eoa == self.avatar || eoa == state.owner {
            return Err(AuthorizerError::CannotRegisterCoreAddress);
        }
        if state.accounts.get(&eoa).is_some_and(|s| s.account.registered) {
            return Err(AuthorizerError::EOAAlreadyRegistered);
        }
        Self::validate_daily_limit(daily_limit)?;
        let bitmap = TypeBitmap::from_types(allowed_types)?;

        // Re-registration keeps the prior (stale) spend history; the pruning
        // rule must stay correct across the gap.
        let entry = state.accounts.entry(eoa).or_default();
        entry.account = SubAccount {
            daily_limit,
            allowed_types: bitmap,
            registered: true,
        };
        state.eoa_list.push(eoa);
        info!(%eoa, %daily_limit, bitmap = bitmap.0, "EOA registered");
        Ok(())
    }

    /// Revoke a sub-account. Owner only; idempotent.
    pub async fn revoke_eoa(&self, caller: Address, eoa: Address) -> Result<()> {
        let mut state = self.inner.write().await;
        if caller != state.owner {
            return Err(AuthorizerError::NotOwner);
        }
        let was_live = state
            .accounts
            .get_mut(&eoa)
            .map(|entry| {
                let live = entry.account.registered;
                entry.account = SubAccount::default();
                live
            })
            .unwrap_or(false);
        if was_live {
            if let Some(pos) = state.eoa_list.iter().position(|a| *a == eoa) {
                state.eoa_list.swap_remove(pos);
            }
            info!(%eoa, "EOA revoked");
        }
        Ok(())
    }

    /// Update a live EOA's daily limit. Owner only.
    pub async fn update_limit(&self, caller: Address, eoa: Address, new_limit: U256) -> Result<()> {
        let mut state = self.inner.write().await;
        if caller != state.owner {
            return Err(AuthorizerError::NotOwner);
        }
        Self::validate_daily_limit(new_limit)?;
        let entry = state
            .accounts
            .get_mut(&eoa)
            .filter(|e| e.account.registered)
            .ok_or(AuthorizerError::EOANotRegistered)?;
        entry.account.daily_limit = new_limit;
        info!(%eoa, %new_limit, "daily limit updated");
        Ok(())
    }

    /// Replace a live EOA's allowed transfer types. Owner only.
    pub async fn update_allowed_types(
        &self,
        caller: Address,
        eoa: Address,
        allowed_types: &[TransferType],
    ) -> Result<()> {
        let mut state = self.inner.write().await;
        if caller != state.owner {
            return Err(AuthorizerError::NotOwner);
        }
        let bitmap = TypeBitmap::from_types(allowed_types)?;
        let entry = state
            .accounts
            .get_mut(&eoa)
            .filter(|e| e.account.registered)
            .ok_or(AuthorizerError::EOANotRegistered)?;
        entry.account.allowed_types = bitmap;
        Ok(())
    }

    /// Authorize a spend for the calling EOA.
    ///
    /// Atomic: either every check passes and exactly one record and one nonce
    /// are committed, or nothing changes.
    pub async fn authorize_spend(
        &self,
        caller: Address,
        amount: U256,
        recipient_hash: B256,
        transfer_type: TransferType,
        now: u64,
    ) -> Result<AuthorizationRecord> {
        let mut state = self.inner.write().await;
        if state.paused {
            return Err(AuthorizerError::Paused);
        }
        if amount.is_zero() {
            return Err(AuthorizerError::ZeroAmount);
        }

        let entry = state
            .accounts
            .get(&caller)
            .filter(|e| e.account.registered)
            .ok_or(AuthorizerError::EOANotRegistered)?;
        if !entry.account.allowed_types.allows(transfer_type) {
            return Err(AuthorizerError::TransferTypeNotAllowed {
                transfer_type: transfer_type.0,
            });
        }

        let cutoff = now.saturating_sub(self.window);
        let current = Self::rolling_spend_of(entry, cutoff);
        let remaining = entry.account.daily_limit.saturating_sub(current);
        if amount > remaining {
            return Err(AuthorizerError::DailyLimitExceeded {
                requested: amount,
                remaining,
            });
        }

        let entry = state
            .accounts
            .get_mut(&caller)
            .ok_or(AuthorizerError::EOANotRegistered)?;
        while entry.start_index < entry.records.len()
            && entry.records[entry.start_index].timestamp < cutoff
        {
            entry.start_index += 1;
        }
        if entry.live_record_count() >= self.max_records {
            return Err(AuthorizerError::TooManySpendRecords);
        }

        // amount <= remaining <= daily_limit, and registration bounds the
        // limit to the packed range, so the narrowing cannot truncate.
        entry.records.push(SpendRecord {
            amount: u128::try_from(amount).unwrap_or(u128::MAX),
            timestamp: now,
        });

        let nonce = state.next_nonce;
        state.next_nonce += 1;

        let record = AuthorizationRecord {
            avatar: self.avatar,
            eoa: caller,
            amount,
            recipient_hash,
            transfer_type: transfer_type.0,
            nonce,
        };
        state.emitted.push(record.clone());
        info!(eoa = %caller, %amount, nonce, transfer_type = transfer_type.0, "spend authorized");
        Ok(record)
    }

    /// Pause spend authorization. Owner only.
    pub async fn pause(&self, caller: Address) -> Result<()> {
        let mut state = self.inner.write().await;
        if caller != state.owner {
            return Err(AuthorizerError::NotOwner);
        }
        state.paused = true;
        info!("authorizer paused");
        Ok(())
    }

    /// Resume spend authorization. Owner only.
    pub async fn unpause(&self, caller: Address) -> Result<()> {
        let mut state = self.inner.write().await;
        if caller != state.owner {
            return Err(AuthorizerError::NotOwner);
        }
        state.paused = false;
        info!("authorizer unpaused");
        Ok(())
    }

    /// Hand the registry to a new owner. Owner only.
    pub async fn transfer_ownership(&self, caller: Address, new_owner: Address) -> Result<()> {
        let mut state = self.inner.write().await;
        if caller != state.owner {
            return Err(AuthorizerError::NotOwner);
        }
        if new_owner == Address::ZERO {
            return Err(AuthorizerError::InvalidAddress);
        }
        state.owner = new_owner;
        Ok(())
    }

    /// Spend committed inside the window ending at `now`.
    ///
    /// Walks the record list backward from the tail and stops at the first
    /// out-of-window record: appends are monotonic in time, so everything
    /// earlier is out of window too. Cost is O(in-window records).
    fn rolling_spend_of(entry: &EoaState, cutoff: u64) -> U256 {
        let mut total = U256::ZERO;
        for record in entry.records[entry.start_index..].iter().rev() {
            if record.timestamp < cutoff {
                break;
            }
            total += U256::from(record.amount);
        }
        total
    }

    pub async fn rolling_spend(&self, eoa: Address, now: u64) -> U256 {
        let state = self.inner.read().await;
        state
            .accounts
            .get(&eoa)
            .map(|e| Self::rolling_spend_of(e, now.saturating_sub(self.window)))
            .unwrap_or(U256::ZERO)
    }

    pub async fn remaining_limit(&self, eoa: Address, now: u64) -> U256 {
        let state = self.inner.read().await;
        state
            .accounts
            .get(&eoa)
            .filter(|e| e.account.registered)
            .map(|e| {
                let current = Self::rolling_spend_of(e, now.saturating_sub(self.window));
                e.account.daily_limit.saturating_sub(current)
            })
            .unwrap_or(U256::ZERO)
    }

    pub async fn daily_limit(&self, eoa: Address) -> U256 {
        let state = self.inner.read().await;
        state
            .accounts
            .get(&eoa)
            .map(|e| e.account.daily_limit)
            .unwrap_or(U256::ZERO)
    }

    pub async fn is_registered_eoa(&self, eoa: Address) -> bool {
        let state = self.inner.read().await;
        state
            .accounts
            .get(&eoa)
            .map(|e| e.account.registered)
            .unwrap_or(false)
    }

    pub async fn registered_eoas(&self) -> Vec<Address> {
        self.inner.read().await.eoa_list.clone()
    }

    pub async fn is_paused(&self) -> bool {
        self.inner.read().await.paused
    }

    /// Authorization records emitted so far, oldest first.
    pub async fn emitted_records(&self) -> Vec<AuthorizationRecord> {
        self.inner.read().await.emitted.clone()
    }

    pub async fn next_nonce(&self) -> u64 {
        self.inner.read().await.next_nonce
    }
}
