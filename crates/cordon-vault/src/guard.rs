//! Role, whitelist and reserve guards

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{Result, VaultError};

/// Treasury roles in ascending order of authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VaultRole {
    None,
    Operator,
    Manager,
    Director,
}

/// Per-role USD limits. Monotonic: `operator_limit <= manager_limit`;
/// directors are unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleLimits {
    pub operator_limit_usd: U256,
    pub manager_limit_usd: U256,
}

impl RoleLimits {
    pub fn new(operator_limit_usd: U256, manager_limit_usd: U256) -> Result<Self> {
        if operator_limit_usd > manager_limit_usd {
            return Err(VaultError::NonMonotonicLimits {
                operator_limit: operator_limit_usd,
                manager_limit: manager_limit_usd,
            });
        }
        Ok(Self {
            operator_limit_usd,
            manager_limit_usd,
        })
    }

    /// The USD cap for a role; `None` means unlimited.
    pub fn limit_for(&self, role: VaultRole) -> Option<U256> {
        match role {
            VaultRole::None => Some(U256::ZERO),
            VaultRole::Operator => Some(self.operator_limit_usd),
            VaultRole::Manager => Some(self.manager_limit_usd),
            VaultRole::Director => None,
        }
    }
}

/// The guard surface of the treasury vault.
#[async_trait]
pub trait TreasuryVault: Send + Sync {
    async fn role_of(&self, account: Address) -> VaultRole;

    async fn is_whitelisted(&self, target: Address) -> bool;

    async fn reserve_requirement(&self, token: Address) -> U256;

    /// Validate a proposed treasury transfer against role limit, whitelist
    /// and reserve. Does not move funds.
    async fn check_transfer(
        &self,
        caller: Address,
        target: Address,
        token: Address,
        amount: U256,
        usd_amount: U256,
    ) -> Result<()>;
}

#[derive(Default)]
struct VaultState {
    roles: HashMap<Address, VaultRole>,
    whitelist: HashSet<Address>,
    reserves: HashMap<Address, U256>,
    balances: HashMap<Address, U256>,
}

/// In-memory reference vault for integration tests.
pub struct InMemoryVault {
    limits: RoleLimits,
    state: Arc<RwLock<VaultState>>,
}

impl InMemoryVault {
    pub fn new(limits: RoleLimits) -> Self {
        Self {
            limits,
            state: Arc::new(RwLock::new(VaultState::default())),
        }
    }

    pub async fn assign_role(&self, account: Address, role: VaultRole) {
        self.state.write().await.roles.insert(account, role);
    }

    pub async fn whitelist(&self, target: Address) {
        self.state.write().await.whitelist.insert(target);
    }

    pub async fn set_reserve(&self, token: Address, reserve: U256) {
        self.state.write().await.reserves.insert(token, reserve);
    }

    pub async fn set_balance(&self, token: Address, balance: U256) {
        self.state.write().await.balances.insert(token, balance);
    }
}

#[async_trait]
impl TreasuryVault for InMemoryVault {
    async fn role_of(&self, account: Address) -> VaultRole {
        self.state
            .read()
            .await
            .roles
            .get(&account)
            .copied()
            .unwrap_or(VaultRole::None)
    }

    async fn is_whitelisted(&self, target: Address) -> bool {
        self.state.read().await.whitelist.contains(&target)
    }

    async fn reserve_requirement(&self, token: Address) -> U256 {
        self.state
            .read()
            .await
            .reserves
            .get(&token)
            .copied()
            .unwrap_or(U256::ZERO)
    }

    async fn check_transfer(
        &self,
        caller: Address,
        target: Address,
        token: Address,
        amount: U256,
        usd_amount: U256,
    ) -> Result<()> {
        let state = self.state.read().await;
        let role = state.roles.get(&caller).copied().unwrap_or(VaultRole::None);
        if role == VaultRole::None {
            return Err(VaultError::NotAuthorized);
        }
        if let Some(limit) = self.limits.limit_for(role) {
            if usd_amount > limit {
                return Err(VaultError::AmountExceedsRoleLimit {
                    requested: usd_amount,
                    limit,
                });
            }
        }
        if !state.whitelist.contains(&target) {
            return Err(VaultError::TargetNotWhitelisted);
        }

        let balance = state.balances.get(&token).copied().unwrap_or(U256::ZERO);
        let balance_after = balance
            .checked_sub(amount)
            .ok_or(VaultError::InsufficientBalance {
                available: balance,
                required: amount,
            })?;
        let reserve = state.reserves.get(&token).copied().unwrap_or(U256::ZERO);
        if balance_after < reserve {
            return Err(VaultError::ReserveViolation {
                balance_after,
                reserve,
            });
        }
        Ok(())
    }
}
