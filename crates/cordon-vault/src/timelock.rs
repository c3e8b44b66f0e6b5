//! Time-delay operation queue

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::{Result, VaultError, VaultRole};

/// Identifier of a scheduled operation: `keccak256(to ‖ value ‖ data ‖ salt)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub B256);

pub fn operation_id(to: Address, value: U256, data: &[u8], salt: B256) -> OperationId {
    let mut buf = Vec::with_capacity(20 + 32 + data.len() + 32);
    buf.extend_from_slice(to.as_slice());
    buf.extend_from_slice(&value.to_be_bytes::<32>());
    buf.extend_from_slice(data);
    buf.extend_from_slice(salt.as_slice());
    OperationId(keccak256(&buf))
}

/// Lifecycle of a scheduled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    Unset,
    Pending,
    /// Pending with the delay elapsed.
    Ready,
    Executed,
    Cancelled,
}

/// A treasury movement waiting out its delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledOperation {
    pub id: OperationId,
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
    pub usd_amount: U256,
    pub scheduled_at: u64,
    pub executed: bool,
    pub cancelled: bool,
}

/// The time-delay queue guarding large treasury movements.
#[async_trait]
pub trait TimelockQueue: Send + Sync {
    /// Queue an operation. Rejects amounts below the timelock threshold:
    /// small movements use the direct role-limited path instead.
    #[allow(clippy::too_many_arguments)]
    async fn schedule(
        &self,
        caller: Address,
        to: Address,
        value: U256,
        data: Vec<u8>,
        usd_amount: U256,
        salt: B256,
        now: u64,
    ) -> Result<OperationId>;

    /// Execute once `scheduled_at + min_delay` has elapsed.
    async fn execute(&self, caller: Address, id: OperationId, now: u64) -> Result<()>;

    /// Cancel while still pending. Canceller role required.
    async fn cancel(&self, caller: Address, id: OperationId) -> Result<()>;

    async fn state_of(&self, id: OperationId, now: u64) -> OperationState;
}

#[derive(Default)]
struct TimelockState {
    operations: HashMap<OperationId, ScheduledOperation>,
    roles: HashMap<Address, VaultRole>,
}

/// In-memory reference timelock for integration tests.
pub struct InMemoryTimelock {
    min_delay_seconds: u64,
    threshold_usd: U256,
    state: Arc<RwLock<TimelockState>>,
}

impl InMemoryTimelock {
    pub fn new(min_delay_seconds: u64, threshold_usd: U256) -> Self {
        Self {
            min_delay_seconds,
            threshold_usd,
            state: Arc::new(RwLock::new(TimelockState::default())),
        }
    }

    pub async fn assign_role(&self, account: Address, role: VaultRole) {
        self.state.write().await.roles.insert(account, role);
    }

    async fn require_role(&self, caller: Address, minimum: VaultRole) -> Result<()> {
        let role = self
            .state
            .read()
            .await
            .roles
            .get(&caller)
            .copied()
            .unwrap_or(VaultRole::None);
        if role < minimum {
            return Err(VaultError::NotAuthorized);
        }
        Ok(())
    }

    fn state_of_operation(&self, op: &ScheduledOperation, now: u64) -> OperationState {
        if op.cancelled {
            OperationState::Cancelled
        } else if op.executed {
            OperationState::Executed
        } else if now >= op.scheduled_at + self.min_delay_seconds {
            OperationState::Ready
        } else {
            OperationState::Pending
        }
    }
}

#[async_trait]
impl TimelockQueue for InMemoryTimelock {
    async fn schedule(
        &self,
        caller: Address,
        to: Address,
        value: U256,
        data: Vec<u8>,
        usd_amount: U256,
        salt: B256,
        now: u64,
    ) -> Result<OperationId> {
        self.require_role(caller, VaultRole::Operator).await?;
        if usd_amount < self.threshold_usd {
            return Err(VaultError::BelowTimelockThreshold {
                usd_amount,
                threshold: self.threshold_usd,
            });
        }
        let id = operation_id(to, value, &data, salt);
        let mut state = self.state.write().await;
        if state.operations.contains_key(&id) {
            return Err(VaultError::OperationAlreadyScheduled);
        }
        state.operations.insert(
            id,
            ScheduledOperation {
                id,
                to,
                value,
                data,
                usd_amount,
                scheduled_at: now,
                executed: false,
                cancelled: false,
            },
        );
        info!(operation = %id.0, %usd_amount, "operation scheduled");
        Ok(id)
    }

    async fn execute(&self, caller: Address, id: OperationId, now: u64) -> Result<()> {
        self.require_role(caller, VaultRole::Operator).await?;
        let mut state = self.state.write().await;
        let op = state
            .operations
            .get_mut(&id)
            .ok_or(VaultError::OperationNotFound)?;
        if op.cancelled || op.executed {
            return Err(VaultError::OperationNotPending);
        }
        let ready_at = op.scheduled_at + self.min_delay_seconds;
        if now < ready_at {
            return Err(VaultError::OperationNotReady { ready_at });
        }
        op.executed = true;
        info!(operation = %id.0, "operation executed");
        Ok(())
    }

    async fn cancel(&self, caller: Address, id: OperationId) -> Result<()> {
        self.require_role(caller, VaultRole::Manager).await?;
        let mut state = self.state.write().await;
        let op = state
            .operations
            .get_mut(&id)
            .ok_or(VaultError::OperationNotFound)?;
        if op.cancelled || op.executed {
            return Err(VaultError::OperationNotPending);
        }
        op.cancelled = true;
        info!(operation = %id.0, "operation cancelled");
        Ok(())
    }

    async fn state_of(&self, id: OperationId, now: u64) -> OperationState {
        let state = self.state.read().await;
        state
            .operations
            .get(&id)
            .map(|op| self.state_of_operation(op, now))
            .unwrap_or(OperationState::Unset)
    }
}
