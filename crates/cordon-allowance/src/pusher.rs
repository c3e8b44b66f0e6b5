//! Batched, pipelined submission of allowance updates

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::Address;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{AllowancePlan, Result};

/// Handle for one in-flight submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionHandle {
    pub id: Uuid,
    pub sequence: u64,
}

/// Transport seam to the enforcement substrate.
#[async_trait]
pub trait SubstrateWriter: Send + Sync {
    /// Issue a `batch_update` transaction with the given sequence number.
    /// Must not wait for confirmation.
    async fn submit_batch_update(
        &self,
        plan: &AllowancePlan,
        sequence: u64,
    ) -> Result<SubmissionHandle>;

    /// Wait for a previously issued submission. `true` means confirmed.
    async fn await_confirmation(&self, handle: &SubmissionHandle) -> Result<bool>;
}

/// Durable record of confirmed pushes, so staleness policy survives
/// restarts. Written only after confirmation, like the in-memory map.
#[async_trait]
pub trait UpdateJournal: Send + Sync {
    async fn record_confirmed(
        &self,
        plan: &AllowancePlan,
        sequence: u64,
        confirmed_at: u64,
    ) -> Result<()>;

    async fn last_confirmed_at(
        &self,
        module: Address,
        sub_account: Address,
    ) -> Result<Option<u64>>;
}

/// Result of one push cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOutcome {
    pub submitted: usize,
    pub confirmed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct PusherState {
    next_sequence: u64,
    /// Recorded only after confirmation.
    last_update_timestamp: HashMap<(Address, Address), u64>,
}

/// Submits allowance plans with contiguous sequence numbers, then awaits
/// confirmations in bulk at cycle end.
#[derive(Clone)]
pub struct AllowancePusher {
    writer: Arc<dyn SubstrateWriter>,
    journal: Option<Arc<dyn UpdateJournal>>,
    state: Arc<RwLock<PusherState>>,
}

impl AllowancePusher {
    pub fn new(writer: Arc<dyn SubstrateWriter>) -> Self {
        Self {
            writer,
            journal: None,
            state: Arc::new(RwLock::new(PusherState::default())),
        }
    }

    /// Pusher that also journals confirmed pushes durably.
    pub fn with_journal(writer: Arc<dyn SubstrateWriter>, journal: Arc<dyn UpdateJournal>) -> Self {
        Self {
            writer,
            journal: Some(journal),
            state: Arc::new(RwLock::new(PusherState::default())),
        }
    }

    /// Push a cycle's worth of plans.
    ///
    /// Submissions are pipelined: every plan is issued before any
    /// confirmation is awaited. A failed confirmation leaves the
    /// `(module, sub_account)` timestamp unadvanced so the next cycle
    /// re-attempts the same update.
    pub async fn push(&self, plans: &[AllowancePlan], now: u64) -> PushOutcome {
        let mut outcome = PushOutcome::default();
        let mut pending: Vec<(&AllowancePlan, SubmissionHandle)> = Vec::new();

        {
            let mut state = self.state.write().await;
            for plan in plans {
                let sequence = state.next_sequence;
                match self.writer.submit_batch_update(plan, sequence).await {
                    Ok(handle) => {
                        state.next_sequence += 1;
                        outcome.submitted += 1;
                        pending.push((plan, handle));
                    }
                    Err(e) => {
                        warn!(sub_account = %plan.sub_account, error = %e, "batch update submission failed");
                        outcome.failed += 1;
                    }
                }
            }
        }

        for (plan, handle) in pending {
            match self.writer.await_confirmation(&handle).await {
                Ok(true) => {
                    {
                        let mut state = self.state.write().await;
                        state
                            .last_update_timestamp
                            .insert((plan.module, plan.sub_account), now);
                    }
                    if let Some(journal) = &self.journal {
                        // A lost journal write only makes the slot look
                        // stale after a restart, which re-pushes; never
                        // fail the cycle for it.
                        if let Err(e) = journal.record_confirmed(plan, handle.sequence, now).await {
                            warn!(sub_account = %plan.sub_account, error = %e,
                                  "failed to journal confirmed update");
                        }
                    }
                    outcome.confirmed += 1;
                    info!(sub_account = %plan.sub_account, sequence = handle.sequence,
                          allowance = %plan.new_allowance, "batch update confirmed");
                }
                Ok(false) => {
                    warn!(sub_account = %plan.sub_account, sequence = handle.sequence,
                          "batch update not confirmed, will retry next cycle");
                    outcome.failed += 1;
                }
                Err(e) => {
                    warn!(sub_account = %plan.sub_account, sequence = handle.sequence, error = %e,
                          "confirmation wait failed, will retry next cycle");
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }

    /// Confirmation time of the last successful update for a slot.
    ///
    /// Falls back to the journal when this process has not confirmed the
    /// slot itself, so a restarted keeper keeps its staleness policy.
    pub async fn last_update(&self, module: Address, sub_account: Address) -> Option<u64> {
        let in_memory = self
            .state
            .read()
            .await
            .last_update_timestamp
            .get(&(module, sub_account))
            .copied();
        if in_memory.is_some() {
            return in_memory;
        }
        let journal = self.journal.as_ref()?;
        match journal.last_confirmed_at(module, sub_account).await {
            Ok(at) => at,
            Err(e) => {
                warn!(%sub_account, error = %e, "journal read failed, treating slot as stale");
                None
            }
        }
    }

    pub async fn next_sequence(&self) -> u64 {
        self.state.read().await.next_sequence
    }
}
