//! Cycle orchestration
//!
//! One mutex covers the block poller and the periodic refresh: if a cycle is
//! already running, a triggered refresh is dropped, not queued. Cycles check
//! the shutdown flag at sub-account boundaries; a cancelled cycle pushes
//! nothing, so no partial sub-account state reaches the substrate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy_primitives::Address;
use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use cordon_allowance::{
    AllowanceCalculator, AllowancePlan, AllowancePusher, PushOutcome, StateReader,
};
use cordon_indexer::{EventSource, PollOutcome};
use cordon_ledger::EventStore;
use cordon_oracle::FeedRegistry;
use cordon_rebuilder::Rebuilder;
use cordon_types::CoreConfig;

/// Everything one cycle needs, owned behind the single-cycle mutex.
pub struct CycleDeps<S: EventStore> {
    pub source: EventSource<S>,
    pub store: Arc<S>,
    pub rebuilder: Rebuilder,
    pub calculator: AllowanceCalculator,
    pub pusher: AllowancePusher,
    pub feeds: FeedRegistry,
    pub reader: Arc<dyn StateReader>,
    pub config: CoreConfig,
    pub module: Address,
    pub max_spending_bps: u64,
}

/// How a cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle held the lock; this trigger was dropped.
    Skipped,
    Cancelled,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub poll: PollOutcome,
    pub accounts: usize,
    pub planned: usize,
    pub push: PushOutcome,
}

pub struct CycleRunner<S: EventStore> {
    deps: Mutex<CycleDeps<S>>,
    shutdown: Arc<AtomicBool>,
}

impl<S: EventStore> CycleRunner<S> {
    pub fn new(deps: CycleDeps<S>, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            deps: Mutex::new(deps),
            shutdown,
        }
    }

    /// Run one cycle if none is in flight.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let Ok(mut deps) = self.deps.try_lock() else {
            debug!("cycle already running, trigger dropped");
            return Ok(CycleOutcome::Skipped);
        };
        self.execute(&mut deps).await
    }

    fn cancelled(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    async fn execute(&self, deps: &mut CycleDeps<S>) -> Result<CycleOutcome> {
        let now = Utc::now().timestamp() as u64;
        let mut report = CycleReport::default();

        report.poll = deps.source.poll().await.context("event poll failed")?;
        if self.cancelled() {
            return Ok(CycleOutcome::Cancelled);
        }

        let safe = deps.reader.safe_value().await.context("safe value read failed")?;
        deps.calculator
            .check_safe_value_freshness(safe.updated_at, now)?;

        let feed_tokens = deps.feeds.tokens();
        let prices = deps
            .feeds
            .snapshot(&feed_tokens, now, deps.config.max_price_feed_age_seconds)
            .await
            .context("price snapshot failed")?;

        let sub_accounts = deps.store.known_sub_accounts().await?;
        report.accounts = sub_accounts.len();
        let lookback = deps.config.rebuild_lookback_seconds();

        let mut plans: Vec<AllowancePlan> = Vec::new();
        for sub_account in sub_accounts {
            if self.cancelled() {
                warn!("cycle cancelled before push, no state persisted");
                return Ok(CycleOutcome::Cancelled);
            }

            let events = deps
                .store
                .events_for_sub_account(sub_account, now.saturating_sub(lookback), now)
                .await?;
            let state = deps.rebuilder.rebuild(sub_account, &events, &prices, now);

            let new_allowance = deps.calculator.compute_allowance(
                safe.total_value_usd,
                deps.max_spending_bps,
                state.total_spending_in_window,
            )?;
            let on_chain = deps.reader.account_state(sub_account).await?;
            let last_update = deps.pusher.last_update(deps.module, sub_account).await;

            if let Some(reason) = deps.calculator.decide_update(
                new_allowance,
                &state.acquired_balances,
                &on_chain,
                last_update,
                now,
            ) {
                info!(%sub_account, ?reason, %new_allowance, "planning update");
                plans.push(deps.calculator.build_plan(
                    deps.module,
                    sub_account,
                    new_allowance,
                    &state.acquired_balances,
                    &on_chain,
                ));
            } else {
                debug!(%sub_account, "no update needed");
            }
        }

        if self.cancelled() {
            warn!("cycle cancelled before push, no state persisted");
            return Ok(CycleOutcome::Cancelled);
        }

        report.planned = plans.len();
        report.push = deps.pusher.push(&plans, now).await;
        info!(
            accounts = report.accounts,
            planned = report.planned,
            confirmed = report.push.confirmed,
            failed = report.push.failed,
            "cycle complete"
        );
        Ok(CycleOutcome::Completed(report))
    }
}
