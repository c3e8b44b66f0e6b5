//! PostgreSQL-backed [`EventStore`]

use std::str::FromStr;

use alloy_primitives::Address;
use async_trait::async_trait;
use sqlx::PgPool;

use cordon_ledger::{EventStore, LedgerError, Result as LedgerResult, UpsertOutcome};
use cordon_types::{ModuleEvent, SafeValueUpdated};

use crate::{DbError, EventRepo};

fn backend(e: DbError) -> LedgerError {
    LedgerError::Backend {
        message: e.to_string(),
    }
}

/// Persistent event store for the pipeline.
pub struct PgEventStore {
    events: EventRepo,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            events: EventRepo::new(pool),
        }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn upsert_event(&self, event: ModuleEvent) -> LedgerResult<UpsertOutcome> {
        let inserted = self.events.upsert(&event).await.map_err(backend)?;
        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::AlreadyStored
        })
    }

    async fn events_for_sub_account(
        &self,
        sub_account: Address,
        from_ts: u64,
        to_ts: u64,
    ) -> LedgerResult<Vec<ModuleEvent>> {
        self.events
            .for_sub_account(
                &format!("{sub_account:#x}"),
                from_ts as i64,
                to_ts.min(i64::MAX as u64) as i64,
            )
            .await
            .map_err(backend)
    }

    async fn known_sub_accounts(&self) -> LedgerResult<Vec<Address>> {
        let rows = self.events.sub_accounts().await.map_err(backend)?;
        rows.into_iter()
            .map(|s| {
                Address::from_str(&s).map_err(|e| LedgerError::Backend {
                    message: format!("corrupt sub_account column {s}: {e}"),
                })
            })
            .collect()
    }

    async fn latest_safe_value(&self) -> LedgerResult<Option<SafeValueUpdated>> {
        let event = self.events.latest_safe_value().await.map_err(backend)?;
        Ok(event.and_then(|e| match e {
            ModuleEvent::SafeValue(v) => Some(v),
            _ => None,
        }))
    }

    async fn prune_from_block(&self, height: u64) -> LedgerResult<usize> {
        let removed = self
            .events
            .prune_from_block(height as i64)
            .await
            .map_err(backend)?;
        Ok(removed as usize)
    }

    async fn last_processed_block(&self) -> LedgerResult<Option<u64>> {
        let height = self.events.last_processed_block().await.map_err(backend)?;
        Ok(height.map(|h| h as u64))
    }

    async fn set_last_processed_block(&self, height: u64) -> LedgerResult<()> {
        self.events
            .set_last_processed_block(height as i64)
            .await
            .map_err(backend)
    }
}
