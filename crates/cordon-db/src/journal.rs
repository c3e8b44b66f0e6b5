//! PostgreSQL-backed [`UpdateJournal`]

use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::PgPool;

use cordon_allowance::{AllowanceError, AllowancePlan, Result as AllowanceResult, UpdateJournal};

use crate::{DbError, DbUpdateRecord, UpdateRepo};

fn backend(e: DbError) -> AllowanceError {
    AllowanceError::Submission {
        message: e.to_string(),
    }
}

/// Durable journal of confirmed pushes for the pusher's staleness policy.
pub struct PgUpdateJournal {
    updates: UpdateRepo,
}

impl PgUpdateJournal {
    pub fn new(pool: PgPool) -> Self {
        Self {
            updates: UpdateRepo::new(pool),
        }
    }
}

#[async_trait]
impl UpdateJournal for PgUpdateJournal {
    async fn record_confirmed(
        &self,
        plan: &AllowancePlan,
        sequence: u64,
        confirmed_at: u64,
    ) -> AllowanceResult<()> {
        let confirmed_at = DateTime::from_timestamp(confirmed_at as i64, 0).ok_or_else(|| {
            AllowanceError::Submission {
                message: "confirmation time out of range".to_string(),
            }
        })?;
        let record = DbUpdateRecord {
            module: format!("{:#x}", plan.module),
            sub_account: format!("{:#x}", plan.sub_account),
            new_allowance: plan.new_allowance.to_string(),
            tokens: serde_json::json!(plan
                .tokens
                .iter()
                .map(|t| format!("{t:#x}"))
                .collect::<Vec<_>>()),
            balances: serde_json::json!(plan
                .balances
                .iter()
                .map(|b| b.to_string())
                .collect::<Vec<_>>()),
            sequence: sequence as i64,
            confirmed_at,
        };
        self.updates
            .record_confirmed(&record)
            .await
            .map_err(backend)
    }

    async fn last_confirmed_at(
        &self,
        module: Address,
        sub_account: Address,
    ) -> AllowanceResult<Option<u64>> {
        let at = self
            .updates
            .last_confirmed_at(&format!("{module:#x}"), &format!("{sub_account:#x}"))
            .await
            .map_err(backend)?;
        Ok(at.map(|t| t.timestamp().max(0) as u64))
    }
}
