//! Confirmed allowance push history

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{DbResult, DbUpdateRecord};

pub struct UpdateRepo {
    pool: PgPool,
}

impl UpdateRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a confirmed push. Replaying the same `(module, sub, sequence)`
    /// is a no-op.
    pub async fn record_confirmed(&self, record: &DbUpdateRecord) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO update_records (module, sub_account, new_allowance, tokens, balances, sequence, confirmed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (module, sub_account, sequence) DO NOTHING
            "#,
        )
        .bind(&record.module)
        .bind(&record.sub_account)
        .bind(&record.new_allowance)
        .bind(&record.tokens)
        .bind(&record.balances)
        .bind(record.sequence)
        .bind(record.confirmed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// When the slot last confirmed an update, if ever.
    pub async fn last_confirmed_at(
        &self,
        module: &str,
        sub_account: &str,
    ) -> DbResult<Option<DateTime<Utc>>> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            r#"
            SELECT confirmed_at FROM update_records
            WHERE module = $1 AND sub_account = $2
            ORDER BY sequence DESC
            LIMIT 1
            "#,
        )
        .bind(module)
        .bind(sub_account)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(t,)| t))
    }
}
