//! Event log repository

use sqlx::PgPool;

use cordon_types::ModuleEvent;

use crate::{DbError, DbModuleEvent, DbResult};

pub struct EventRepo {
    pool: PgPool,
}

impl EventRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert if unseen. Returns `true` when the row was new.
    pub async fn upsert(&self, event: &ModuleEvent) -> DbResult<bool> {
        let chain = event.chain();
        let sub_account = event.sub_account().map(|a| format!("{a:#x}"));
        let payload = serde_json::to_value(event)?;

        let result = sqlx::query(
            r#"
            INSERT INTO module_events (tx_hash, log_index, block_number, event_timestamp, sub_account, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(format!("{:#x}", chain.tx_hash))
        .bind(chain.log_index as i64)
        .bind(chain.block_number as i64)
        .bind(chain.timestamp as i64)
        .bind(sub_account)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Chronological events for a sub-account in an inclusive timestamp range.
    pub async fn for_sub_account(
        &self,
        sub_account: &str,
        from_ts: i64,
        to_ts: i64,
    ) -> DbResult<Vec<ModuleEvent>> {
        let rows = sqlx::query_as::<_, DbModuleEvent>(
            r#"
            SELECT tx_hash, log_index, block_number, event_timestamp, sub_account, payload, ingested_at
            FROM module_events
            WHERE sub_account = $1 AND event_timestamp >= $2 AND event_timestamp <= $3
            ORDER BY event_timestamp, block_number, log_index
            "#,
        )
        .bind(sub_account)
        .bind(from_ts)
        .bind(to_ts)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row.payload)
                    .map_err(|e| DbError::CorruptRow(format!("{}#{}: {e}", row.tx_hash, row.log_index)))
            })
            .collect()
    }

    /// All distinct account-scoped sub-accounts in the log.
    pub async fn sub_accounts(&self) -> DbResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT sub_account FROM module_events WHERE sub_account IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    /// The most recent safe-value event in the log, if any.
    pub async fn latest_safe_value(&self) -> DbResult<Option<ModuleEvent>> {
        let row: Option<DbModuleEvent> = sqlx::query_as(
            r#"
            SELECT tx_hash, log_index, block_number, event_timestamp, sub_account, payload, ingested_at
            FROM module_events
            WHERE payload->>'type' = 'SafeValue'
            ORDER BY event_timestamp DESC, block_number DESC, log_index DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            serde_json::from_value(r.payload)
                .map_err(|e| DbError::CorruptRow(format!("{}#{}: {e}", r.tx_hash, r.log_index)))
        })
        .transpose()
    }

    /// Remove events at or above a rewound height. Returns the removed count.
    pub async fn prune_from_block(&self, height: i64) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM module_events WHERE block_number >= $1")
            .bind(height)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn last_processed_block(&self) -> DbResult<Option<i64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_processed_block FROM indexer_cursor WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(h,)| h))
    }

    pub async fn set_last_processed_block(&self, height: i64) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO indexer_cursor (id, last_processed_block)
            VALUES (1, $1)
            ON CONFLICT (id) DO UPDATE SET last_processed_block = EXCLUDED.last_processed_block
            "#,
        )
        .bind(height)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
