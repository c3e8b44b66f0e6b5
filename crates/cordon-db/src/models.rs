//! Row models

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// One stored module event. Amount-bearing payload lives in `payload` as the
/// serialized domain event; the scalar columns exist for indexing.
#[derive(Debug, Clone, FromRow)]
pub struct DbModuleEvent {
    pub tx_hash: String,
    pub log_index: i64,
    pub block_number: i64,
    pub event_timestamp: i64,
    /// Lowercase hex, null for events that are not account-scoped.
    pub sub_account: Option<String>,
    pub payload: serde_json::Value,
    pub ingested_at: DateTime<Utc>,
}

/// Indexer cursor; a single-row table.
#[derive(Debug, Clone, FromRow)]
pub struct DbIndexerCursor {
    pub id: i32,
    pub last_processed_block: i64,
}

/// One confirmed allowance push.
#[derive(Debug, Clone, FromRow)]
pub struct DbUpdateRecord {
    pub module: String,
    pub sub_account: String,
    pub new_allowance: String,
    pub tokens: serde_json::Value,
    pub balances: serde_json::Value,
    pub sequence: i64,
    pub confirmed_at: DateTime<Utc>,
}
