//! Cordon Database Layer
//!
//! PostgreSQL persistence for the control plane:
//!
//! - **Event log**: every ingested module event, keyed by `(tx_hash,
//!   log_index)` with `ON CONFLICT DO NOTHING` so replays are no-ops
//! - **Indexer cursor**: the last processed block
//! - **Update history**: confirmed allowance pushes per `(module, sub)`
//!
//! Each domain has its own repository with the queries it needs; the event
//! repository also backs the [`cordon_ledger::EventStore`] trait so the
//! pipeline can run against PostgreSQL or in-memory storage unchanged.

pub mod config;
pub mod error;
pub mod journal;
pub mod models;
pub mod repos;
pub mod store;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

pub use config::DatabaseConfig;
pub use error::{DbError, DbResult};
pub use journal::PgUpdateJournal;
pub use models::*;
pub use repos::*;
pub use store::PgEventStore;

/// Database connection pool
pub struct Database {
    pub pg: PgPool,
}

impl Database {
    /// Connect to PostgreSQL.
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        info!("Connecting to PostgreSQL: {}", config.postgres_url_masked());

        let pg = PgPoolOptions::new()
            .max_connections(config.pg_max_connections)
            .min_connections(config.pg_min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.pg_acquire_timeout_secs))
            .connect(&config.postgres_url)
            .await
            .map_err(|e| DbError::Connection(format!("PostgreSQL: {}", e)))?;

        info!("Connected to PostgreSQL");
        Ok(Self { pg })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> DbResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pg)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;
        info!("Migrations complete");
        Ok(())
    }
}
