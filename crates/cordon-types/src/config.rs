//! Core configuration
//!
//! Every knob the pipeline reads lives here with its canonical default, so a
//! deployment can override any subset from a config file or environment.

use serde::{Deserialize, Serialize};

/// Configuration shared across the authorization and accounting pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Rolling spend window, seconds.
    #[serde(default = "default_window_duration_seconds")]
    pub window_duration_seconds: u64,

    /// Cap on live spend records per EOA.
    #[serde(default = "default_max_records_per_eoa")]
    pub max_records_per_eoa: usize,

    /// Allowance increases below this threshold (bps of the on-chain value)
    /// are not worth a transaction.
    #[serde(default = "default_allowance_increase_threshold_bps")]
    pub allowance_increase_threshold_bps: u64,

    /// Push an unchanged allowance anyway once it is this stale, seconds.
    #[serde(default = "default_max_staleness_seconds")]
    pub max_staleness_seconds: u64,

    /// Hard ceiling on any allowance, bps of the safe value.
    #[serde(default = "default_absolute_max_spending_bps")]
    pub absolute_max_spending_bps: u64,

    /// Blocks subtracted from the tip before processing.
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u64,

    /// Bound on the reorg-detection block hash cache.
    #[serde(default = "default_max_block_hash_cache")]
    pub max_block_hash_cache: usize,

    /// Chunk size for direct substrate log pagination.
    #[serde(default = "default_max_blocks_per_query")]
    pub max_blocks_per_query: u64,

    /// Never backfill further than this behind the tip.
    #[serde(default = "default_max_historical_blocks")]
    pub max_historical_blocks: u64,

    /// Maximum acceptable oracle data age, seconds.
    #[serde(default = "default_max_oracle_age_seconds")]
    pub max_oracle_age_seconds: u64,

    /// Maximum acceptable safe value age, seconds.
    #[serde(default = "default_max_safe_value_age_seconds")]
    pub max_safe_value_age_seconds: u64,

    /// Maximum acceptable price feed age, seconds.
    #[serde(default = "default_max_price_feed_age_seconds")]
    pub max_price_feed_age_seconds: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            window_duration_seconds: default_window_duration_seconds(),
            max_records_per_eoa: default_max_records_per_eoa(),
            allowance_increase_threshold_bps: default_allowance_increase_threshold_bps(),
            max_staleness_seconds: default_max_staleness_seconds(),
            absolute_max_spending_bps: default_absolute_max_spending_bps(),
            confirmation_blocks: default_confirmation_blocks(),
            max_block_hash_cache: default_max_block_hash_cache(),
            max_blocks_per_query: default_max_blocks_per_query(),
            max_historical_blocks: default_max_historical_blocks(),
            max_oracle_age_seconds: default_max_oracle_age_seconds(),
            max_safe_value_age_seconds: default_max_safe_value_age_seconds(),
            max_price_feed_age_seconds: default_max_price_feed_age_seconds(),
        }
    }
}

impl CoreConfig {
    /// Lookback for a rebuild: twice the window, so acquisitions whose
    /// original timestamp is outside the current window but whose inherited
    /// descendants are inside it are still observed.
    pub fn rebuild_lookback_seconds(&self) -> u64 {
        self.window_duration_seconds * 2
    }
}

fn default_window_duration_seconds() -> u64 {
    86_400
}

fn default_max_records_per_eoa() -> usize {
    200
}

fn default_allowance_increase_threshold_bps() -> u64 {
    200
}

fn default_max_staleness_seconds() -> u64 {
    2_700
}

fn default_absolute_max_spending_bps() -> u64 {
    2_000
}

fn default_confirmation_blocks() -> u64 {
    60
}

fn default_max_block_hash_cache() -> usize {
    1_000
}

fn default_max_blocks_per_query() -> u64 {
    1_000
}

fn default_max_historical_blocks() -> u64 {
    2_592_000
}

fn default_max_oracle_age_seconds() -> u64 {
    3_600
}

fn default_max_safe_value_age_seconds() -> u64 {
    3_600
}

fn default_max_price_feed_age_seconds() -> u64 {
    86_400
}
