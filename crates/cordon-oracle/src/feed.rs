//! Price feed trait and implementations

use alloy_primitives::U256;
use async_trait::async_trait;

use crate::{OracleError, Result};

/// Latest answer from a feed, in the feed's native decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundData {
    pub answer: i128,
    /// Unix timestamp the answer was last refreshed.
    pub updated_at: u64,
}

/// A USD price source for one token.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn latest_round_data(&self) -> Result<RoundData>;
    async fn decimals(&self) -> Result<u8>;
}

/// Fixed-answer feed for tests and pinned-price deployments.
#[derive(Debug, Clone)]
pub struct ConstantFeed {
    answer: i128,
    decimals: u8,
    updated_at: u64,
}

impl ConstantFeed {
    pub fn new(answer: i128, decimals: u8, updated_at: u64) -> Self {
        Self {
            answer,
            decimals,
            updated_at,
        }
    }
}

#[async_trait]
impl PriceFeed for ConstantFeed {
    async fn latest_round_data(&self) -> Result<RoundData> {
        Ok(RoundData {
            answer: self.answer,
            updated_at: self.updated_at,
        })
    }

    async fn decimals(&self) -> Result<u8> {
        Ok(self.decimals)
    }
}

/// Normalize a feed answer to 18-decimal fixed point.
///
/// Non-positive answers are rejected; feeds reporting more than 18 decimals
/// are scaled down with truncation toward zero.
pub fn normalize_price(answer: i128, feed_decimals: u8) -> Result<U256> {
    if answer <= 0 {
        return Err(OracleError::InvalidPrice { answer });
    }
    let raw = U256::from(answer as u128);
    let price = if feed_decimals <= 18 {
        raw * U256::from(10u64).pow(U256::from(18 - feed_decimals))
    } else {
        raw / U256::from(10u64).pow(U256::from(feed_decimals - 18))
    };
    Ok(price)
}

/// Check a round against the staleness bound.
pub fn check_freshness(round: &RoundData, now: u64, max_age_seconds: u64) -> Result<()> {
    let age = now.saturating_sub(round.updated_at);
    if age > max_age_seconds {
        return Err(OracleError::StalePriceFeed {
            age_seconds: age,
            max_age_seconds,
        });
    }
    Ok(())
}

/// Guard for safe-value publication: the aggregated oracle data feeding a
/// safe-value update must itself be recent.
pub fn check_oracle_freshness(updated_at: u64, now: u64, max_age_seconds: u64) -> Result<()> {
    let age = now.saturating_sub(updated_at);
    if age > max_age_seconds {
        return Err(OracleError::StaleOracleData {
            age_seconds: age,
            max_age_seconds,
        });
    }
    Ok(())
}
