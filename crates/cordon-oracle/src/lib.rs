//! Cordon Oracle - Token price resolution for USD-weighted accounting
//!
//! Resolves token prices to 18-decimal fixed point for the rebuilder's
//! weighted ratio splits. A feed is polymorphic over exactly two
//! capabilities: `latest_round_data` and `decimals`.
//!
//! Misses are as important as hits: a token without a usable price is
//! recorded in the cycle snapshot so ratio computation can fall back to
//! amount weighting instead of silently mispricing.

pub mod cache;
pub mod feed;

pub use cache::*;
pub use feed::*;

use thiserror::Error;

/// Errors that can occur resolving prices
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("No price feed set for token {token}")]
    NoPriceFeedSet { token: String },

    #[error("Invalid price: feed answered {answer}")]
    InvalidPrice { answer: i128 },

    #[error("Stale price feed: age {age_seconds}s exceeds {max_age_seconds}s")]
    StalePriceFeed {
        age_seconds: u64,
        max_age_seconds: u64,
    },

    #[error("Stale oracle data: age {age_seconds}s exceeds {max_age_seconds}s")]
    StaleOracleData {
        age_seconds: u64,
        max_age_seconds: u64,
    },

    #[error("Feed error: {message}")]
    Feed { message: String },
}

pub type Result<T> = std::result::Result<T, OracleError>;
