//! Per-cycle price snapshot
//!
//! The rebuilder works against one immutable snapshot per cycle so every
//! event in the cycle sees the same prices.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use tracing::warn;

use crate::{check_freshness, normalize_price, PriceFeed, Result};

/// A resolved token price plus the token's own decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPrice {
    /// USD price in 18-decimal fixed point.
    pub price_18: U256,
    /// Native decimals of the token itself.
    pub token_decimals: u8,
}

impl TokenPrice {
    /// USD value of `amount` native units: `amount * price_18 / 10^token_decimals`.
    pub fn value_usd(&self, amount: U256) -> U256 {
        amount * self.price_18 / U256::from(10u64).pow(U256::from(self.token_decimals))
    }
}

/// One cycle's worth of resolved prices. Misses are recorded explicitly.
#[derive(Debug, Clone, Default)]
pub struct PriceCache {
    prices: HashMap<Address, Option<TokenPrice>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: Address, price: TokenPrice) {
        self.prices.insert(token, Some(price));
    }

    pub fn insert_miss(&mut self, token: Address) {
        self.prices.insert(token, None);
    }

    pub fn get(&self, token: &Address) -> Option<TokenPrice> {
        self.prices.get(token).copied().flatten()
    }

    /// USD value of `amount` of `token`, if the token was priced.
    pub fn value_usd(&self, token: &Address, amount: U256) -> Option<U256> {
        self.get(token).map(|p| p.value_usd(amount))
    }

    /// Whether every listed token resolved to a usable price.
    pub fn has_all_prices(&self, tokens: &[Address]) -> bool {
        tokens.iter().all(|t| self.get(t).is_some())
    }
}

/// Registered feed plus the token's own decimals.
struct FeedEntry {
    feed: Arc<dyn PriceFeed>,
    token_decimals: u8,
}

/// Registry of feeds keyed by token address.
#[derive(Default)]
pub struct FeedRegistry {
    feeds: HashMap<Address, FeedEntry>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, token: Address, feed: Arc<dyn PriceFeed>, token_decimals: u8) {
        self.feeds.insert(token, FeedEntry { feed, token_decimals });
    }

    /// Every token with a registered feed.
    pub fn tokens(&self) -> Vec<Address> {
        let mut tokens: Vec<Address> = self.feeds.keys().copied().collect();
        tokens.sort();
        tokens
    }

    /// Resolve a snapshot for the given tokens.
    ///
    /// A missing feed, invalid answer, or stale round records a miss for the
    /// token rather than failing the cycle: downstream ratio math falls back
    /// to amount weighting when any input token is unpriced.
    pub async fn snapshot(
        &self,
        tokens: &[Address],
        now: u64,
        max_age_seconds: u64,
    ) -> Result<PriceCache> {
        let mut cache = PriceCache::new();
        for token in tokens {
            if cache.prices.contains_key(token) {
                continue;
            }
            match self.resolve(token, now, max_age_seconds).await {
                Ok(price) => cache.insert(*token, price),
                Err(e) => {
                    warn!(token = %token, error = %e, "price unavailable, recording miss");
                    cache.insert_miss(*token);
                }
            }
        }
        Ok(cache)
    }

    async fn resolve(&self, token: &Address, now: u64, max_age_seconds: u64) -> Result<TokenPrice> {
        let entry = self
            .feeds
            .get(token)
            .ok_or_else(|| crate::OracleError::NoPriceFeedSet {
                token: format!("{token:#x}"),
            })?;
        let round = entry.feed.latest_round_data().await?;
        check_freshness(&round, now, max_age_seconds)?;
        let feed_decimals = entry.feed.decimals().await?;
        let price_18 = normalize_price(round.answer, feed_decimals)?;
        Ok(TokenPrice {
            price_18,
            token_decimals: entry.token_decimals,
        })
    }
}
