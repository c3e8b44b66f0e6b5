//! The event source: tip tracking, pagination, reorg detection

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_primitives::B256;
use tracing::{debug, info, warn};

use cordon_ledger::EventStore;
use cordon_types::CoreConfig;

use crate::{IndexerClient, Result, SubstrateClient};

/// Bounded cache of processed block hashes, oldest evicted first.
#[derive(Debug, Default)]
pub struct BlockHashCache {
    hashes: BTreeMap<u64, B256>,
    capacity: usize,
}

impl BlockHashCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            hashes: BTreeMap::new(),
            capacity,
        }
    }

    pub fn insert(&mut self, height: u64, hash: B256) {
        self.hashes.insert(height, hash);
        while self.hashes.len() > self.capacity {
            let Some(oldest) = self.hashes.keys().next().copied() else {
                break;
            };
            self.hashes.remove(&oldest);
        }
    }

    pub fn get(&self, height: u64) -> Option<B256> {
        self.hashes.get(&height).copied()
    }

    /// Drop every cached hash at or above `height`.
    pub fn drop_from(&mut self, height: u64) {
        self.hashes.split_off(&height);
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// What one poll accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Height a detected reorg rewound to, if any.
    pub rewound_to: Option<u64>,
    /// Range processed this poll, inclusive.
    pub processed: Option<(u64, u64)>,
    /// Events newly stored.
    pub ingested: usize,
    /// Events skipped as already stored (idempotent replay).
    pub replayed: usize,
}

/// Pulls events from the substrate into the ledger store.
pub struct EventSource<S: EventStore> {
    indexer: Option<IndexerClient>,
    client: Arc<dyn SubstrateClient>,
    store: Arc<S>,
    config: CoreConfig,
    hash_cache: BlockHashCache,
}

impl<S: EventStore> EventSource<S> {
    pub fn new(
        indexer: Option<IndexerClient>,
        client: Arc<dyn SubstrateClient>,
        store: Arc<S>,
        config: CoreConfig,
    ) -> Self {
        let hash_cache = BlockHashCache::new(config.max_block_hash_cache);
        Self {
            indexer,
            client,
            store,
            config,
            hash_cache,
        }
    }

    /// One poll: detect reorgs, then ingest up to the confirmed tip.
    pub async fn poll(&mut self) -> Result<PollOutcome> {
        let mut outcome = PollOutcome::default();

        if let Some(height) = self.detect_reorg().await? {
            warn!(height, "reorg detected, rewinding");
            let rewound_to = height.saturating_sub(1);
            self.hash_cache.drop_from(height);
            self.store.prune_from_block(height).await?;
            self.store.set_last_processed_block(rewound_to).await?;
            outcome.rewound_to = Some(rewound_to);
        }

        let tip = self.client.block_number().await?;
        let safe_tip = tip.saturating_sub(self.config.confirmation_blocks);
        let floor = safe_tip.saturating_sub(self.config.max_historical_blocks);

        let start = match self.store.last_processed_block().await? {
            Some(last) => (last + 1).max(floor),
            None => floor,
        };
        if start > safe_tip {
            return Ok(outcome);
        }

        let mut from = start;
        while from <= safe_tip {
            let to = (from + self.config.max_blocks_per_query - 1).min(safe_tip);
            let events = self.fetch_range(from, to).await?;
            for event in events {
                if self.store.upsert_event(event).await?.is_new() {
                    outcome.ingested += 1;
                } else {
                    outcome.replayed += 1;
                }
            }
            self.cache_hashes(from, to, safe_tip).await?;
            self.store.set_last_processed_block(to).await?;
            from = to + 1;
        }

        outcome.processed = Some((start, safe_tip));
        info!(
            from = start,
            to = safe_tip,
            ingested = outcome.ingested,
            replayed = outcome.replayed,
            "poll complete"
        );
        Ok(outcome)
    }

    /// Indexer first; direct substrate logs when the indexer is down.
    async fn fetch_range(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<cordon_types::ModuleEvent>> {
        if let Some(indexer) = &self.indexer {
            match indexer.module_events(from_block, to_block).await {
                Ok(events) => return Ok(events),
                Err(e) => {
                    warn!(error = %e, "indexer query failed, falling back to substrate logs");
                }
            }
        }
        self.client.module_events(from_block, to_block).await
    }

    /// Cache hashes for processed blocks near the tip. Blocks deeper than
    /// the cache capacity can never be re-checked, so their hashes are not
    /// fetched.
    async fn cache_hashes(&mut self, from: u64, to: u64, safe_tip: u64) -> Result<()> {
        let floor =
            safe_tip.saturating_sub((self.config.max_block_hash_cache as u64).saturating_sub(1));
        for height in from.max(floor)..=to {
            let hash = self.client.block_hash(height).await?;
            self.hash_cache.insert(height, hash);
        }
        Ok(())
    }

    /// Re-fetch the most recent `2 × confirmation_blocks` processed blocks
    /// and compare hashes. Returns the lowest mismatching height.
    async fn detect_reorg(&self) -> Result<Option<u64>> {
        let Some(last) = self.store.last_processed_block().await? else {
            return Ok(None);
        };
        let depth = self.config.confirmation_blocks * 2;
        let from = last.saturating_sub(depth.saturating_sub(1));
        for height in from..=last {
            let Some(cached) = self.hash_cache.get(height) else {
                continue;
            };
            let current = self.client.block_hash(height).await?;
            if current != cached {
                debug!(height, %cached, %current, "block hash mismatch");
                return Ok(Some(height));
            }
        }
        Ok(None)
    }
}
