//! Cordon Ledger - Append-only event persistence
//!
//! The ledger store is:
//! - Append-only (events are never mutated in place)
//! - Idempotent (keyed by `(tx_hash, log_index)`; re-ingest is a no-op)
//! - Chronological (readers receive `(timestamp, block_number, log_index)` order)
//! - Reorg-aware (events at or above a rewound height can be pruned and
//!   re-ingested from the canonical chain)
//!
//! # Invariants
//!
//! 1. At most one stored event per `(tx_hash, log_index)`
//! 2. Pruning at height `h` removes every event with `block_number >= h`
//! 3. The processing cursor only moves through `set_last_processed_block`

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use cordon_types::{sort_chronologically, ModuleEvent, SafeValueUpdated};

/// Errors that can occur in ledger store operations
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Storage backend error: {message}")]
    Backend { message: String },
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Outcome of an upsert: whether the event was new.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    AlreadyStored,
}

impl UpsertOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted)
    }
}

/// Persistence seam for the event pipeline.
///
/// Implemented in-memory here and on PostgreSQL in `cordon-db`.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Store an event if its `(tx_hash, log_index)` key is unseen.
    async fn upsert_event(&self, event: ModuleEvent) -> Result<UpsertOutcome>;

    /// All events for a sub-account with `timestamp` in `[from_ts, to_ts]`,
    /// in chronological order.
    async fn events_for_sub_account(
        &self,
        sub_account: Address,
        from_ts: u64,
        to_ts: u64,
    ) -> Result<Vec<ModuleEvent>>;

    /// Sub-accounts that have any stored account-scoped event.
    async fn known_sub_accounts(&self) -> Result<Vec<Address>>;

    /// The most recent safe-value event, if any was ingested.
    async fn latest_safe_value(&self) -> Result<Option<SafeValueUpdated>>;

    /// Remove every event at or above `height`. Returns the removed count.
    async fn prune_from_block(&self, height: u64) -> Result<usize>;

    async fn last_processed_block(&self) -> Result<Option<u64>>;

    async fn set_last_processed_block(&self, height: u64) -> Result<()>;
}

/// In-memory event store.
///
/// Thread-safe and designed for concurrent access; the backing map is keyed
/// by the idempotence key so replays cost one lookup.
#[derive(Clone, Default)]
pub struct MemoryEventStore {
    inner: Arc<RwLock<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    events: HashMap<(B256, u64), ModuleEvent>,
    last_processed_block: Option<u64>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored events, for cycle diagnostics.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.events.len()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn upsert_event(&self, event: ModuleEvent) -> Result<UpsertOutcome> {
        let key = event.event_key();
        let mut state = self.inner.write().await;
        if state.events.contains_key(&key) {
            debug!(tx_hash = %key.0, log_index = key.1, "event already stored, skipping");
            return Ok(UpsertOutcome::AlreadyStored);
        }
        state.events.insert(key, event);
        Ok(UpsertOutcome::Inserted)
    }

    async fn events_for_sub_account(
        &self,
        sub_account: Address,
        from_ts: u64,
        to_ts: u64,
    ) -> Result<Vec<ModuleEvent>> {
        let state = self.inner.read().await;
        let mut events: Vec<ModuleEvent> = state
            .events
            .values()
            .filter(|e| e.sub_account() == Some(sub_account))
            .filter(|e| {
                let ts = e.chain().timestamp;
                ts >= from_ts && ts <= to_ts
            })
            .cloned()
            .collect();
        sort_chronologically(&mut events);
        Ok(events)
    }

    async fn known_sub_accounts(&self) -> Result<Vec<Address>> {
        let state = self.inner.read().await;
        let mut subs: Vec<Address> = state
            .events
            .values()
            .filter_map(|e| e.sub_account())
            .collect();
        subs.sort();
        subs.dedup();
        Ok(subs)
    }

    async fn latest_safe_value(&self) -> Result<Option<SafeValueUpdated>> {
        let state = self.inner.read().await;
        Ok(state
            .events
            .values()
            .filter_map(|e| match e {
                ModuleEvent::SafeValue(v) => Some(v.clone()),
                _ => None,
            })
            .max_by_key(|v| v.chain.ordering_key()))
    }

    async fn prune_from_block(&self, height: u64) -> Result<usize> {
        let mut state = self.inner.write().await;
        let before = state.events.len();
        state.events.retain(|_, e| e.chain().block_number < height);
        let removed = before - state.events.len();
        if removed > 0 {
            debug!(height, removed, "pruned events from rewound blocks");
        }
        Ok(removed)
    }

    async fn last_processed_block(&self) -> Result<Option<u64>> {
        Ok(self.inner.read().await.last_processed_block)
    }

    async fn set_last_processed_block(&self, height: u64) -> Result<()> {
        self.inner.write().await.last_processed_block = Some(height);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use cordon_types::{ChainRef, TransferExecuted};

    fn transfer_event(block_number: u64, log_index: u64, timestamp: u64) -> ModuleEvent {
        ModuleEvent::Transfer(TransferExecuted {
            sub_account: Address::repeat_byte(0xaa),
            token: Address::repeat_byte(0x01),
            recipient: Address::repeat_byte(0x02),
            amount: U256::from(100u64),
            spending_cost: U256::from(5u64),
            chain: ChainRef {
                block_number,
                tx_hash: B256::repeat_byte(block_number as u8),
                log_index,
                timestamp,
            },
        })
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = MemoryEventStore::new();
        let event = transfer_event(10, 0, 1_000);

        assert!(store.upsert_event(event.clone()).await.unwrap().is_new());
        assert!(!store.upsert_event(event).await.unwrap().is_new());
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn reads_are_chronological() {
        let store = MemoryEventStore::new();
        store.upsert_event(transfer_event(12, 1, 1_200)).await.unwrap();
        store.upsert_event(transfer_event(10, 0, 1_000)).await.unwrap();
        store.upsert_event(transfer_event(11, 3, 1_000)).await.unwrap();

        let events = store
            .events_for_sub_account(Address::repeat_byte(0xaa), 0, u64::MAX)
            .await
            .unwrap();
        let stamps: Vec<u64> = events.iter().map(|e| e.chain().timestamp).collect();
        assert_eq!(stamps, vec![1_000, 1_000, 1_200]);
        assert_eq!(events[0].chain().block_number, 10);
        assert_eq!(events[1].chain().block_number, 11);
    }

    #[tokio::test]
    async fn window_filter_is_inclusive() {
        let store = MemoryEventStore::new();
        store.upsert_event(transfer_event(10, 0, 1_000)).await.unwrap();
        store.upsert_event(transfer_event(11, 0, 2_000)).await.unwrap();
        store.upsert_event(transfer_event(12, 0, 3_000)).await.unwrap();

        let events = store
            .events_for_sub_account(Address::repeat_byte(0xaa), 1_000, 2_000)
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn prune_removes_at_and_above_height() {
        let store = MemoryEventStore::new();
        store.upsert_event(transfer_event(10, 0, 1_000)).await.unwrap();
        store.upsert_event(transfer_event(11, 0, 1_100)).await.unwrap();
        store.upsert_event(transfer_event(12, 0, 1_200)).await.unwrap();

        let removed = store.prune_from_block(11).await.unwrap();
        assert_eq!(removed, 2);

        let events = store
            .events_for_sub_account(Address::repeat_byte(0xaa), 0, u64::MAX)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].chain().block_number, 10);
    }

    #[tokio::test]
    async fn pruned_event_can_be_reingested() {
        let store = MemoryEventStore::new();
        let event = transfer_event(11, 0, 1_100);
        store.upsert_event(event.clone()).await.unwrap();
        store.prune_from_block(11).await.unwrap();

        assert!(store.upsert_event(event).await.unwrap().is_new());
    }

    #[tokio::test]
    async fn cursor_round_trip() {
        let store = MemoryEventStore::new();
        assert_eq!(store.last_processed_block().await.unwrap(), None);
        store.set_last_processed_block(1_047).await.unwrap();
        assert_eq!(store.last_processed_block().await.unwrap(), Some(1_047));
    }
}
