//! FIFO acquired-balance queues with timestamp inheritance
//!
//! Consumption order is queue order (oldest entry first). The queue is NOT
//! sorted by `original_timestamp`: a swap may append entries whose inherited
//! timestamp is older than the current tail, so expiry pruning must filter
//! every position, not only the front.

use std::collections::VecDeque;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// A single atom of previously-acquired balance for one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquiredEntry {
    pub amount: U256,
    /// Event time at which this amount first entered the queue from
    /// non-acquired funds; inherited across swaps and deposit matches.
    pub original_timestamp: u64,
}

/// Result of consuming from a queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Consumption {
    /// Consumed slices, each preserving its original timestamp.
    pub consumed: Vec<AcquiredEntry>,
    /// Unfulfilled remainder. Not an error: it means the input came from
    /// non-acquired (original) funds.
    pub shortfall: U256,
}

impl Consumption {
    pub fn consumed_total(&self) -> U256 {
        self.consumed.iter().map(|e| e.amount).sum()
    }

    pub fn oldest_timestamp(&self) -> Option<u64> {
        self.consumed.iter().map(|e| e.original_timestamp).min()
    }
}

/// FIFO of acquired entries for one `(sub-account, token)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquiredQueue {
    entries: VecDeque<AcquiredEntry>,
}

impl AcquiredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry; zero amounts are dropped.
    pub fn push_back(&mut self, entry: AcquiredEntry) {
        if !entry.amount.is_zero() {
            self.entries.push_back(entry);
        }
    }

    /// Consume up to `amount` from the head of the queue.
    ///
    /// Heads that expired before `event_ts` are dropped without being
    /// consumed: they were never acquired balance at event time. A partially
    /// consumed head is decremented in place.
    pub fn consume(&mut self, amount: U256, event_ts: u64, window: u64) -> Consumption {
        let cutoff = event_ts.saturating_sub(window);
        let mut remaining = amount;
        let mut consumed = Vec::new();

        while !remaining.is_zero() {
            let Some(head) = self.entries.front_mut() else {
                break;
            };
            if head.original_timestamp < cutoff {
                self.entries.pop_front();
                continue;
            }
            let take = head.amount.min(remaining);
            consumed.push(AcquiredEntry {
                amount: take,
                original_timestamp: head.original_timestamp,
            });
            remaining -= take;
            if take == head.amount {
                self.entries.pop_front();
            } else {
                head.amount -= take;
            }
        }

        Consumption {
            consumed,
            shortfall: remaining,
        }
    }

    /// Remove every expired entry, at any position.
    pub fn prune_expired(&mut self, cutoff: u64) {
        self.entries.retain(|e| e.original_timestamp >= cutoff);
    }

    /// Sum of all entries currently in the queue.
    pub fn total(&self) -> U256 {
        self.entries.iter().map(|e| e.amount).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AcquiredEntry> {
        self.entries.iter()
    }
}
