//! Substrate state view derived from the event log
//!
//! The substrate's current allowance and acquired-balance slots are the fold
//! of its own update events, so the ledger store already holds everything the
//! planner needs to compare against. Folding the log avoids a second RPC
//! surface and stays consistent with reorg rewinds for free.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::Address;
use async_trait::async_trait;

use cordon_allowance::{
    AllowanceError, OnChainAccountState, Result as AllowanceResult, SafeValue, StateReader,
};
use cordon_ledger::EventStore;
use cordon_types::ModuleEvent;

pub struct StoreStateReader<S: EventStore> {
    store: Arc<S>,
}

impl<S: EventStore> StoreStateReader<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

fn backend(e: cordon_ledger::LedgerError) -> AllowanceError {
    AllowanceError::Submission {
        message: e.to_string(),
    }
}

#[async_trait]
impl<S: EventStore> StateReader for StoreStateReader<S> {
    async fn safe_value(&self) -> AllowanceResult<SafeValue> {
        let event = self
            .store
            .latest_safe_value()
            .await
            .map_err(backend)?
            .ok_or_else(|| AllowanceError::StalePortfolioValue {
                age_seconds: u64::MAX,
                max_age_seconds: 0,
            })?;
        Ok(SafeValue {
            total_value_usd: event.total_value_usd,
            updated_at: event.chain.timestamp,
        })
    }

    async fn account_state(&self, sub_account: Address) -> AllowanceResult<OnChainAccountState> {
        let events = self
            .store
            .events_for_sub_account(sub_account, 0, u64::MAX)
            .await
            .map_err(backend)?;

        // Chronological fold: the last write per slot wins.
        let mut state = OnChainAccountState::default();
        let mut balances: HashMap<Address, _> = HashMap::new();
        for event in events {
            match event {
                ModuleEvent::AllowanceUpdated(e) => state.allowance = e.new_allowance,
                ModuleEvent::AcquiredBalance(e) => {
                    balances.insert(e.token, e.new_balance);
                }
                _ => {}
            }
        }
        state.acquired_balances = balances
            .into_iter()
            .filter(|(_, balance)| !balance.is_zero())
            .collect();
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{B256, U256};
    use cordon_ledger::MemoryEventStore;
    use cordon_types::{AcquiredBalanceUpdated, ChainRef, SafeValueUpdated, SpendingAllowanceUpdated};

    fn chain(timestamp: u64, seq: u8) -> ChainRef {
        ChainRef {
            block_number: timestamp / 12,
            tx_hash: B256::repeat_byte(seq),
            log_index: 0,
            timestamp,
        }
    }

    #[tokio::test]
    async fn folds_latest_slot_values() {
        let store = Arc::new(MemoryEventStore::new());
        let sub = Address::repeat_byte(0xaa);
        let token = Address::repeat_byte(1);

        store
            .upsert_event(ModuleEvent::AllowanceUpdated(SpendingAllowanceUpdated {
                sub_account: sub,
                new_allowance: U256::from(100u64),
                chain: chain(1_000, 1),
            }))
            .await
            .unwrap();
        store
            .upsert_event(ModuleEvent::AllowanceUpdated(SpendingAllowanceUpdated {
                sub_account: sub,
                new_allowance: U256::from(80u64),
                chain: chain(2_000, 2),
            }))
            .await
            .unwrap();
        store
            .upsert_event(ModuleEvent::AcquiredBalance(AcquiredBalanceUpdated {
                sub_account: sub,
                token,
                new_balance: U256::from(55u64),
                chain: chain(1_500, 3),
            }))
            .await
            .unwrap();
        store
            .upsert_event(ModuleEvent::SafeValue(SafeValueUpdated {
                total_value_usd: U256::from(1_000_000u64),
                update_count: 7,
                chain: chain(2_500, 4),
            }))
            .await
            .unwrap();

        let reader = StoreStateReader::new(store);
        let state = reader.account_state(sub).await.unwrap();
        assert_eq!(state.allowance, U256::from(80u64));
        assert_eq!(state.acquired_balances.get(&token), Some(&U256::from(55u64)));

        let safe = reader.safe_value().await.unwrap();
        assert_eq!(safe.total_value_usd, U256::from(1_000_000u64));
        assert_eq!(safe.updated_at, 2_500);
    }

    #[tokio::test]
    async fn missing_safe_value_is_an_error() {
        let store = Arc::new(MemoryEventStore::new());
        let reader = StoreStateReader::new(store);
        assert!(reader.safe_value().await.is_err());
    }

    #[tokio::test]
    async fn zeroed_slots_are_dropped_from_the_view() {
        let store = Arc::new(MemoryEventStore::new());
        let sub = Address::repeat_byte(0xaa);
        let token = Address::repeat_byte(1);

        store
            .upsert_event(ModuleEvent::AcquiredBalance(AcquiredBalanceUpdated {
                sub_account: sub,
                token,
                new_balance: U256::from(55u64),
                chain: chain(1_000, 1),
            }))
            .await
            .unwrap();
        store
            .upsert_event(ModuleEvent::AcquiredBalance(AcquiredBalanceUpdated {
                sub_account: sub,
                token,
                new_balance: U256::ZERO,
                chain: chain(2_000, 2),
            }))
            .await
            .unwrap();

        let reader = StoreStateReader::new(store);
        let state = reader.account_state(sub).await.unwrap();
        assert!(state.acquired_balances.is_empty());
    }
}
