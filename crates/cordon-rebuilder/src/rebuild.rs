//! Chronological event replay
//!
//! Events are replayed in `(timestamp, block_number, log_index)` order over
//! an extended lookback (twice the window), so acquisitions whose original
//! timestamp is outside the current window but whose inherited descendants
//! are inside it are still observed.

use alloy_primitives::{Address, U256};
use tracing::warn;

use cordon_oracle::PriceCache;
use cordon_types::{
    precision, sort_chronologically, ModuleEvent, OpType, ProtocolExecution, TransferExecuted,
};

use crate::{AcquiredEntry, DepositRecord, SpendingRecord, SubAccountState};

/// One input → output pairing used to build deposit records.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pairing {
    token_in: Address,
    input_share: U256,
    token_out: Address,
    output_share: U256,
}

/// Rebuilds [`SubAccountState`] from a chronological event log.
#[derive(Debug, Clone)]
pub struct Rebuilder {
    window: u64,
}

impl Rebuilder {
    pub fn new(window_duration_seconds: u64) -> Self {
        Self {
            window: window_duration_seconds,
        }
    }

    pub fn window(&self) -> u64 {
        self.window
    }

    /// Replay `events` for `sub_account` and produce its state at `now`.
    ///
    /// Deterministic: the same log always yields the same state.
    pub fn rebuild(
        &self,
        sub_account: Address,
        events: &[ModuleEvent],
        prices: &PriceCache,
        now: u64,
    ) -> SubAccountState {
        let mut ordered: Vec<ModuleEvent> = events
            .iter()
            .filter(|e| e.sub_account() == Some(sub_account))
            .cloned()
            .collect();
        sort_chronologically(&mut ordered);

        let mut state = SubAccountState::new(sub_account);
        for event in &ordered {
            match event {
                ModuleEvent::Protocol(e) => {
                    if let Err(err) = e.validate() {
                        warn!(error = %err, tx_hash = %e.chain.tx_hash, log_index = e.chain.log_index,
                              "skipping malformed protocol event");
                        continue;
                    }
                    match e.op_type {
                        OpType::Swap | OpType::Deposit => {
                            self.apply_swap_or_deposit(&mut state, e, prices, now)
                        }
                        OpType::Withdraw | OpType::Claim => {
                            self.apply_withdraw_or_claim(&mut state, e)
                        }
                        // Guard-only; touches neither queues nor spending.
                        OpType::Approve => {}
                    }
                }
                ModuleEvent::Transfer(e) => self.apply_transfer(&mut state, e, now),
                _ => {}
            }
        }

        // Final pruning must filter every position: timestamp inheritance
        // makes the queues non-monotonic in original_timestamp.
        let cutoff = now.saturating_sub(self.window);
        state.acquired_balances = state
            .queues
            .iter_mut()
            .map(|(token, queue)| {
                queue.prune_expired(cutoff);
                (*token, queue.total())
            })
            .filter(|(_, total)| !total.is_zero())
            .collect();
        state
    }

    fn record_spending(&self, state: &mut SubAccountState, cost: U256, ts: u64, now: u64) {
        if ts >= now.saturating_sub(self.window) && ts <= now {
            state.total_spending_in_window += cost;
            state.spending_records.push(SpendingRecord { cost, timestamp: ts });
        }
    }

    fn apply_swap_or_deposit(
        &self,
        state: &mut SubAccountState,
        event: &ProtocolExecution,
        prices: &PriceCache,
        now: u64,
    ) {
        let ts = event.chain.timestamp;
        self.record_spending(state, event.spending_cost, ts, now);

        let inputs: Vec<(Address, U256)> = event
            .tokens_in
            .iter()
            .zip(event.amounts_in.iter())
            .filter(|(_, amount)| !amount.is_zero())
            .map(|(token, amount)| (*token, *amount))
            .collect();
        let outputs: Vec<(Address, U256)> = event
            .tokens_out
            .iter()
            .zip(event.amounts_out.iter())
            .filter(|(_, amount)| !amount.is_zero())
            .map(|(token, amount)| (*token, *amount))
            .collect();

        let input_tokens: Vec<Address> = inputs.iter().map(|(t, _)| *t).collect();
        let has_all_prices = prices.has_all_prices(&input_tokens);

        let mut total_amount_in = U256::ZERO;
        let mut total_consumed = U256::ZERO;
        let mut total_value_in_usd = U256::ZERO;
        let mut consumed_value_usd = U256::ZERO;
        let mut consumed_entries: Vec<AcquiredEntry> = Vec::new();

        for (token, amount) in &inputs {
            let consumption = state
                .queues
                .entry(*token)
                .or_default()
                .consume(*amount, ts, self.window);
            let consumed = consumption.consumed_total();
            total_amount_in += *amount;
            total_consumed += consumed;
            if has_all_prices {
                if let Some(price) = prices.get(token) {
                    total_value_in_usd += price.value_usd(*amount);
                    consumed_value_usd += price.value_usd(consumed);
                }
            }
            consumed_entries.extend(consumption.consumed);
        }

        // USD-weighted when every input is priced; otherwise raw amounts.
        let one = precision();
        let acquired_ratio = if has_all_prices && !total_value_in_usd.is_zero() {
            consumed_value_usd * one / total_value_in_usd
        } else if !total_amount_in.is_zero() {
            total_consumed * one / total_amount_in
        } else {
            U256::ZERO
        };

        for (token_out, amount_out) in &outputs {
            let from_acquired = *amount_out * acquired_ratio / one;
            let from_non_acquired = *amount_out - from_acquired;

            if !from_acquired.is_zero() && !total_consumed.is_zero() {
                let queue = state.queues.entry(*token_out).or_default();
                let mut allocated = U256::ZERO;
                let last = consumed_entries.len() - 1;
                for (i, entry) in consumed_entries.iter().enumerate() {
                    // The last consumed entry takes the remainder so the
                    // appended amounts sum exactly to the acquired portion.
                    let portion = if i == last {
                        from_acquired - allocated
                    } else {
                        from_acquired * entry.amount / total_consumed
                    };
                    allocated += portion;
                    queue.push_back(AcquiredEntry {
                        amount: portion,
                        original_timestamp: entry.original_timestamp,
                    });
                }
            }
            if !from_non_acquired.is_zero() {
                state.queues.entry(*token_out).or_default().push_back(AcquiredEntry {
                    amount: from_non_acquired,
                    original_timestamp: ts,
                });
            }
        }

        let oldest_consumed_ts = consumed_entries
            .iter()
            .map(|e| e.original_timestamp)
            .min()
            .unwrap_or(ts);
        for pairing in pair_inputs_outputs(&inputs, &outputs, prices) {
            let acquired_in = pairing.input_share * acquired_ratio / one;
            let non_acquired_in = pairing.input_share - acquired_in;
            let acquired_out = pairing.output_share * acquired_ratio / one;
            let non_acquired_out = pairing.output_share - acquired_out;

            if !acquired_in.is_zero() && !non_acquired_in.is_zero() {
                // Mixed acquisition: one record per side, each with its own
                // provenance timestamp.
                state.deposit_records.push(DepositRecord::new(
                    event.sub_account,
                    event.target,
                    pairing.token_in,
                    acquired_in,
                    pairing.token_out,
                    acquired_out,
                    oldest_consumed_ts,
                ));
                state.deposit_records.push(DepositRecord::new(
                    event.sub_account,
                    event.target,
                    pairing.token_in,
                    non_acquired_in,
                    pairing.token_out,
                    non_acquired_out,
                    ts,
                ));
            } else if !acquired_in.is_zero() {
                state.deposit_records.push(DepositRecord::new(
                    event.sub_account,
                    event.target,
                    pairing.token_in,
                    pairing.input_share,
                    pairing.token_out,
                    pairing.output_share,
                    oldest_consumed_ts,
                ));
            } else {
                state.deposit_records.push(DepositRecord::new(
                    event.sub_account,
                    event.target,
                    pairing.token_in,
                    pairing.input_share,
                    pairing.token_out,
                    pairing.output_share,
                    ts,
                ));
            }
        }
    }

    fn apply_withdraw_or_claim(&self, state: &mut SubAccountState, event: &ProtocolExecution) {
        let ts = event.chain.timestamp;

        for (token_out, amount_out) in event.tokens_out.iter().zip(event.amounts_out.iter()) {
            if amount_out.is_zero() {
                continue;
            }
            let mut remaining = *amount_out;
            let mut matched: Vec<(U256, u64)> = Vec::new();

            for record in state.deposit_records.iter_mut() {
                if remaining.is_zero() {
                    break;
                }
                if !record.matches(event.target, *token_out) {
                    continue;
                }
                let take = remaining.min(record.remaining_amount);
                record.remaining_amount -= take;

                // The deposit's output token (e.g. the receipt token minted
                // at deposit) is consumed back out of its queue in
                // proportion to the matched input.
                if !record.amount_in.is_zero() {
                    let requested = (record.amount_out * take / record.amount_in)
                        .min(record.remaining_output_amount);
                    if !requested.is_zero() {
                        let consumption = state
                            .queues
                            .entry(record.token_out)
                            .or_default()
                            .consume(requested, ts, self.window);
                        // Only the actual consumption counts: the queue may
                        // have been shrunk by an external balance update, and
                        // the deposit then stays partially open.
                        record.remaining_output_amount -= consumption.consumed_total();
                    }
                }

                // Each deposit contributes its own timestamp; they are not
                // collapsed to the oldest.
                matched.push((take, record.original_acquisition_timestamp));
                remaining -= take;
            }

            let queue = state.queues.entry(*token_out).or_default();
            for (amount, inherited_ts) in matched {
                queue.push_back(AcquiredEntry {
                    amount,
                    original_timestamp: inherited_ts,
                });
            }

            if !remaining.is_zero() && event.op_type == OpType::Claim {
                // A claim against a target we have deposited into is yield on
                // that position: acquired, with the oldest deposit's
                // provenance. Without any such deposit it is untracked.
                if let Some(oldest) = state
                    .deposit_records
                    .iter()
                    .filter(|r| r.target == event.target)
                    .map(|r| r.original_acquisition_timestamp)
                    .min()
                {
                    queue.push_back(AcquiredEntry {
                        amount: remaining,
                        original_timestamp: oldest,
                    });
                }
            }
            // Withdraw remainder: deposited outside the tracked history or
            // by a different principal; never acquired.
        }
    }

    fn apply_transfer(&self, state: &mut SubAccountState, event: &TransferExecuted, now: u64) {
        let ts = event.chain.timestamp;
        self.record_spending(state, event.spending_cost, ts, now);
        state
            .queues
            .entry(event.token)
            .or_default()
            .consume(event.amount, ts, self.window);
    }
}

/// Pair inputs with outputs for deposit-record creation.
///
/// N inputs → 1 output: each input carries an equal 1/N share of the output,
/// last share takes the remainder. 1 input → M outputs: the input is
/// allocated across outputs by USD value (equal split when unpriced), last
/// output takes the remainder. Otherwise inputs pair with the output at the
/// same index, falling back to index 0.
fn pair_inputs_outputs(
    inputs: &[(Address, U256)],
    outputs: &[(Address, U256)],
    prices: &PriceCache,
) -> Vec<Pairing> {
    if inputs.is_empty() || outputs.is_empty() {
        return Vec::new();
    }

    if outputs.len() == 1 {
        let (token_out, amount_out) = outputs[0];
        let n = U256::from(inputs.len());
        let share = amount_out / n;
        let last = inputs.len() - 1;
        return inputs
            .iter()
            .enumerate()
            .map(|(i, (token_in, amount_in))| Pairing {
                token_in: *token_in,
                input_share: *amount_in,
                token_out,
                output_share: if i == last {
                    amount_out - share * U256::from(last)
                } else {
                    share
                },
            })
            .collect();
    }

    if inputs.len() == 1 {
        let (token_in, amount_in) = inputs[0];
        let values: Option<Vec<U256>> = outputs
            .iter()
            .map(|(token, amount)| prices.value_usd(token, *amount))
            .collect();
        let total_value = values
            .as_ref()
            .map(|v| v.iter().copied().sum::<U256>())
            .unwrap_or(U256::ZERO);

        let mut allocated = U256::ZERO;
        let last = outputs.len() - 1;
        return outputs
            .iter()
            .enumerate()
            .map(|(j, (token_out, amount_out))| {
                let input_share = if j == last {
                    amount_in - allocated
                } else if let (Some(values), false) = (&values, total_value.is_zero()) {
                    amount_in * values[j] / total_value
                } else {
                    amount_in / U256::from(outputs.len())
                };
                allocated += input_share;
                Pairing {
                    token_in,
                    input_share,
                    token_out: *token_out,
                    output_share: *amount_out,
                }
            })
            .collect();
    }

    inputs
        .iter()
        .enumerate()
        .map(|(i, (token_in, amount_in))| {
            let (token_out, amount_out) = outputs.get(i).copied().unwrap_or(outputs[0]);
            Pairing {
                token_in: *token_in,
                input_share: *amount_in,
                token_out,
                output_share: amount_out,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cordon_oracle::TokenPrice;

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    #[test]
    fn two_inputs_one_output_split_equally() {
        let prices = PriceCache::new();
        let pairings = pair_inputs_outputs(
            &[(addr(1), U256::from(100u64)), (addr(2), U256::from(200u64))],
            &[(addr(3), U256::from(50u64))],
            &prices,
        );
        assert_eq!(pairings.len(), 2);
        assert_eq!(pairings[0].input_share, U256::from(100u64));
        assert_eq!(pairings[0].output_share, U256::from(25u64));
        assert_eq!(pairings[1].input_share, U256::from(200u64));
        assert_eq!(pairings[1].output_share, U256::from(25u64));
    }

    #[test]
    fn odd_output_remainder_lands_on_last_input() {
        let prices = PriceCache::new();
        let pairings = pair_inputs_outputs(
            &[
                (addr(1), U256::from(1u64)),
                (addr(2), U256::from(1u64)),
                (addr(3), U256::from(1u64)),
            ],
            &[(addr(4), U256::from(100u64))],
            &prices,
        );
        let shares: Vec<U256> = pairings.iter().map(|p| p.output_share).collect();
        assert_eq!(shares, vec![U256::from(33u64), U256::from(33u64), U256::from(34u64)]);
    }

    #[test]
    fn one_input_many_outputs_weighted_by_usd_value() {
        let mut prices = PriceCache::new();
        // 18-decimal tokens priced at $3 and $1.
        prices.insert(
            addr(2),
            TokenPrice {
                price_18: U256::from(3u64) * precision(),
                token_decimals: 18,
            },
        );
        prices.insert(
            addr(3),
            TokenPrice {
                price_18: precision(),
                token_decimals: 18,
            },
        );

        let pairings = pair_inputs_outputs(
            &[(addr(1), U256::from(400u64))],
            &[(addr(2), U256::from(100u64)), (addr(3), U256::from(100u64))],
            &prices,
        );
        // $300 vs $100 of value: 3/4 and 1/4 of the input.
        assert_eq!(pairings[0].input_share, U256::from(300u64));
        assert_eq!(pairings[1].input_share, U256::from(100u64));
    }

    #[test]
    fn one_input_many_outputs_equal_fallback_with_exact_remainder() {
        let prices = PriceCache::new();
        let pairings = pair_inputs_outputs(
            &[(addr(1), U256::from(100u64))],
            &[
                (addr(2), U256::from(10u64)),
                (addr(3), U256::from(10u64)),
                (addr(4), U256::from(10u64)),
            ],
            &prices,
        );
        let shares: Vec<U256> = pairings.iter().map(|p| p.input_share).collect();
        assert_eq!(shares, vec![U256::from(33u64), U256::from(33u64), U256::from(34u64)]);
        let total: U256 = shares.iter().copied().sum();
        assert_eq!(total, U256::from(100u64));
    }

    #[test]
    fn index_pairing_falls_back_to_first_output() {
        let prices = PriceCache::new();
        let pairings = pair_inputs_outputs(
            &[
                (addr(1), U256::from(10u64)),
                (addr(2), U256::from(20u64)),
                (addr(3), U256::from(30u64)),
            ],
            &[(addr(4), U256::from(5u64)), (addr(5), U256::from(6u64))],
            &prices,
        );
        assert_eq!(pairings[0].token_out, addr(4));
        assert_eq!(pairings[1].token_out, addr(5));
        assert_eq!(pairings[2].token_out, addr(4));
    }

    #[test]
    fn no_pairings_without_inputs_or_outputs() {
        let prices = PriceCache::new();
        assert!(pair_inputs_outputs(&[], &[(addr(1), U256::from(1u64))], &prices).is_empty());
        assert!(pair_inputs_outputs(&[(addr(1), U256::from(1u64))], &[], &prices).is_empty());
    }
}
