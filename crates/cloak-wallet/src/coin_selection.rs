//! Coin selection for payments and consolidation.
//!
//! For a payment of `target`, candidates split into `too_large` (value above
//! the target) and `poolable` coins. With `surplus = sum(poolable) - target`:
//!
//! - `surplus > threshold`: greedy, smallest coins first until the target is met
//! - `0 < surplus <= threshold`: drop an exact subset summing to `surplus`
//!   (0/1 knapsack) so the rest pays the target exactly; without an exact
//!   subset, drop the largest subset that still fits under the surplus
//! - `surplus == 0`: spend every poolable coin
//! - `surplus < 0`: spend the single smallest `too_large` coin
//!
//! A selection larger than the per-transaction input cap is retried
//! largest-first before giving up with `TxSizeExceeded`.

use cloak_core::constants::{GREEDY_SURPLUS_THRESHOLD, MAX_SURPLUS_THRESHOLD};
use cloak_core::types::Coin;

use crate::error::WalletError;

/// What a selection has to cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionTarget {
    /// Pay at least this many nano-coins.
    Amount(u64),
    /// Take as many of the largest coins as one transaction allows.
    Consolidate,
}

/// Coins chosen as inputs and their combined value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoinSelection {
    pub chosen: Vec<Coin>,
    pub total_value: u64,
}

impl CoinSelection {
    fn from_coins(chosen: Vec<Coin>) -> Self {
        let total_value = Coin::total_value(&chosen);
        Self { chosen, total_value }
    }

    pub fn is_empty(&self) -> bool {
        self.chosen.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chosen.len()
    }
}

/// Deterministic coin selector.
#[derive(Debug, Clone, Copy)]
pub struct CoinSelector {
    surplus_threshold: u64,
}

impl Default for CoinSelector {
    fn default() -> Self {
        Self::new(GREEDY_SURPLUS_THRESHOLD)
    }
}

impl CoinSelector {
    /// `surplus_threshold` is the largest surplus still solved exactly,
    /// clamped to [`MAX_SURPLUS_THRESHOLD`].
    pub fn new(surplus_threshold: u64) -> Self {
        Self {
            surplus_threshold: surplus_threshold.min(MAX_SURPLUS_THRESHOLD),
        }
    }

    /// Choose inputs from `candidates`.
    ///
    /// The result is a pure function of the candidate order and values.
    pub fn select(
        &self,
        candidates: &[Coin],
        target: SelectionTarget,
        max_count: usize,
    ) -> Result<CoinSelection, WalletError> {
        let target = match target {
            SelectionTarget::Consolidate => return Ok(largest_up_to(candidates, max_count)),
            SelectionTarget::Amount(0) => return Ok(CoinSelection::default()),
            SelectionTarget::Amount(t) => t,
        };

        let have = sum(candidates);
        if have < target as u128 {
            return Err(WalletError::InsufficientFunds {
                have: u64::try_from(have).unwrap_or(u64::MAX),
                need: target,
            });
        }

        let chosen = self.primary(candidates, target);
        if chosen.len() <= max_count {
            return Ok(CoinSelection::from_coins(chosen));
        }

        let fallback = largest_first(candidates, target);
        if fallback.len() <= max_count {
            return Ok(CoinSelection::from_coins(fallback));
        }
        Err(WalletError::TxSizeExceeded {
            needed: fallback.len(),
            max: max_count,
        })
    }

    fn primary(&self, candidates: &[Coin], target: u64) -> Vec<Coin> {
        let (too_large, poolable): (Vec<&Coin>, Vec<&Coin>) =
            candidates.iter().partition(|c| c.value > target);
        let pool_sum = poolable.iter().map(|c| c.value as u128).sum::<u128>();
        let target_wide = target as u128;

        if pool_sum < target_wide {
            // Funds are sufficient, so a too-large coin exists.
            return too_large
                .iter()
                .min_by_key(|c| c.value)
                .map(|c| vec![(*c).clone()])
                .unwrap_or_default();
        }

        let surplus = pool_sum - target_wide;
        if surplus == 0 {
            return poolable.into_iter().cloned().collect();
        }
        let limit = u64::try_from(surplus)
            .ok()
            .filter(|&s| s <= self.surplus_threshold)
            .and_then(|s| usize::try_from(s).ok());
        let Some(limit) = limit else {
            return smallest_first(candidates, target);
        };

        let values: Vec<u64> = poolable.iter().map(|c| c.value).collect();
        let dropped = best_subset_under(&values, limit);
        poolable
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !dropped[*i])
            .map(|(_, c)| c.clone())
            .collect()
    }
}

fn sum(coins: &[Coin]) -> u128 {
    coins.iter().map(|c| c.value as u128).sum()
}

fn sorted_refs(coins: &[Coin], descending: bool) -> Vec<&Coin> {
    let mut refs: Vec<&Coin> = coins.iter().collect();
    if descending {
        refs.sort_by(|a, b| b.value.cmp(&a.value));
    } else {
        refs.sort_by_key(|c| c.value);
    }
    refs
}

fn accumulate(sorted: Vec<&Coin>, target: u64) -> Vec<Coin> {
    let mut acc = 0u128;
    let mut out = Vec::new();
    for c in sorted {
        if acc >= target as u128 {
            break;
        }
        acc += c.value as u128;
        out.push(c.clone());
    }
    out
}

fn smallest_first(coins: &[Coin], target: u64) -> Vec<Coin> {
    accumulate(sorted_refs(coins, false), target)
}

fn largest_first(coins: &[Coin], target: u64) -> Vec<Coin> {
    accumulate(sorted_refs(coins, true), target)
}

fn largest_up_to(coins: &[Coin], max_count: usize) -> CoinSelection {
    let chosen = sorted_refs(coins, true)
        .into_iter()
        .take(max_count)
        .cloned()
        .collect();
    CoinSelection::from_coins(chosen)
}

/// Mark the subset of `values` with the largest sum not exceeding `limit`.
///
/// An exact subset summing to `limit` is found whenever one exists.
fn best_subset_under(values: &[u64], limit: usize) -> Vec<bool> {
    let mut reachable = vec![false; limit + 1];
    let mut via = vec![usize::MAX; limit + 1];
    reachable[0] = true;

    for (i, &v) in values.iter().enumerate() {
        let Some(v) = usize::try_from(v).ok().filter(|&v| v > 0 && v <= limit) else {
            continue;
        };
        for s in (v..=limit).rev() {
            if !reachable[s] && reachable[s - v] {
                reachable[s] = true;
                via[s] = i;
            }
        }
    }

    let mut picked = vec![false; values.len()];
    let Some(mut s) = (0..=limit).rev().find(|&s| reachable[s]) else {
        return picked;
    };
    while s > 0 {
        let i = via[s];
        picked[i] = true;
        s -= values[i] as usize;
    }
    picked
}
