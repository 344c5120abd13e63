//! Per-account spend tracking.
//!
//! The ledger owns three pieces of state:
//!
//! - a derivation cache `(token, derivator) → serial number`, append-only
//! - a spent cache of `(token, serial number)` pairs the chain has confirmed
//! - the pending spends reserved by broadcast but unconfirmed transactions
//!
//! All of it sits behind one mutex per account. Every method takes the lock
//! for a short, synchronous critical section; network checks run with the
//! lock released.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use cloak_core::error::{KeyError, NodeError};
use cloak_core::traits::KeyPrimitives;
use cloak_core::types::{Coin, Derivator, SerialNumber, TokenId, TxId};

/// A coin held by a pending spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedCoin {
    pub token_id: TokenId,
    pub serial_number: SerialNumber,
}

/// Coins optimistically consumed by a broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSpend {
    pub tx_id: TxId,
    pub coins: Vec<ReservedCoin>,
}

impl PendingSpend {
    pub fn serial_numbers(&self) -> Vec<SerialNumber> {
        self.coins.iter().map(|c| c.serial_number).collect()
    }
}

/// Serializable copy of the derivation and spent caches.
///
/// Keys are `"{token_id}_{derivator}"` and `"{token_id}_{serial_number}"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCache {
    pub derivations: BTreeMap<String, SerialNumber>,
    pub spent: BTreeSet<String>,
}

#[derive(Default)]
struct LedgerState {
    derivations: HashMap<(TokenId, Derivator), SerialNumber>,
    spent: HashSet<(TokenId, SerialNumber)>,
    pending: Vec<PendingSpend>,
}

impl LedgerState {
    fn pending_serials(&self) -> HashSet<SerialNumber> {
        self.pending
            .iter()
            .flat_map(|p| p.coins.iter().map(|c| c.serial_number))
            .collect()
    }
}

/// Spend tracking for one account.
#[derive(Default)]
pub struct SpendLedger {
    state: Mutex<LedgerState>,
}

impl SpendLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every coin whose serial number is held by an active pending spend.
    pub fn filter_except_pending(&self, coins: Vec<Coin>) -> Vec<Coin> {
        let reserved = self.state.lock().pending_serials();
        if reserved.is_empty() {
            return coins;
        }
        coins
            .into_iter()
            .filter(|c| c.serial_number.is_none_or(|sn| !reserved.contains(&sn)))
            .collect()
    }

    /// Fill in each coin's serial number, deriving only the cache misses.
    ///
    /// Misses are derived in one batch call to `primitives`.
    pub fn derive_serial_numbers(
        &self,
        primitives: &dyn KeyPrimitives,
        spending_key: &[u8],
        coins: &mut [Coin],
        token_id: &TokenId,
    ) -> Result<Vec<SerialNumber>, KeyError> {
        let mut missing: Vec<usize> = Vec::new();
        {
            let state = self.state.lock();
            for (i, coin) in coins.iter_mut().enumerate() {
                match state.derivations.get(&(*token_id, coin.derivator)) {
                    Some(sn) => coin.serial_number = Some(*sn),
                    None => missing.push(i),
                }
            }
        }
        debug!(
            token = %token_id,
            hits = coins.len() - missing.len(),
            misses = missing.len(),
            "serial number cache lookup"
        );

        if !missing.is_empty() {
            let derivators: Vec<Derivator> = missing.iter().map(|&i| coins[i].derivator).collect();
            let derived = primitives.derive_serial_numbers(spending_key, &derivators)?;
            if derived.len() != derivators.len() {
                return Err(KeyError::Derivation(format!(
                    "expected {} serial numbers, got {}",
                    derivators.len(),
                    derived.len()
                )));
            }
            let mut state = self.state.lock();
            for (&i, sn) in missing.iter().zip(derived) {
                coins[i].serial_number = Some(sn);
                state.derivations.insert((*token_id, coins[i].derivator), sn);
            }
        }

        // Every coin now has a serial number.
        Ok(coins.iter().filter_map(|c| c.serial_number).collect())
    }

    /// Keep only coins the chain does not know as spent.
    ///
    /// Coins already in the spent cache are dropped without asking. The
    /// others are checked with `check`, which must return one flag per
    /// serial number in order. Coins without a serial number are dropped.
    pub async fn reconcile_with_chain<F, Fut>(
        &self,
        coins: Vec<Coin>,
        token_id: &TokenId,
        check: F,
    ) -> Result<Vec<Coin>, NodeError>
    where
        F: FnOnce(Vec<SerialNumber>) -> Fut,
        Fut: Future<Output = Result<Vec<bool>, NodeError>>,
    {
        let candidates: Vec<(Coin, SerialNumber)> = {
            let state = self.state.lock();
            coins
                .into_iter()
                .filter_map(|c| match c.serial_number {
                    Some(sn) if state.spent.contains(&(*token_id, sn)) => None,
                    Some(sn) => Some((c, sn)),
                    None => {
                        warn!(derivator = %c.derivator, "coin has no serial number, skipping");
                        None
                    }
                })
                .collect()
        };
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let serials: Vec<SerialNumber> = candidates.iter().map(|(_, sn)| *sn).collect();
        let flags = check(serials).await?;
        if flags.len() != candidates.len() {
            return Err(NodeError::MalformedResponse(format!(
                "asked about {} serial numbers, got {} flags",
                candidates.len(),
                flags.len()
            )));
        }

        let mut state = self.state.lock();
        let mut unspent = Vec::with_capacity(candidates.len());
        for ((coin, sn), exists) in candidates.into_iter().zip(flags) {
            if exists {
                state.spent.insert((*token_id, sn));
            } else {
                unspent.push(coin);
            }
        }
        debug!(token = %token_id, unspent = unspent.len(), known_spent = state.spent.len(), "reconciled coins with chain");
        Ok(unspent)
    }

    /// Reserve coins for `tx_id`. Returns `false` if `tx_id` already holds a reservation.
    pub fn reserve(&self, tx_id: TxId, coins: Vec<ReservedCoin>) -> bool {
        let mut state = self.state.lock();
        if state.pending.iter().any(|p| p.tx_id == tx_id) {
            return false;
        }
        state.pending.push(PendingSpend { tx_id, coins });
        true
    }

    /// Remove the reservation for `tx_id`, if any.
    pub fn release(&self, tx_id: &TxId) -> Option<PendingSpend> {
        let mut state = self.state.lock();
        let pos = state.pending.iter().position(|p| &p.tx_id == tx_id)?;
        Some(state.pending.remove(pos))
    }

    /// Release `tx_id` after the chain included it, recording its coins as spent.
    pub fn confirm(&self, tx_id: &TxId) -> Option<PendingSpend> {
        let mut state = self.state.lock();
        let pos = state.pending.iter().position(|p| &p.tx_id == tx_id)?;
        let spend = state.pending.remove(pos);
        state
            .spent
            .extend(spend.coins.iter().map(|c| (c.token_id, c.serial_number)));
        Some(spend)
    }

    pub fn pending(&self) -> Vec<PendingSpend> {
        self.state.lock().pending.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Reset the derivation and spent caches. Pending spends are kept.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.derivations.clear();
        state.spent.clear();
    }

    pub fn snapshot(&self) -> LedgerCache {
        let state = self.state.lock();
        LedgerCache {
            derivations: state
                .derivations
                .iter()
                .map(|((token, d), sn)| (format!("{token}_{d}"), *sn))
                .collect(),
            spent: state
                .spent
                .iter()
                .map(|(token, sn)| format!("{token}_{sn}"))
                .collect(),
        }
    }

    /// Merge a previously saved cache. Malformed entries are skipped.
    pub fn restore(&self, cache: &LedgerCache) {
        let mut state = self.state.lock();
        let mut skipped = 0usize;
        for (key, sn) in &cache.derivations {
            match split_key(key).and_then(|(t, d)| Some((t, Derivator::decode(d).ok()?))) {
                Some(k) => {
                    state.derivations.insert(k, *sn);
                }
                None => skipped += 1,
            }
        }
        for key in &cache.spent {
            match split_key(key).and_then(|(t, s)| Some((t, SerialNumber::decode(s).ok()?))) {
                Some(k) => {
                    state.spent.insert(k);
                }
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(skipped, "ignored malformed ledger cache entries");
        }
    }
}

fn split_key(key: &str) -> Option<(TokenId, &str)> {
    let (token, rest) = key.split_once('_')?;
    Some((token.parse().ok()?, rest))
}
