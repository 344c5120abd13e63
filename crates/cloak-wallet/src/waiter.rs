//! Polling waits against the chain node.
//!
//! Every wait draws from a caller-supplied [`PollBudget`]: each poll that
//! does not satisfy the condition sleeps one fixed interval and subtracts it
//! from the budget. A wait that finds the budget empty fails with
//! [`WalletError::Timeout`]. Node errors inside a poll are retried until the
//! budget runs out.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use cloak_core::error::NodeError;
use cloak_core::traits::ChainNode;
use cloak_core::types::{BlockHash, TxId};

use crate::error::WalletError;

/// A shared time allowance consumed by fixed-interval polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    remaining: Duration,
    interval: Duration,
    spent: Duration,
}

impl PollBudget {
    pub fn new(total: Duration, interval: Duration) -> Self {
        Self {
            remaining: total,
            interval,
            spent: Duration::ZERO,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining.is_zero()
    }

    /// Sleep one interval and charge it to the budget.
    ///
    /// Fails without sleeping when nothing is left.
    pub async fn tick(&mut self, what: &str) -> Result<(), WalletError> {
        if self.is_exhausted() {
            return Err(WalletError::Timeout {
                what: what.to_string(),
                waited_ms: u64::try_from(self.spent.as_millis()).unwrap_or(u64::MAX),
            });
        }
        let step = self.interval.min(self.remaining);
        tokio::time::sleep(step).await;
        // A zero interval still has to drain the budget.
        self.remaining = self.remaining.saturating_sub(self.interval.max(Duration::from_millis(1)));
        self.spent += step;
        Ok(())
    }
}

/// Progress of a transaction wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxWaitState {
    Searching,
    FoundInBlock(BlockHash),
    WaitingConfirmations(u64),
    Satisfied,
}

/// Where a waited-for transaction ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxConfirmation {
    pub tx_id: TxId,
    pub block_hash: BlockHash,
    pub confirmations: u64,
}

/// Polls the chain node until a condition holds or the budget runs out.
pub struct ConfirmationWaiter {
    node: Arc<dyn ChainNode>,
}

impl ConfirmationWaiter {
    pub fn new(node: Arc<dyn ChainNode>) -> Self {
        Self { node }
    }

    /// Wait until `tx_id` is in a block with at least `required` confirmations.
    pub async fn wait_for_tx(
        &self,
        tx_id: &TxId,
        required: u64,
        budget: &mut PollBudget,
    ) -> Result<TxConfirmation, WalletError> {
        let what = format!("transaction {tx_id}");
        let mut state = TxWaitState::Searching;
        debug!(%tx_id, ?state, "waiting for transaction");

        let block_hash = loop {
            match self.node.get_transaction_status(tx_id).await {
                Ok(status) if status.is_rejected() => {
                    let reason = status.error.unwrap_or_default();
                    warn!(%tx_id, %reason, "transaction rejected");
                    return Err(WalletError::TxRejected { tx_id: *tx_id, reason });
                }
                Ok(status) => {
                    if let (true, Some(hash)) = (status.in_block, status.block_hash) {
                        break hash;
                    }
                    debug!(%tx_id, in_mempool = status.in_mempool, "not in a block yet");
                }
                Err(NodeError::NotFound(_)) => debug!(%tx_id, "not known to node yet"),
                Err(e) => warn!(%tx_id, error = %e, "transaction status poll failed"),
            }
            budget.tick(&what).await?;
        };

        state = TxWaitState::FoundInBlock(block_hash);
        info!(%tx_id, %block_hash, ?state, "transaction in block");

        loop {
            if required == 0 {
                break;
            }
            match self.node.get_block_confirmations(&block_hash).await {
                Ok(count) if count >= required => {
                    state = TxWaitState::WaitingConfirmations(count);
                    break;
                }
                Ok(count) => {
                    state = TxWaitState::WaitingConfirmations(count);
                    debug!(%tx_id, ?state, required, "waiting for confirmations");
                }
                Err(e) => warn!(%block_hash, error = %e, "confirmation poll failed"),
            }
            budget.tick(&what).await?;
        }

        let confirmations = match state {
            TxWaitState::WaitingConfirmations(count) => count,
            _ => 0,
        };
        info!(%tx_id, confirmations, state = ?TxWaitState::Satisfied, "transaction confirmed");
        Ok(TxConfirmation {
            tx_id: *tx_id,
            block_hash,
            confirmations,
        })
    }

    /// Wait until the chain height reaches `target`. Returns the height seen.
    pub async fn wait_for_height(
        &self,
        target: u64,
        budget: &mut PollBudget,
    ) -> Result<u64, WalletError> {
        let what = format!("height {target}");
        loop {
            match self.node.get_chain_height().await {
                Ok(height) if height >= target => {
                    info!(height, target, "height reached");
                    return Ok(height);
                }
                Ok(height) => debug!(height, target, "below target height"),
                Err(e) => warn!(error = %e, "height poll failed"),
            }
            budget.tick(&what).await?;
        }
    }
}

/// Poll `probe` until its value differs from `baseline`.
///
/// Probe errors are retried like node errors; the last one is discarded when
/// the budget runs out.
pub async fn wait_for_change<T, F, Fut>(
    what: &str,
    baseline: &T,
    mut probe: F,
    budget: &mut PollBudget,
) -> Result<T, WalletError>
where
    T: PartialEq + std::fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, WalletError>>,
{
    loop {
        match probe().await {
            Ok(value) if &value != baseline => {
                debug!(?baseline, current = ?value, "{what} changed");
                return Ok(value);
            }
            Ok(_) => debug!("{what} unchanged"),
            Err(e) => warn!(error = %e, "{what} poll failed"),
        }
        budget.tick(what).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cloak_core::traits::{BroadcastReceipt, OutputPage, OutputQuery, RingMembers, TxStatusInfo};
    use cloak_core::types::{SerialNumber, TokenId};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays scripted status and confirmation answers, repeating the last.
    #[derive(Default)]
    struct ScriptedNode {
        statuses: Mutex<VecDeque<Result<TxStatusInfo, NodeError>>>,
        confirmations: Mutex<VecDeque<u64>>,
        heights: Mutex<VecDeque<u64>>,
    }

    fn next<T: Clone>(queue: &Mutex<VecDeque<T>>) -> T {
        let mut q = queue.lock();
        if q.len() > 1 { q.pop_front().unwrap() } else { q.front().cloned().unwrap() }
    }

    #[async_trait]
    impl ChainNode for ScriptedNode {
        async fn get_unspent_outputs(&self, _: &OutputQuery) -> Result<OutputPage, NodeError> {
            Ok(OutputPage::default())
        }
        async fn has_serial_numbers(
            &self,
            _: &str,
            sns: &[SerialNumber],
            _: &TokenId,
        ) -> Result<Vec<bool>, NodeError> {
            Ok(vec![false; sns.len()])
        }
        async fn get_random_ring_members(
            &self,
            _: &str,
            _: usize,
            _: &TokenId,
        ) -> Result<RingMembers, NodeError> {
            Ok(RingMembers::default())
        }
        async fn broadcast_transaction(&self, _: &str, _: bool) -> Result<BroadcastReceipt, NodeError> {
            Err(NodeError::NotFound("broadcast".into()))
        }
        async fn get_transaction_status(&self, _: &TxId) -> Result<TxStatusInfo, NodeError> {
            next(&self.statuses)
        }
        async fn get_block_confirmations(&self, _: &BlockHash) -> Result<u64, NodeError> {
            Ok(next(&self.confirmations))
        }
        async fn get_node_time(&self) -> Result<i64, NodeError> {
            Ok(0)
        }
        async fn get_chain_height(&self) -> Result<u64, NodeError> {
            Ok(next(&self.heights))
        }
        async fn get_burning_address(&self) -> Result<String, NodeError> {
            Ok(String::new())
        }
    }

    fn in_block(hash: u8) -> TxStatusInfo {
        TxStatusInfo {
            in_block: true,
            block_hash: Some(BlockHash::from([hash; 32])),
            ..Default::default()
        }
    }

    fn budget(polls: u64) -> PollBudget {
        PollBudget::new(Duration::from_millis(polls), Duration::from_millis(1))
    }

    #[tokio::test]
    async fn tick_drains_then_times_out() {
        let mut b = budget(2);
        b.tick("x").await.unwrap();
        b.tick("x").await.unwrap();
        assert!(b.is_exhausted());
        let err = b.tick("x").await.unwrap_err();
        assert_eq!(err, WalletError::Timeout { what: "x".into(), waited_ms: 2 });
    }

    #[tokio::test]
    async fn zero_interval_still_terminates() {
        let mut b = PollBudget::new(Duration::from_millis(3), Duration::ZERO);
        let mut ticks = 0;
        while b.tick("x").await.is_ok() {
            ticks += 1;
        }
        assert_eq!(ticks, 3);
    }

    #[tokio::test]
    async fn tx_found_after_searching() {
        let node = ScriptedNode::default();
        node.statuses.lock().extend([
            Err(NodeError::NotFound("tx".into())),
            Ok(TxStatusInfo { in_mempool: true, ..Default::default() }),
            Ok(in_block(9)),
        ]);
        node.confirmations.lock().extend([0, 1, 3]);
        let waiter = ConfirmationWaiter::new(Arc::new(node));
        let mut b = budget(100);
        let done = waiter.wait_for_tx(&TxId::from([1; 32]), 2, &mut b).await.unwrap();
        assert_eq!(done.block_hash, BlockHash::from([9; 32]));
        assert_eq!(done.confirmations, 3);
        assert_eq!(b.remaining(), Duration::from_millis(96));
    }

    #[tokio::test]
    async fn zero_confirmations_returns_at_block() {
        let node = ScriptedNode::default();
        node.statuses.lock().push_back(Ok(in_block(4)));
        let waiter = ConfirmationWaiter::new(Arc::new(node));
        let mut b = budget(5);
        let done = waiter.wait_for_tx(&TxId::ZERO, 0, &mut b).await.unwrap();
        assert_eq!(done.confirmations, 0);
        assert_eq!(b.remaining(), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn tx_never_found_times_out() {
        let node = ScriptedNode::default();
        node.statuses.lock().push_back(Err(NodeError::NotFound("tx".into())));
        let waiter = ConfirmationWaiter::new(Arc::new(node));
        let err = waiter.wait_for_tx(&TxId::ZERO, 1, &mut budget(3)).await.unwrap_err();
        assert!(matches!(err, WalletError::Timeout { .. }));
    }

    #[tokio::test]
    async fn rejected_tx_stops_waiting() {
        let node = ScriptedNode::default();
        node.statuses.lock().push_back(Ok(TxStatusInfo {
            error: Some("double spend".into()),
            ..Default::default()
        }));
        let waiter = ConfirmationWaiter::new(Arc::new(node));
        let err = waiter.wait_for_tx(&TxId::ZERO, 1, &mut budget(50)).await.unwrap_err();
        assert_eq!(err, WalletError::TxRejected { tx_id: TxId::ZERO, reason: "double spend".into() });
    }

    #[tokio::test]
    async fn height_polls_until_target() {
        let node = ScriptedNode::default();
        node.heights.lock().extend([10, 11, 12]);
        let waiter = ConfirmationWaiter::new(Arc::new(node));
        assert_eq!(waiter.wait_for_height(12, &mut budget(10)).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn change_detected() {
        let mut calls = 0u64;
        let mut b = budget(10);
        let v = wait_for_change(
            "balance",
            &100u64,
            || {
                calls += 1;
                let value = if calls < 3 { 100 } else { 150 };
                async move { Ok(value) }
            },
            &mut b,
        )
        .await
        .unwrap();
        assert_eq!(v, 150);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn unchanged_times_out() {
        let err = wait_for_change("balance", &7u64, || async { Ok(7u64) }, &mut budget(2))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Timeout { ref what, .. } if what == "balance"));
    }
}
