//! Transaction orchestration for one account.
//!
//! [`Transactor`] ties the account keys, its [`SpendLedger`], and the
//! injected chain node and proof backend together. Every outgoing
//! transaction goes through the same pipeline:
//!
//! 1. gather unspent coins and select inputs (native, then token)
//! 2. fetch decoy ring members
//! 3. assemble the proof request and ask the node for its clock
//! 4. have the proof backend build and sign the transaction
//! 5. decode the result, broadcast it, then reserve the spent coins
//!
//! Nothing is recorded until the node accepts the broadcast. After that the
//! pending spend and history entry stay until confirmation polling resolves
//! them.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use cloak_core::constants::{COIN_VERSION_CURRENT, COIN_VERSION_LEGACY, SHARD_STAKING_AMOUNT, meta};
use cloak_core::error::NodeError;
use cloak_core::traits::{ChainNode, KeyPrimitives, OutputQuery, ProofBackend, RingMembers};
use cloak_core::types::{BlockHash, Coin, KeyType, PaymentInfo, TokenId, TxId};

use crate::builder::{ProofRequest, TokenInit, TokenParams, decode_transaction};
use crate::coin_selection::{CoinSelection, CoinSelector, SelectionTarget};
use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::history::{Receiver, TxHistory, TxHistoryEntry, TxKind, TxStatus};
use crate::keys::KeySet;
use crate::ledger::{LedgerCache, PendingSpend, ReservedCoin, SpendLedger};
use crate::metadata::{Metadata, StakingRole, TradeMeta};
use crate::waiter::{ConfirmationWaiter, TxConfirmation, wait_for_change};

/// Pipeline stage, logged as each build advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Preparing,
    InputsGathered,
    ProofRequested,
    Encoded,
    Broadcasting,
    Broadcast,
}

/// Outcome of a successful broadcast.
#[derive(Debug, Clone)]
pub struct TxResult {
    pub tx_id: TxId,
    pub kind: TxKind,
    /// Hash reported by the proof backend.
    pub proof_hash: TxId,
    /// Decoded transaction body.
    pub transaction: serde_json::Value,
    /// Base58-check form as broadcast.
    pub encoded: String,
    pub token_id: Option<TokenId>,
    /// Native payments, excluding the fee.
    pub amount: u64,
    pub token_amount: u64,
    pub fee: u64,
    pub inputs: Vec<Coin>,
    pub token_inputs: Vec<Coin>,
}

/// Parameters of a cross-pool trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeRequest {
    pub token_to_sell: TokenId,
    pub token_to_buy: TokenId,
    pub sell_amount: u64,
    pub min_acceptable_amount: u64,
    pub trading_fee: u64,
}

/// How to pick inputs for one leg of a transaction.
#[derive(Debug, Clone, Copy)]
struct InputSpec {
    version: Option<u8>,
    ring_size: usize,
    max_inputs: usize,
    /// Take up to `max_inputs` coins regardless of the payment amount.
    consolidate: bool,
}

struct TokenLeg {
    /// `None` when minting.
    token_id: Option<TokenId>,
    payments: Vec<PaymentInfo>,
    init: Option<TokenInit>,
    /// `None` when the leg spends no token coins.
    inputs: Option<InputSpec>,
}

struct TxPlan {
    kind: TxKind,
    payments: Vec<PaymentInfo>,
    fee: u64,
    inputs: InputSpec,
    token: Option<TokenLeg>,
    metadata: Option<Metadata>,
    info: String,
    conversion: bool,
}

impl TxPlan {
    fn new(kind: TxKind, payments: Vec<PaymentInfo>, fee: u64, inputs: InputSpec) -> Self {
        Self {
            kind,
            payments,
            fee,
            inputs,
            token: None,
            metadata: None,
            info: String::new(),
            conversion: false,
        }
    }

    fn with_token(mut self, leg: TokenLeg) -> Self {
        self.token = Some(leg);
        self
    }

    fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    fn with_info(mut self, info: &str) -> Self {
        self.info = info.to_string();
        self
    }
}

/// Negative fees are treated as zero.
fn coerce_fee(fee: i64) -> u64 {
    u64::try_from(fee).unwrap_or(0)
}

fn payment_total(payments: &[PaymentInfo]) -> Result<u64, WalletError> {
    payments.iter().try_fold(0u64, |acc, p| {
        acc.checked_add(p.amount)
            .ok_or_else(|| WalletError::InvalidRequest("payment total overflows".into()))
    })
}

fn reservations(token_id: TokenId, coins: &[Coin]) -> impl Iterator<Item = ReservedCoin> + '_ {
    coins.iter().filter_map(move |c| {
        c.serial_number.map(|serial_number| ReservedCoin {
            token_id,
            serial_number,
        })
    })
}

/// Builds, sends, and tracks transactions for one account.
pub struct Transactor {
    keys: KeySet,
    payment_address: String,
    viewing_key: String,
    ota_key: String,
    ledger: SpendLedger,
    history: TxHistory,
    node: Arc<dyn ChainNode>,
    prover: Arc<dyn ProofBackend>,
    primitives: Arc<dyn KeyPrimitives>,
    waiter: ConfirmationWaiter,
    selector: CoinSelector,
    config: WalletConfig,
    /// Serialises gather-select-broadcast-reserve across concurrent sends.
    send_lock: Mutex<()>,
}

impl Transactor {
    pub fn new(
        keys: KeySet,
        node: Arc<dyn ChainNode>,
        prover: Arc<dyn ProofBackend>,
        primitives: Arc<dyn KeyPrimitives>,
        config: WalletConfig,
    ) -> Result<Self, WalletError> {
        config.validate()?;
        let payment_address = keys.payment_address()?;
        let viewing_key = keys.encoded(KeyType::ViewingKey)?;
        let ota_key = keys.encoded(KeyType::OneTimeAddressKey)?;
        info!(
            shard = keys.shard_id(config.shard_count),
            "wallet account ready"
        );
        Ok(Self {
            keys,
            payment_address,
            viewing_key,
            ota_key,
            ledger: SpendLedger::new(),
            history: TxHistory::new(),
            waiter: ConfirmationWaiter::new(Arc::clone(&node)),
            node,
            prover,
            primitives,
            selector: CoinSelector::new(config.greedy_surplus_threshold),
            config,
            send_lock: Mutex::new(()),
        })
    }

    pub fn keys(&self) -> &KeySet {
        &self.keys
    }

    pub fn payment_address(&self) -> &str {
        &self.payment_address
    }

    pub fn shard_id(&self) -> u8 {
        self.keys.shard_id(self.config.shard_count)
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn pending_spends(&self) -> Vec<PendingSpend> {
        self.ledger.pending()
    }

    pub fn ledger_snapshot(&self) -> LedgerCache {
        self.ledger.snapshot()
    }

    pub fn restore_ledger(&self, cache: &LedgerCache) {
        self.ledger.restore(cache);
    }

    // --- Queries ---

    /// Owned coins of `token_id` that are neither spent on chain nor reserved.
    ///
    /// `version` restricts the coin version; `None` accepts any.
    pub async fn unspent_coins(
        &self,
        token_id: &TokenId,
        version: Option<u8>,
    ) -> Result<Vec<Coin>, WalletError> {
        let mut query = OutputQuery {
            payment_address: self.payment_address.clone(),
            viewing_key: self.viewing_key.clone(),
            ota_key: self.ota_key.clone(),
            token_id: *token_id,
            from_height: 0,
            version,
        };

        let mut coins = Vec::new();
        let mut pages = 0u32;
        loop {
            let page = self
                .node
                .get_unspent_outputs(&query)
                .await
                .map_err(WalletError::node("get_unspent_outputs"))?;
            pages += 1;
            coins.extend(page.coins);
            if page.next_height == 0 {
                break;
            }
            if pages >= self.config.max_output_pages {
                warn!(token = %token_id, pages, "output scan hit page limit");
                break;
            }
            query.from_height = page.next_height;
        }
        if let Some(v) = version {
            coins.retain(|c| c.version == v);
        }
        debug!(token = %token_id, pages, coins = coins.len(), "fetched output coins");

        self.ledger.derive_serial_numbers(
            self.primitives.as_ref(),
            self.keys.spending_key(),
            &mut coins,
            token_id,
        )?;

        let node = Arc::clone(&self.node);
        let address = self.payment_address.clone();
        let token = *token_id;
        let unspent = self
            .ledger
            .reconcile_with_chain(coins, token_id, move |serials| async move {
                node.has_serial_numbers(&address, &serials, &token).await
            })
            .await
            .map_err(WalletError::node("has_serial_numbers"))?;

        Ok(self.ledger.filter_except_pending(unspent))
    }

    /// Spendable balance of `token_id` across all coin versions.
    pub async fn balance(&self, token_id: &TokenId) -> Result<u64, WalletError> {
        let coins = self.unspent_coins(token_id, None).await?;
        Ok(Coin::total_value(&coins))
    }

    pub fn history(&self) -> Vec<TxHistoryEntry> {
        self.history.all()
    }

    pub fn history_entry(&self, tx_id: &TxId) -> Result<TxHistoryEntry, WalletError> {
        self.history
            .get(tx_id)
            .ok_or_else(|| WalletError::NotFound(format!("transaction {tx_id}")))
    }

    pub fn history_for_token(&self, token_id: &TokenId) -> Vec<TxHistoryEntry> {
        self.history.for_token(token_id)
    }

    /// Ask the node about every pending transaction once.
    ///
    /// Transactions in a block become `Confirmed`; those the node dropped
    /// become `Failed`. Either way their pending spend is resolved. Returns
    /// how many entries changed.
    pub async fn refresh_history(&self) -> Result<usize, WalletError> {
        let mut resolved = 0;
        for tx_id in self.history.pending_ids() {
            let status = match self.node.get_transaction_status(&tx_id).await {
                Ok(status) => status,
                Err(NodeError::NotFound(_)) => {
                    debug!(%tx_id, "pending transaction unknown to node");
                    continue;
                }
                Err(e) => return Err(WalletError::node("get_transaction_status")(e)),
            };
            if status.in_block {
                self.settle(&tx_id, TxStatus::Confirmed, status.block_hash, None);
                resolved += 1;
            } else if status.is_rejected() {
                self.settle(&tx_id, TxStatus::Failed, None, status.error);
                resolved += 1;
            }
        }
        Ok(resolved)
    }

    fn settle(
        &self,
        tx_id: &TxId,
        status: TxStatus,
        block_hash: Option<BlockHash>,
        error: Option<String>,
    ) {
        let spend = match status {
            TxStatus::Confirmed => self.ledger.confirm(tx_id),
            TxStatus::Failed => self.ledger.release(tx_id),
            TxStatus::Pending => None,
        };
        if status == TxStatus::Failed {
            warn!(%tx_id, error = error.as_deref().unwrap_or(""), "transaction failed");
        }
        if self.history.resolve(tx_id, status, block_hash, error) {
            info!(
                %tx_id,
                ?status,
                coins = spend.map_or(0, |s| s.coins.len()),
                "transaction resolved"
            );
        }
    }

    // --- Waits ---

    /// Wait for `confirmations` on `tx_id`, resolving its history entry.
    pub async fn wait_for_tx(
        &self,
        tx_id: &TxId,
        confirmations: u64,
    ) -> Result<TxConfirmation, WalletError> {
        let mut budget = self.config.poll_budget();
        let result = self.waiter.wait_for_tx(tx_id, confirmations, &mut budget).await;
        match &result {
            Ok(done) => self.settle(tx_id, TxStatus::Confirmed, Some(done.block_hash), None),
            Err(WalletError::TxRejected { reason, .. }) => {
                self.settle(tx_id, TxStatus::Failed, None, Some(reason.clone()))
            }
            Err(_) => {}
        }
        result
    }

    /// Wait until the balance of `token_id` differs from its current value.
    pub async fn wait_for_balance_change(&self, token_id: &TokenId) -> Result<u64, WalletError> {
        let baseline = self.balance(token_id).await?;
        let mut budget = self.config.poll_budget();
        wait_for_change("balance", &baseline, || self.balance(token_id), &mut budget).await
    }

    pub async fn wait_for_height(&self, target: u64) -> Result<u64, WalletError> {
        let mut budget = self.config.poll_budget();
        self.waiter.wait_for_height(target, &mut budget).await
    }

    // --- Transactions ---

    fn spend_inputs(&self) -> InputSpec {
        InputSpec {
            version: Some(COIN_VERSION_CURRENT),
            ring_size: self.config.ring_size,
            max_inputs: self.config.max_input_per_tx,
            consolidate: false,
        }
    }

    fn legacy_inputs(&self) -> InputSpec {
        InputSpec {
            version: Some(COIN_VERSION_LEGACY),
            ring_size: 0,
            max_inputs: self.config.max_input_per_tx,
            consolidate: true,
        }
    }

    async fn burning_address(&self) -> Result<String, WalletError> {
        self.node
            .get_burning_address()
            .await
            .map_err(WalletError::node("get_burning_address"))
    }

    /// Send native coins.
    pub async fn send_native(
        &self,
        payments: Vec<PaymentInfo>,
        fee: i64,
        info: &str,
    ) -> Result<TxResult, WalletError> {
        if payments.is_empty() {
            return Err(WalletError::InvalidRequest("transfer without receivers".into()));
        }
        let plan = TxPlan::new(TxKind::Transfer, payments, coerce_fee(fee), self.spend_inputs())
            .with_info(info);
        self.build_and_send(plan).await
    }

    /// Send a token, optionally with native payments alongside. The fee is
    /// always paid in native coins.
    pub async fn send_token(
        &self,
        token_id: TokenId,
        token_payments: Vec<PaymentInfo>,
        native_payments: Vec<PaymentInfo>,
        fee: i64,
        info: &str,
    ) -> Result<TxResult, WalletError> {
        if token_payments.is_empty() {
            return Err(WalletError::InvalidRequest("token transfer without receivers".into()));
        }
        if token_id.is_native() {
            return Err(WalletError::InvalidRequest("use send_native for the native coin".into()));
        }
        let leg = TokenLeg {
            token_id: Some(token_id),
            payments: token_payments,
            init: None,
            inputs: Some(self.spend_inputs()),
        };
        let plan = TxPlan::new(TxKind::TokenTransfer, native_payments, coerce_fee(fee), self.spend_inputs())
            .with_token(leg)
            .with_info(info);
        self.build_and_send(plan).await
    }

    /// Mint a new token whose whole supply goes to `receivers`.
    pub async fn mint_token(
        &self,
        name: &str,
        symbol: &str,
        receivers: Vec<PaymentInfo>,
        fee: i64,
        info: &str,
    ) -> Result<TxResult, WalletError> {
        if receivers.is_empty() {
            return Err(WalletError::InvalidRequest("mint without receivers".into()));
        }
        let amount = payment_total(&receivers)?;
        let leg = TokenLeg {
            token_id: None,
            payments: receivers,
            init: Some(TokenInit {
                token_name: name.to_string(),
                token_symbol: symbol.to_string(),
                amount,
            }),
            inputs: None,
        };
        let plan = TxPlan::new(TxKind::TokenMint, Vec::new(), coerce_fee(fee), self.spend_inputs())
            .with_token(leg)
            .with_info(info);
        self.build_and_send(plan).await
    }

    /// Convert legacy native coins to the current version.
    pub async fn convert(&self, fee: i64, info: &str) -> Result<TxResult, WalletError> {
        let mut plan = TxPlan::new(TxKind::Conversion, Vec::new(), coerce_fee(fee), self.legacy_inputs())
            .with_info(info);
        plan.conversion = true;
        self.build_and_send(plan).await
    }

    /// Convert legacy coins of a token, paying the fee from current native coins.
    pub async fn convert_token(
        &self,
        token_id: TokenId,
        fee: i64,
        info: &str,
    ) -> Result<TxResult, WalletError> {
        let leg = TokenLeg {
            token_id: Some(token_id),
            payments: Vec::new(),
            init: None,
            inputs: Some(self.legacy_inputs()),
        };
        let mut plan = TxPlan::new(TxKind::Conversion, Vec::new(), coerce_fee(fee), self.spend_inputs())
            .with_token(leg)
            .with_info(info);
        plan.conversion = true;
        self.build_and_send(plan).await
    }

    /// Stake as a validator candidate. The stake goes to the burning address.
    pub async fn stake(
        &self,
        role: StakingRole,
        committee_public_key: &str,
        reward_receiver: &str,
        auto_re_staking: bool,
        fee: i64,
    ) -> Result<TxResult, WalletError> {
        let burning = self.burning_address().await?;
        let metadata = Metadata::staking(
            role,
            self.payment_address.clone(),
            reward_receiver.to_string(),
            SHARD_STAKING_AMOUNT,
            committee_public_key.to_string(),
            auto_re_staking,
        );
        let plan = TxPlan::new(
            TxKind::Stake,
            vec![PaymentInfo::new(burning, SHARD_STAKING_AMOUNT)],
            coerce_fee(fee),
            self.spend_inputs(),
        )
        .with_metadata(metadata);
        self.build_and_send(plan).await
    }

    /// Stop automatic re-staking for a committee key.
    pub async fn unstake(&self, committee_public_key: &str, fee: i64) -> Result<TxResult, WalletError> {
        let burning = self.burning_address().await?;
        let plan = TxPlan::new(
            TxKind::Unstake,
            vec![PaymentInfo::new(burning, 0)],
            coerce_fee(fee),
            self.spend_inputs(),
        )
        .with_metadata(Metadata::stop_auto_staking(committee_public_key.to_string()));
        self.build_and_send(plan).await
    }

    pub async fn withdraw_reward(&self, token_id: TokenId, fee: i64) -> Result<TxResult, WalletError> {
        let plan = TxPlan::new(TxKind::WithdrawReward, Vec::new(), coerce_fee(fee), self.spend_inputs())
            .with_metadata(Metadata::withdraw_reward(self.payment_address.clone(), token_id));
        self.build_and_send(plan).await
    }

    /// Contribute `amount` of `token_id` to the liquidity pair `pair_id`.
    pub async fn contribute_liquidity(
        &self,
        pair_id: &str,
        token_id: TokenId,
        amount: u64,
        fee: i64,
        info: &str,
    ) -> Result<TxResult, WalletError> {
        let burning = self.burning_address().await?;
        let metadata = Metadata::contribution(
            pair_id.to_string(),
            self.payment_address.clone(),
            amount,
            token_id,
        );
        let payment = vec![PaymentInfo::new(burning, amount)];
        let plan = if token_id.is_native() {
            TxPlan::new(TxKind::ContributeLiquidity, payment, coerce_fee(fee), self.spend_inputs())
        } else {
            TxPlan::new(TxKind::ContributeLiquidity, Vec::new(), coerce_fee(fee), self.spend_inputs())
                .with_token(TokenLeg {
                    token_id: Some(token_id),
                    payments: payment,
                    init: None,
                    inputs: Some(self.spend_inputs()),
                })
        };
        self.build_and_send(plan.with_metadata(metadata).with_info(info)).await
    }

    pub async fn withdraw_liquidity(
        &self,
        token1: TokenId,
        token2: TokenId,
        share: u64,
        fee: i64,
        info: &str,
    ) -> Result<TxResult, WalletError> {
        let metadata = Metadata::withdrawal(self.payment_address.clone(), token1, token2, share);
        let plan = TxPlan::new(TxKind::WithdrawLiquidity, Vec::new(), coerce_fee(fee), self.spend_inputs())
            .with_metadata(metadata)
            .with_info(info);
        self.build_and_send(plan).await
    }

    /// Request a cross-pool trade. Proceeds arrive at two fresh one-time
    /// addresses of this account.
    pub async fn trade(
        &self,
        request: TradeRequest,
        fee: i64,
        info: &str,
    ) -> Result<TxResult, WalletError> {
        if request.token_to_sell == request.token_to_buy {
            return Err(WalletError::InvalidRequest("cannot trade a token for itself".into()));
        }
        let burning = self.burning_address().await?;
        let trader = self.prover.create_ota_receiver(&self.payment_address).await?;
        let sub_trader = self.prover.create_ota_receiver(&self.payment_address).await?;

        let metadata = Metadata::Trade(TradeMeta {
            meta_type: meta::PDE_CROSS_POOL_TRADE_REQUEST,
            token_to_buy: request.token_to_buy,
            token_to_sell: request.token_to_sell,
            sell_amount: request.sell_amount,
            min_acceptable_amount: request.min_acceptable_amount,
            trading_fee: request.trading_fee,
            trader_address_str: trader.public_key,
            tx_random_str: trader.tx_random,
            sub_trader_address_str: sub_trader.public_key,
            sub_tx_random_str: sub_trader.tx_random,
        });

        let fee = coerce_fee(fee);
        let plan = if request.token_to_sell.is_native() {
            let amount = request
                .sell_amount
                .checked_add(request.trading_fee)
                .ok_or_else(|| WalletError::InvalidRequest("trade amount overflows".into()))?;
            TxPlan::new(TxKind::Trade, vec![PaymentInfo::new(burning, amount)], fee, self.spend_inputs())
        } else {
            TxPlan::new(
                TxKind::Trade,
                vec![PaymentInfo::new(burning.clone(), request.trading_fee)],
                fee,
                self.spend_inputs(),
            )
            .with_token(TokenLeg {
                token_id: Some(request.token_to_sell),
                payments: vec![PaymentInfo::new(burning, request.sell_amount)],
                init: None,
                inputs: Some(self.spend_inputs()),
            })
        };
        self.build_and_send(plan.with_metadata(metadata).with_info(info)).await
    }

    /// Burn `amount` of a token for release on an external chain.
    pub async fn burn(
        &self,
        token_id: TokenId,
        amount: u64,
        remote_address: &str,
        fee: i64,
        info: &str,
    ) -> Result<TxResult, WalletError> {
        if token_id.is_native() {
            return Err(WalletError::InvalidRequest("the native coin cannot be burned".into()));
        }
        let burning = self.burning_address().await?;
        let metadata = Metadata::burning(self.payment_address.clone(), amount, token_id, remote_address);
        let plan = TxPlan::new(TxKind::Burn, Vec::new(), coerce_fee(fee), self.spend_inputs())
            .with_token(TokenLeg {
                token_id: Some(token_id),
                payments: vec![PaymentInfo::new(burning, amount)],
                init: None,
                inputs: Some(self.spend_inputs()),
            })
            .with_metadata(metadata)
            .with_info(info);
        self.build_and_send(plan).await
    }

    /// Merge native coins until one remains or the round limit is hit.
    ///
    /// Each round spends up to `max_inputs` coins (default from config) into
    /// a single output and waits for it to confirm before the next round.
    /// Returns the ids of the transactions sent.
    pub async fn defragment(
        &self,
        fee: i64,
        max_inputs: Option<usize>,
    ) -> Result<Vec<TxId>, WalletError> {
        let per_tx = max_inputs
            .unwrap_or(self.config.defragment_max_inputs)
            .min(self.config.max_input_per_tx);
        if per_tx < 2 {
            return Err(WalletError::InvalidRequest("defragment needs at least 2 inputs per round".into()));
        }
        let spec = InputSpec {
            version: Some(COIN_VERSION_CURRENT),
            ring_size: self.config.ring_size,
            max_inputs: per_tx,
            consolidate: true,
        };

        let mut sent = Vec::new();
        for round in 0..self.config.defragment_max_rounds {
            let remaining = self
                .unspent_coins(&TokenId::NATIVE, Some(COIN_VERSION_CURRENT))
                .await?
                .len();
            if remaining < 2 {
                debug!(round, remaining, "nothing left to defragment");
                break;
            }
            let plan = TxPlan::new(TxKind::Defragment, Vec::new(), coerce_fee(fee), spec)
                .with_info("defragment");
            let result = self.build_and_send(plan).await?;
            info!(round, inputs = result.inputs.len(), tx_id = %result.tx_id, "defragment round sent");
            self.wait_for_tx(&result.tx_id, self.config.defragment_confirmations)
                .await?;
            sent.push(result.tx_id);
        }
        Ok(sent)
    }

    // --- Pipeline ---

    async fn select_inputs(
        &self,
        token_id: &TokenId,
        spec: &InputSpec,
        target: u64,
    ) -> Result<CoinSelection, WalletError> {
        let coins = self.unspent_coins(token_id, spec.version).await?;
        let selection = if spec.consolidate {
            let selection = self.selector.select(&coins, SelectionTarget::Consolidate, spec.max_inputs)?;
            if selection.is_empty() {
                return Err(WalletError::NotFound(format!(
                    "no spendable coins of token {token_id} to consolidate"
                )));
            }
            if selection.total_value < target {
                return Err(WalletError::InsufficientFunds {
                    have: selection.total_value,
                    need: target,
                });
            }
            selection
        } else {
            self.selector.select(&coins, SelectionTarget::Amount(target), spec.max_inputs)?
        };

        if selection.len() > self.config.max_input_per_tx {
            return Err(WalletError::TxSizeExceeded {
                needed: selection.len(),
                max: self.config.max_input_per_tx,
            });
        }

        Ok(selection)
    }

    async fn fetch_ring(
        &self,
        token_id: &TokenId,
        spec: &InputSpec,
    ) -> Result<Option<RingMembers>, WalletError> {
        if spec.ring_size == 0 {
            return Ok(None);
        }
        let members = self
            .node
            .get_random_ring_members(&self.payment_address, spec.ring_size, token_id)
            .await
            .map_err(WalletError::node("get_random_ring_members"))?;
        Ok(Some(members))
    }

    async fn build_and_send(&self, plan: TxPlan) -> Result<TxResult, WalletError> {
        let _guard = self.send_lock.lock().await;
        debug!(kind = ?plan.kind, state = ?BuildState::Preparing, fee = plan.fee, "building transaction");

        let amount = payment_total(&plan.payments)?;
        let native_target = amount
            .checked_add(plan.fee)
            .ok_or_else(|| WalletError::InvalidRequest("payment total overflows".into()))?;
        let native = self.select_inputs(&TokenId::NATIVE, &plan.inputs, native_target).await?;

        // Both legs are selected before any ring fetch.
        let mut token_amount = 0;
        let mut token_inputs = Vec::new();
        if let Some(leg) = &plan.token {
            token_amount = payment_total(&leg.payments)?;
            if let (Some(id), Some(spec)) = (leg.token_id, leg.inputs) {
                token_inputs = self.select_inputs(&id, &spec, token_amount).await?.chosen;
            }
        }

        let native_ring = self.fetch_ring(&TokenId::NATIVE, &plan.inputs).await?;
        let mut token_params = None;
        if let Some(leg) = &plan.token {
            let ring = match (leg.token_id, leg.inputs) {
                (Some(id), Some(spec)) => self.fetch_ring(&id, &spec).await?,
                _ => None,
            };
            token_params = Some(TokenParams {
                payment_info: leg.payments.clone(),
                input_coins: token_inputs.clone(),
                token_id: leg.token_id,
                coin_cache: ring,
                init: leg.init.clone(),
            });
        }
        debug!(
            state = ?BuildState::InputsGathered,
            inputs = native.len(),
            token_inputs = token_inputs.len(),
            input_value = native.total_value,
            "inputs selected"
        );

        let leg_token = plan.token.as_ref().and_then(|l| l.token_id);
        let metadata_json = plan.metadata.as_ref().map(serde_json::to_value).transpose()?;
        let request_json = Zeroizing::new(
            ProofRequest::new(self.keys.spending_key(), native.chosen.clone(), plan.fee)
                .payments(plan.payments.clone())
                .metadata(plan.metadata.clone())
                .info(&plan.info)
                .ring(native_ring)
                .for_token(leg_token)
                .token(token_params)
                .to_json()?,
        );

        let node_time = self
            .node
            .get_node_time()
            .await
            .map_err(WalletError::node("get_node_time"))?;
        debug!(state = ?BuildState::ProofRequested, node_time, "requesting proof");
        let output = if plan.conversion {
            self.prover
                .build_conversion_transaction(request_json.as_str(), node_time)
                .await?
        } else {
            self.prover.build_transaction(request_json.as_str(), node_time).await?
        };
        drop(request_json);

        let transaction = decode_transaction(&output.encoded_tx)?;
        debug!(state = ?BuildState::Encoded, hash = %output.hash, "transaction encoded");

        info!(state = ?BuildState::Broadcasting, kind = ?plan.kind, "broadcasting transaction");
        let receipt = self
            .node
            .broadcast_transaction(&output.encoded_tx, plan.token.is_some())
            .await
            .map_err(|e| {
                warn!(kind = ?plan.kind, error = %e, "broadcast failed");
                WalletError::Broadcast(e)
            })?;
        let tx_id = receipt.tx_id;
        let token_id = leg_token.or(receipt.token_id);

        let mut reserved: Vec<ReservedCoin> =
            reservations(TokenId::NATIVE, &native.chosen).collect();
        if let Some(id) = leg_token {
            reserved.extend(reservations(id, &token_inputs));
        }
        if !self.ledger.reserve(tx_id, reserved.clone()) {
            warn!(%tx_id, "transaction already holds a reservation");
        }

        let receivers = plan
            .payments
            .iter()
            .chain(plan.token.iter().flat_map(|l| l.payments.iter()))
            .map(|p| Receiver {
                payment_address: p.payment_address.clone(),
                amount: p.amount,
            })
            .collect();
        let now = Utc::now();
        self.history.push(TxHistoryEntry {
            tx_id,
            kind: plan.kind,
            token_id: token_id.unwrap_or(TokenId::NATIVE),
            amount: if plan.token.is_some() { token_amount } else { amount },
            fee: plan.fee,
            receivers,
            metadata: metadata_json,
            info: plan.info.clone(),
            spent_serial_numbers: reserved.iter().map(|r| r.serial_number).collect(),
            status: TxStatus::Pending,
            block_hash: None,
            error: None,
            created_at: now,
            updated_at: now,
        });
        info!(
            state = ?BuildState::Broadcast,
            %tx_id,
            kind = ?plan.kind,
            inputs = reserved.len(),
            "transaction broadcast"
        );

        Ok(TxResult {
            tx_id,
            kind: plan.kind,
            proof_hash: output.hash,
            transaction,
            encoded: output.encoded_tx,
            token_id,
            amount,
            token_amount,
            fee: plan.fee,
            inputs: native.chosen,
            token_inputs,
        })
    }
}
