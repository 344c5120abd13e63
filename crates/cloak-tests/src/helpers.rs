//! Shared test helpers for the end-to-end suite.
//!
//! [`MockChainNode`] keeps a tiny ledger in memory: owned coins per token,
//! spent serial numbers, and the transactions it has accepted. Broadcast
//! transactions sit in the mempool until mined; mining spends their inputs
//! and credits the payments and change addressed back to the account.
//!
//! [`MockProofBackend`] "proves" a transaction by wrapping the request JSON
//! in base58-check, so the node can read inputs and payments back out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use cloak_core::constants::ENCODE_VERSION;
use cloak_core::crypto::{Curve25519Primitives, DerivedKeys};
use cloak_core::encoding::{check_decode_version, check_encode};
use cloak_core::error::{KeyError, NodeError, ProofError};
use cloak_core::traits::{
    BroadcastReceipt, ChainNode, KeyPrimitives, OtaReceiver, OutputPage, OutputQuery, ProofBackend,
    ProofOutput, RingMembers, TxStatusInfo,
};
use cloak_core::types::{
    BlockHash, Coin, Derivator, Hash256, PaymentInfo, SerialNumber, TokenId, TxId,
};
use cloak_wallet::{KeySet, KeyWallet, Transactor, WalletConfig};

/// Clock reported by the mock node.
pub const NODE_TIME: i64 = 1_700_000_000;

/// Burning address reported by the mock node.
pub const BURNING_ADDRESS: &str = "cloak-burning-address";

/// Payment address that never belongs to a test account.
pub const STRANGER: &str = "cloak-stranger-address";

/// Id assigned to every token minted on the mock node.
pub const MINTED_TOKEN: TokenId = TokenId(Hash256([0x77; 32]));

/// A non-native token id.
pub fn token(n: u8) -> TokenId {
    let mut bytes = [0u8; 32];
    bytes[0] = n;
    bytes[31] = 0xA0;
    TokenId(Hash256(bytes))
}

/// Deterministic account key set for `seed`.
pub fn test_keys(seed: u8) -> KeySet {
    let master = KeyWallet::derive_master(&[seed; 32]).unwrap();
    KeySet::from_key_wallet(&master, &Curve25519Primitives).unwrap()
}

/// Fast polling, a short wait budget, and small rings.
pub fn test_config() -> WalletConfig {
    WalletConfig {
        poll_interval_ms: 1,
        wait_timeout_secs: 5,
        ring_size: 3,
        ..WalletConfig::default()
    }
}

/// A coin whose derivator is unique per `n`.
pub fn make_coin(n: u64, value: u64, version: u8) -> Coin {
    let mut d = [0u8; 32];
    d[..8].copy_from_slice(&n.to_le_bytes());
    d[16] = 0x5A;
    Coin {
        version,
        public_key: vec![(n % 251) as u8 + 1; 32],
        commitment: vec![0xC0; 32],
        derivator: Derivator(d),
        serial_number: None,
        randomness: vec![0x11; 32],
        value,
        info: Vec::new(),
    }
}

fn id_from_counter(n: u64, tag: u8) -> Hash256 {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&n.to_le_bytes());
    bytes[31] = tag;
    Hash256(bytes)
}

fn amount(value: &Value) -> u64 {
    match value {
        Value::String(s) => s.parse().unwrap_or(0),
        Value::Number(n) => n.as_u64().unwrap_or(0),
        _ => 0,
    }
}

fn parse_coins(value: &Value) -> Vec<Coin> {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

fn parse_payments(value: &Value) -> Vec<PaymentInfo> {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Mock chain node
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockTxState {
    Mempool,
    Mined,
    Rejected,
}

#[derive(Debug, Clone)]
struct MockTx {
    state: MockTxState,
    block_hash: BlockHash,
    confirmations: u64,
    error: Option<String>,
    spends: Vec<SerialNumber>,
    outputs: Vec<(TokenId, Coin)>,
}

#[derive(Default)]
struct NodeState {
    coins: HashMap<TokenId, Vec<Coin>>,
    spent: HashSet<SerialNumber>,
    txs: HashMap<TxId, MockTx>,
    tx_order: Vec<TxId>,
    broadcasts: Vec<bool>,
    calls: HashMap<&'static str, usize>,
    next_id: u64,
    height: u64,
    page_size: usize,
    auto_mine: bool,
    fail_broadcast: bool,
}

impl NodeState {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn record(&mut self, call: &'static str) {
        *self.calls.entry(call).or_default() += 1;
    }

    fn mine(&mut self, tx_id: &TxId) {
        let Some(tx) = self.txs.get_mut(tx_id) else { return };
        if tx.state != MockTxState::Mempool {
            return;
        }
        tx.state = MockTxState::Mined;
        let spends = tx.spends.clone();
        let outputs = tx.outputs.clone();
        self.spent.extend(spends);
        for (token, coin) in outputs {
            self.coins.entry(token).or_default().push(coin);
        }
        self.height += 1;
    }
}

/// In-memory chain node for one account.
pub struct MockChainNode {
    owner: String,
    state: Mutex<NodeState>,
}

impl MockChainNode {
    /// A node that mines every accepted transaction immediately.
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            state: Mutex::new(NodeState {
                auto_mine: true,
                height: 100,
                ..NodeState::default()
            }),
        }
    }

    /// Credit the account with one coin per value. Returns the coins added.
    pub fn fund(&self, token: TokenId, version: u8, values: &[u64]) -> Vec<Coin> {
        let mut state = self.state.lock();
        let added: Vec<Coin> = values
            .iter()
            .map(|&v| {
                let n = state.next();
                make_coin(n, v, version)
            })
            .collect();
        state.coins.entry(token).or_default().extend(added.iter().cloned());
        added
    }

    pub fn set_auto_mine(&self, on: bool) {
        self.state.lock().auto_mine = on;
    }

    pub fn set_fail_broadcast(&self, on: bool) {
        self.state.lock().fail_broadcast = on;
    }

    /// Serve output coins `size` at a time. Zero serves everything at once.
    pub fn set_page_size(&self, size: usize) {
        self.state.lock().page_size = size;
    }

    /// Mine every mempool transaction. Returns how many were mined.
    pub fn mine_all(&self) -> usize {
        let mut state = self.state.lock();
        let waiting: Vec<TxId> = state
            .tx_order
            .iter()
            .filter(|id| state.txs.get(id).is_some_and(|t| t.state == MockTxState::Mempool))
            .copied()
            .collect();
        for id in &waiting {
            state.mine(id);
        }
        waiting.len()
    }

    /// Drop a mempool transaction with `reason`.
    pub fn reject(&self, tx_id: &TxId, reason: &str) {
        let mut state = self.state.lock();
        if let Some(tx) = state.txs.get_mut(tx_id) {
            tx.state = MockTxState::Rejected;
            tx.error = Some(reason.to_string());
        }
    }

    /// Number of times `call` reached the node.
    pub fn calls(&self, call: &str) -> usize {
        self.state.lock().calls.get(call).copied().unwrap_or(0)
    }

    /// One flag per accepted broadcast: whether it used the token endpoint.
    pub fn broadcasts(&self) -> Vec<bool> {
        self.state.lock().broadcasts.clone()
    }

    /// Serial numbers the chain knows as spent.
    pub fn spent_count(&self) -> usize {
        self.state.lock().spent.len()
    }

    /// Coins the chain holds for `token`, spent or not.
    pub fn owned_coins(&self, token: &TokenId) -> Vec<Coin> {
        self.state.lock().coins.get(token).cloned().unwrap_or_default()
    }

    fn credit(&self, state: &mut NodeState, outputs: &mut Vec<(TokenId, Coin)>, token: TokenId, value: u64) {
        if value > 0 {
            let n = state.next();
            outputs.push((token, make_coin(n, value, 2)));
        }
    }

    /// Work out what mining `tx` would spend and create.
    fn effects(
        &self,
        state: &mut NodeState,
        tx: &Value,
    ) -> (Vec<SerialNumber>, Vec<(TokenId, Coin)>, Option<TokenId>) {
        let mut spends = Vec::new();
        let mut outputs = Vec::new();

        let inputs = parse_coins(&tx["InputCoins"]);
        let payments = parse_payments(&tx["PaymentInfo"]);
        let fee = amount(&tx["Fee"]);
        spends.extend(inputs.iter().filter_map(|c| c.serial_number));
        let paid: u64 = payments.iter().map(|p| p.amount).sum();
        for p in payments.iter().filter(|p| p.payment_address == self.owner) {
            self.credit(state, &mut outputs, TokenId::NATIVE, p.amount);
        }
        let change = Coin::total_value(&inputs).saturating_sub(paid).saturating_sub(fee);
        self.credit(state, &mut outputs, TokenId::NATIVE, change);

        let mut minted = None;
        let params = &tx["TokenParams"];
        if params.is_object() {
            let token = match serde_json::from_value::<Option<TokenId>>(params["TokenID"].clone()) {
                Ok(Some(id)) => id,
                _ => {
                    minted = Some(MINTED_TOKEN);
                    MINTED_TOKEN
                }
            };
            let inputs = parse_coins(&params["InputCoins"]);
            let payments = parse_payments(&params["PaymentInfo"]);
            spends.extend(inputs.iter().filter_map(|c| c.serial_number));
            let paid: u64 = payments.iter().map(|p| p.amount).sum();
            for p in payments.iter().filter(|p| p.payment_address == self.owner) {
                self.credit(state, &mut outputs, token, p.amount);
            }
            let change = Coin::total_value(&inputs).saturating_sub(paid);
            self.credit(state, &mut outputs, token, change);
        }
        (spends, outputs, minted)
    }
}

#[async_trait]
impl ChainNode for MockChainNode {
    async fn get_unspent_outputs(&self, query: &OutputQuery) -> Result<OutputPage, NodeError> {
        let mut state = self.state.lock();
        state.record("get_unspent_outputs");
        if query.payment_address != self.owner {
            return Ok(OutputPage::default());
        }
        let all: Vec<Coin> = state
            .coins
            .get(&query.token_id)
            .map(|coins| {
                coins
                    .iter()
                    .filter(|c| query.version.is_none_or(|v| c.version == v))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if state.page_size == 0 {
            return Ok(OutputPage { coins: all, next_height: 0 });
        }
        let start = usize::try_from(query.from_height).unwrap_or(usize::MAX).min(all.len());
        let end = (start + state.page_size).min(all.len());
        let next_height = if end < all.len() { end as u64 } else { 0 };
        Ok(OutputPage {
            coins: all[start..end].to_vec(),
            next_height,
        })
    }

    async fn has_serial_numbers(
        &self,
        _payment_address: &str,
        serial_numbers: &[SerialNumber],
        _token_id: &TokenId,
    ) -> Result<Vec<bool>, NodeError> {
        let mut state = self.state.lock();
        state.record("has_serial_numbers");
        Ok(serial_numbers.iter().map(|sn| state.spent.contains(sn)).collect())
    }

    async fn get_random_ring_members(
        &self,
        _payment_address: &str,
        count: usize,
        _token_id: &TokenId,
    ) -> Result<RingMembers, NodeError> {
        self.state.lock().record("get_random_ring_members");
        Ok(RingMembers {
            indices: (0..count as u64).collect(),
            public_keys: (0..count).map(|i| format!("decoy-pk-{i}")).collect(),
            commitments: (0..count).map(|i| format!("decoy-cm-{i}")).collect(),
            asset_tags: Vec::new(),
        })
    }

    async fn broadcast_transaction(
        &self,
        encoded: &str,
        is_token: bool,
    ) -> Result<BroadcastReceipt, NodeError> {
        let mut state = self.state.lock();
        state.record("broadcast_transaction");
        if state.fail_broadcast {
            return Err(NodeError::Rpc {
                code: -6001,
                message: "mempool rejected transaction".into(),
            });
        }
        let bytes = check_decode_version(encoded, ENCODE_VERSION)
            .map_err(|e| NodeError::Rpc { code: -1, message: e.to_string() })?;
        let tx: Value = serde_json::from_slice(&bytes)
            .map_err(|e| NodeError::Rpc { code: -1, message: e.to_string() })?;

        let (spends, outputs, minted) = self.effects(&mut state, &tx);
        let n = state.next();
        let tx_id = id_from_counter(n, 0xEE);
        state.txs.insert(
            tx_id,
            MockTx {
                state: MockTxState::Mempool,
                block_hash: id_from_counter(n, 0xBB),
                confirmations: 0,
                error: None,
                spends,
                outputs,
            },
        );
        state.tx_order.push(tx_id);
        state.broadcasts.push(is_token);
        if state.auto_mine {
            state.mine(&tx_id);
        }
        Ok(BroadcastReceipt { tx_id, token_id: minted })
    }

    async fn get_transaction_status(&self, tx_id: &TxId) -> Result<TxStatusInfo, NodeError> {
        let mut state = self.state.lock();
        state.record("get_transaction_status");
        let tx = state
            .txs
            .get(tx_id)
            .ok_or_else(|| NodeError::NotFound(format!("transaction {tx_id}")))?;
        Ok(match tx.state {
            MockTxState::Mempool => TxStatusInfo {
                in_mempool: true,
                ..TxStatusInfo::default()
            },
            MockTxState::Mined => TxStatusInfo {
                in_block: true,
                block_hash: Some(tx.block_hash),
                block_height: Some(state.height),
                ..TxStatusInfo::default()
            },
            MockTxState::Rejected => TxStatusInfo {
                error: tx.error.clone(),
                ..TxStatusInfo::default()
            },
        })
    }

    /// Each lookup reports one more confirmation than the last.
    async fn get_block_confirmations(&self, block_hash: &BlockHash) -> Result<u64, NodeError> {
        let mut state = self.state.lock();
        state.record("get_block_confirmations");
        let tx = state
            .txs
            .values_mut()
            .find(|t| t.state == MockTxState::Mined && t.block_hash == *block_hash)
            .ok_or_else(|| NodeError::NotFound(format!("block {block_hash}")))?;
        let seen = tx.confirmations;
        tx.confirmations += 1;
        Ok(seen)
    }

    async fn get_node_time(&self) -> Result<i64, NodeError> {
        self.state.lock().record("get_node_time");
        Ok(NODE_TIME)
    }

    /// Each call reports one block higher than the last.
    async fn get_chain_height(&self) -> Result<u64, NodeError> {
        let mut state = self.state.lock();
        state.record("get_chain_height");
        state.height += 1;
        Ok(state.height)
    }

    async fn get_burning_address(&self) -> Result<String, NodeError> {
        self.state.lock().record("get_burning_address");
        Ok(BURNING_ADDRESS.to_string())
    }
}

// ---------------------------------------------------------------------------
// Mock proof backend
// ---------------------------------------------------------------------------

/// One request seen by [`MockProofBackend`].
#[derive(Debug, Clone)]
pub struct ProofCall {
    pub conversion: bool,
    pub node_time: i64,
    pub request: Value,
}

#[derive(Default)]
pub struct MockProofBackend {
    calls: Mutex<Vec<ProofCall>>,
    fail: Mutex<bool>,
    receivers: AtomicUsize,
}

impl MockProofBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, on: bool) {
        *self.fail.lock() = on;
    }

    pub fn calls(&self) -> Vec<ProofCall> {
        self.calls.lock().clone()
    }

    /// The most recent request document.
    pub fn last_request(&self) -> Value {
        self.calls
            .lock()
            .last()
            .map(|c| c.request.clone())
            .unwrap_or(Value::Null)
    }

    fn prove(&self, request_json: &str, node_time: i64, conversion: bool) -> Result<ProofOutput, ProofError> {
        if *self.fail.lock() {
            return Err(ProofError::Backend("invalid ring signature".into()));
        }
        let request: Value =
            serde_json::from_str(request_json).map_err(|e| ProofError::Backend(e.to_string()))?;
        let mut calls = self.calls.lock();
        calls.push(ProofCall {
            conversion,
            node_time,
            request,
        });
        Ok(ProofOutput {
            encoded_tx: check_encode(request_json.as_bytes(), ENCODE_VERSION),
            hash: id_from_counter(calls.len() as u64, 0xAB),
        })
    }
}

#[async_trait]
impl ProofBackend for MockProofBackend {
    async fn build_transaction(
        &self,
        request_json: &str,
        node_time: i64,
    ) -> Result<ProofOutput, ProofError> {
        self.prove(request_json, node_time, false)
    }

    async fn build_conversion_transaction(
        &self,
        request_json: &str,
        node_time: i64,
    ) -> Result<ProofOutput, ProofError> {
        self.prove(request_json, node_time, true)
    }

    async fn create_ota_receiver(&self, payment_address: &str) -> Result<OtaReceiver, ProofError> {
        let n = self.receivers.fetch_add(1, Ordering::SeqCst);
        Ok(OtaReceiver {
            public_key: format!("ota-{n}-{}", payment_address.len()),
            tx_random: format!("random-{n}"),
        })
    }
}

// ---------------------------------------------------------------------------
// Key primitives
// ---------------------------------------------------------------------------

/// Real curve primitives that count serial-number derivations.
#[derive(Default)]
pub struct CountingPrimitives {
    inner: Curve25519Primitives,
    derived: AtomicUsize,
}

impl CountingPrimitives {
    /// Serial numbers derived so far.
    pub fn derived(&self) -> usize {
        self.derived.load(Ordering::SeqCst)
    }
}

impl KeyPrimitives for CountingPrimitives {
    fn derive_key_set(&self, spending_key: &[u8]) -> Result<DerivedKeys, KeyError> {
        self.inner.derive_key_set(spending_key)
    }

    fn derive_serial_numbers(
        &self,
        spending_key: &[u8],
        derivators: &[Derivator],
    ) -> Result<Vec<SerialNumber>, KeyError> {
        self.derived.fetch_add(derivators.len(), Ordering::SeqCst);
        self.inner.derive_serial_numbers(spending_key, derivators)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A [`Transactor`] wired to fresh mocks.
pub struct Harness {
    pub transactor: Transactor,
    pub node: Arc<MockChainNode>,
    pub prover: Arc<MockProofBackend>,
    pub primitives: Arc<CountingPrimitives>,
}

impl Harness {
    pub fn new(seed: u8) -> Self {
        Self::with_config(seed, test_config())
    }

    pub fn with_config(seed: u8, config: WalletConfig) -> Self {
        let keys = test_keys(seed);
        let node = Arc::new(MockChainNode::new(&keys.payment_address().unwrap()));
        let prover = Arc::new(MockProofBackend::new());
        let primitives = Arc::new(CountingPrimitives::default());
        let transactor = Transactor::new(
            keys,
            node.clone(),
            prover.clone(),
            primitives.clone(),
            config,
        )
        .unwrap();
        Self {
            transactor,
            node,
            prover,
            primitives,
        }
    }

    /// This account's payment address.
    pub fn address(&self) -> String {
        self.transactor.payment_address().to_string()
    }

    /// Native balance, panicking on error.
    pub async fn native_balance(&self) -> u64 {
        self.transactor.balance(&TokenId::NATIVE).await.unwrap()
    }
}

/// Payment of `amount` to an address outside the test account.
pub fn pay_stranger(amount: u64) -> Vec<PaymentInfo> {
    vec![PaymentInfo::new(STRANGER, amount)]
}
