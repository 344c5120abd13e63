//! Collaborator interfaces for the Cloak wallet.
//!
//! - [`ChainNode`]: the ledger node reached over RPC (cloak-rpc implements)
//! - [`ProofBackend`]: zero-knowledge proof and ring-signature construction
//! - [`KeyPrimitives`]: key-set and serial-number derivation ([`crate::crypto`] implements)
//!
//! All three are resolved once, when a wallet account is constructed, and
//! shared behind `Arc<dyn ...>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crypto::DerivedKeys;
use crate::error::{KeyError, NodeError, ProofError};
use crate::types::{BlockHash, Coin, Derivator, SerialNumber, TokenId, TxId};

/// Parameters of one page of an output-coin scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputQuery {
    /// Base58-check payment address of the account.
    pub payment_address: String,
    /// Base58-check viewing key, used by the node to decrypt amounts.
    pub viewing_key: String,
    /// Base58-check one-time-address key, used to recognise version-2 coins.
    pub ota_key: String,
    pub token_id: TokenId,
    /// Height to resume the scan from. Zero starts from genesis.
    pub from_height: u64,
    /// Coin version to list; `None` lists every version.
    pub version: Option<u8>,
}

/// One page of owned output coins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputPage {
    pub coins: Vec<Coin>,
    /// Height to request next; zero when the scan is complete.
    pub next_height: u64,
}

/// Decoy coins used to hide the real inputs in a ring signature.
///
/// Passed through opaquely to the proof backend as its coin cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RingMembers {
    pub indices: Vec<u64>,
    pub public_keys: Vec<String>,
    pub commitments: Vec<String>,
    #[serde(default)]
    pub asset_tags: Vec<String>,
}

impl RingMembers {
    pub fn is_empty(&self) -> bool {
        self.public_keys.is_empty()
    }
}

/// Acknowledgement of an accepted broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReceipt {
    pub tx_id: TxId,
    /// Set by the node when the transaction minted a new token.
    pub token_id: Option<TokenId>,
}

/// What the node knows about a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxStatusInfo {
    pub in_block: bool,
    pub in_mempool: bool,
    pub block_hash: Option<BlockHash>,
    pub block_height: Option<u64>,
    /// Rejection reason reported by the node, if any.
    pub error: Option<String>,
}

impl TxStatusInfo {
    /// The node has dropped the transaction for good.
    pub fn is_rejected(&self) -> bool {
        !self.in_block && !self.in_mempool && self.error.is_some()
    }
}

/// A signed, encoded transaction returned by the proof backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOutput {
    /// Base58-check encoding of the transaction JSON.
    pub encoded_tx: String,
    pub hash: TxId,
}

/// A one-time receiving address generated on behalf of a payment address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OtaReceiver {
    pub public_key: String,
    pub tx_random: String,
}

/// The ledger node as seen by the wallet.
///
/// Implementations perform network I/O. Callers wrap errors with the
/// operation name before surfacing them.
#[async_trait]
pub trait ChainNode: Send + Sync {
    /// Fetch one page of output coins owned by the queried keys.
    async fn get_unspent_outputs(&self, query: &OutputQuery) -> Result<OutputPage, NodeError>;

    /// For each serial number, whether it already appears on the ledger.
    ///
    /// The result has the same length and order as `serial_numbers`.
    async fn has_serial_numbers(
        &self,
        payment_address: &str,
        serial_numbers: &[SerialNumber],
        token_id: &TokenId,
    ) -> Result<Vec<bool>, NodeError>;

    async fn get_random_ring_members(
        &self,
        payment_address: &str,
        count: usize,
        token_id: &TokenId,
    ) -> Result<RingMembers, NodeError>;

    /// Submit an encoded transaction. Token transfers use a separate endpoint.
    async fn broadcast_transaction(
        &self,
        encoded: &str,
        is_token: bool,
    ) -> Result<BroadcastReceipt, NodeError>;

    /// Returns [`NodeError::NotFound`] while the node has never seen `tx_id`.
    async fn get_transaction_status(&self, tx_id: &TxId) -> Result<TxStatusInfo, NodeError>;

    async fn get_block_confirmations(&self, block_hash: &BlockHash) -> Result<u64, NodeError>;

    /// Node wall-clock time in Unix seconds.
    async fn get_node_time(&self) -> Result<i64, NodeError>;

    async fn get_chain_height(&self) -> Result<u64, NodeError>;

    /// The protocol address that burns whatever it receives.
    async fn get_burning_address(&self) -> Result<String, NodeError>;
}

/// Builds and signs transactions. Stateless from the wallet's point of view.
#[async_trait]
pub trait ProofBackend: Send + Sync {
    async fn build_transaction(
        &self,
        request_json: &str,
        node_time: i64,
    ) -> Result<ProofOutput, ProofError>;

    /// Build a transaction that converts legacy coins to the current version.
    async fn build_conversion_transaction(
        &self,
        request_json: &str,
        node_time: i64,
    ) -> Result<ProofOutput, ProofError>;

    async fn create_ota_receiver(&self, payment_address: &str) -> Result<OtaReceiver, ProofError>;
}

/// Pure key derivation routines.
pub trait KeyPrimitives: Send + Sync {
    fn derive_key_set(&self, spending_key: &[u8]) -> Result<DerivedKeys, KeyError>;

    /// One serial number per derivator, in order.
    fn derive_serial_numbers(
        &self,
        spending_key: &[u8],
        derivators: &[Derivator],
    ) -> Result<Vec<SerialNumber>, KeyError>;
}
