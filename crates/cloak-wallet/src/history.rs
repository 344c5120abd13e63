//! In-memory transaction history.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use cloak_core::types::{BlockHash, SerialNumber, TokenId, TxId};

/// Which operation produced a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Transfer,
    TokenTransfer,
    TokenMint,
    Conversion,
    Stake,
    Unstake,
    WithdrawReward,
    ContributeLiquidity,
    WithdrawLiquidity,
    Trade,
    Burn,
    Defragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

/// A receiver as recorded in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receiver {
    pub payment_address: String,
    pub amount: u64,
}

/// One outgoing transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxHistoryEntry {
    pub tx_id: TxId,
    pub kind: TxKind,
    pub token_id: TokenId,
    /// Sum of payments, excluding the fee.
    pub amount: u64,
    pub fee: u64,
    pub receivers: Vec<Receiver>,
    pub metadata: Option<serde_json::Value>,
    pub info: String,
    /// Serial numbers of the coins this transaction spends.
    pub spent_serial_numbers: Vec<SerialNumber>,
    pub status: TxStatus,
    pub block_hash: Option<BlockHash>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only log with status updates.
#[derive(Default)]
pub struct TxHistory {
    entries: RwLock<Vec<TxHistoryEntry>>,
}

impl TxHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: TxHistoryEntry) {
        self.entries.write().push(entry);
    }

    /// Move a pending entry to a terminal status. Returns `false` if the
    /// entry is unknown or already terminal.
    pub fn resolve(
        &self,
        tx_id: &TxId,
        status: TxStatus,
        block_hash: Option<BlockHash>,
        error: Option<String>,
    ) -> bool {
        let mut entries = self.entries.write();
        let Some(entry) = entries.iter_mut().find(|e| &e.tx_id == tx_id) else {
            return false;
        };
        if entry.status != TxStatus::Pending {
            return false;
        }
        entry.status = status;
        entry.block_hash = block_hash;
        entry.error = error;
        entry.updated_at = Utc::now();
        true
    }

    pub fn get(&self, tx_id: &TxId) -> Option<TxHistoryEntry> {
        self.entries.read().iter().find(|e| &e.tx_id == tx_id).cloned()
    }

    pub fn all(&self) -> Vec<TxHistoryEntry> {
        self.entries.read().clone()
    }

    pub fn for_token(&self, token_id: &TokenId) -> Vec<TxHistoryEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| &e.token_id == token_id)
            .cloned()
            .collect()
    }

    pub fn pending_ids(&self) -> Vec<TxId> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.status == TxStatus::Pending)
            .map(|e| e.tx_id)
            .collect()
    }
}
