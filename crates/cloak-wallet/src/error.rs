//! Wallet error types.

use cloak_core::error::{KeyError, NodeError, ProofError};
use cloak_core::types::TxId;
use thiserror::Error;

/// Errors that can occur in wallet operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Malformed serialized key, failed derivation, or wrong key view.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Candidate coins cannot cover the target.
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds {
        /// Spendable total in nano-coins.
        have: u64,
        /// Payments plus fee in nano-coins.
        need: u64,
    },

    /// The selection needs more inputs than one transaction may carry.
    #[error("transaction needs {needed} inputs, limit is {max}")]
    TxSizeExceeded { needed: usize, max: usize },

    /// The proof backend failed or returned nothing usable.
    #[error("proof construction failed: {0}")]
    ProofConstruction(String),

    /// The node refused the broadcast.
    #[error("broadcast failed: {0}")]
    Broadcast(NodeError),

    /// A chain node call failed outside of broadcasting.
    #[error("{op}: {source}")]
    Node {
        /// RPC operation that failed.
        op: &'static str,
        source: NodeError,
    },

    /// The polling budget ran out.
    #[error("timed out after {waited_ms} ms waiting for {what}")]
    Timeout { what: String, waited_ms: u64 },

    /// The node dropped the transaction.
    #[error("transaction {tx_id} rejected: {reason}")]
    TxRejected { tx_id: TxId, reason: String },

    /// Unknown transaction or token.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid caller-supplied parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid BIP-39 mnemonic phrase.
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// JSON or base58 encoding of a request or response failed.
    #[error("serialization: {0}")]
    Serialization(String),

    /// Configuration could not be loaded.
    #[error("config: {0}")]
    Config(String),
}

impl WalletError {
    /// Wrap a node error with the name of the operation that produced it.
    pub fn node(op: &'static str) -> impl FnOnce(NodeError) -> Self {
        move |source| WalletError::Node { op, source }
    }
}

impl From<ProofError> for WalletError {
    fn from(e: ProofError) -> Self {
        WalletError::ProofConstruction(e.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(e: serde_json::Error) -> Self {
        WalletError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_insufficient_funds() {
        let e = WalletError::InsufficientFunds { have: 100, need: 200 };
        assert_eq!(e.to_string(), "insufficient funds: have 100, need 200");
    }

    #[test]
    fn display_tx_size() {
        let e = WalletError::TxSizeExceeded { needed: 31, max: 30 };
        assert_eq!(e.to_string(), "transaction needs 31 inputs, limit is 30");
    }

    #[test]
    fn node_wrapper_names_operation() {
        let wrap = WalletError::node("get_node_time");
        let e = wrap(NodeError::Transport("connection refused".into()));
        assert_eq!(e.to_string(), "get_node_time: transport: connection refused");
    }

    #[test]
    fn from_key_error_is_transparent() {
        let e: WalletError = KeyError::Checksum.into();
        assert_eq!(e, WalletError::Key(KeyError::Checksum));
        assert_eq!(e.to_string(), "checksum mismatch");
    }

    #[test]
    fn from_proof_error() {
        let e: WalletError = ProofError::Empty.into();
        assert!(matches!(e, WalletError::ProofConstruction(_)));
    }

    #[test]
    fn clone_and_eq() {
        let e1 = WalletError::NotFound("tx".into());
        assert_eq!(e1.clone(), e1);
    }
}
