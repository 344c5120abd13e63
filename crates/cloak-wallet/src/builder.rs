//! Proof-backend request assembly and encoded-transaction decoding.
//!
//! The proof backend takes one JSON document describing the whole
//! transaction: the sender's secret key (base64), payments, chosen inputs,
//! fee, optional metadata, decoy ring members, and an optional token
//! sub-transaction. It answers with the transaction JSON wrapped in
//! base58-check, which [`decode_transaction`] unwraps for the history log.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use cloak_core::constants::ENCODE_VERSION;
use cloak_core::encoding::check_decode_version;
use cloak_core::traits::RingMembers;
use cloak_core::types::{Coin, PaymentInfo, TokenId, amount_string};

use crate::error::WalletError;
use crate::metadata::Metadata;

/// Name, symbol, and supply of a token being minted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TokenInit {
    pub token_name: String,
    pub token_symbol: String,
    #[serde(with = "amount_string")]
    pub amount: u64,
}

/// Token sub-transaction carried inside a proof request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TokenParams {
    pub payment_info: Vec<PaymentInfo>,
    pub input_coins: Vec<Coin>,
    /// `None` when minting a new token.
    #[serde(rename = "TokenID")]
    pub token_id: Option<TokenId>,
    pub coin_cache: Option<RingMembers>,
    #[serde(flatten)]
    pub init: Option<TokenInit>,
}

/// Everything the proof backend needs to build one transaction.
#[derive(Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProofRequest {
    #[serde(rename = "SenderSK")]
    sender_sk: String,
    pub payment_info: Vec<PaymentInfo>,
    pub input_coins: Vec<Coin>,
    #[serde(with = "amount_string")]
    pub fee: u64,
    pub has_privacy: bool,
    #[serde(rename = "TokenID")]
    pub token_id: Option<TokenId>,
    pub metadata: Option<Metadata>,
    /// Free-form memo, base64 encoded.
    pub info: String,
    pub coin_cache: Option<RingMembers>,
    pub token_params: Option<TokenParams>,
}

impl ProofRequest {
    pub fn new(spending_key: &[u8], input_coins: Vec<Coin>, fee: u64) -> Self {
        Self {
            sender_sk: BASE64.encode(spending_key),
            payment_info: Vec::new(),
            input_coins,
            fee,
            has_privacy: true,
            token_id: None,
            metadata: None,
            info: String::new(),
            coin_cache: None,
            token_params: None,
        }
    }

    pub fn payments(mut self, payments: Vec<PaymentInfo>) -> Self {
        self.payment_info = payments;
        self
    }

    pub fn metadata(mut self, metadata: Option<Metadata>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn info(mut self, info: &str) -> Self {
        self.info = BASE64.encode(info.as_bytes());
        self
    }

    pub fn ring(mut self, ring: Option<RingMembers>) -> Self {
        self.coin_cache = ring;
        self
    }

    /// Token the request moves, `None` for native-only and minting requests.
    pub fn for_token(mut self, token_id: Option<TokenId>) -> Self {
        self.token_id = token_id;
        self
    }

    pub fn token(mut self, params: Option<TokenParams>) -> Self {
        self.token_params = params;
        self
    }

    pub fn to_json(&self) -> Result<String, WalletError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Drop for ProofRequest {
    fn drop(&mut self) {
        self.sender_sk.zeroize();
    }
}

impl fmt::Debug for ProofRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofRequest")
            .field("sender_sk", &"[REDACTED]")
            .field("payments", &self.payment_info.len())
            .field("inputs", &self.input_coins.len())
            .field("fee", &self.fee)
            .field("token_id", &self.token_id)
            .finish_non_exhaustive()
    }
}

/// Unwrap a base58-check encoded transaction into its JSON body.
pub fn decode_transaction(encoded: &str) -> Result<serde_json::Value, WalletError> {
    if encoded.is_empty() {
        return Err(WalletError::ProofConstruction("backend returned an empty transaction".into()));
    }
    let bytes = check_decode_version(encoded, ENCODE_VERSION)
        .map_err(|e| WalletError::ProofConstruction(format!("undecodable transaction: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| WalletError::ProofConstruction(format!("transaction is not JSON: {e}")))
}
