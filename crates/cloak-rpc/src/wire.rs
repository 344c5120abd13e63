//! Response shapes returned by the chain node and their conversions.

use std::collections::HashMap;

use serde::Deserialize;

use cloak_core::error::NodeError;
use cloak_core::traits::{OutputPage, TxStatusInfo};
use cloak_core::types::{BlockHash, Coin, TokenId, TxId};

/// Result of `listoutputcoins`: coins keyed by the key that found them.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct OutputCoinsResult {
    #[serde(default)]
    pub outputs: HashMap<String, Vec<Coin>>,
    #[serde(default)]
    pub next_height: u64,
}

impl OutputCoinsResult {
    /// Pick the coins listed under the payment address or the viewing key.
    pub fn into_page(mut self, payment_address: &str, viewing_key: &str) -> OutputPage {
        let coins = self
            .outputs
            .remove(payment_address)
            .or_else(|| self.outputs.remove(viewing_key))
            .unwrap_or_default();
        OutputPage {
            coins,
            next_height: self.next_height,
        }
    }
}

/// Result of `sendtransaction` and `sendrawprivacycustomtokentransaction`.
#[derive(Debug, Deserialize)]
pub(crate) struct SendResult {
    #[serde(rename = "TxID")]
    pub tx_id: String,
    #[serde(rename = "TokenID", default)]
    pub token_id: Option<String>,
}

impl SendResult {
    pub fn tx_id(&self) -> Result<TxId, NodeError> {
        self.tx_id
            .parse()
            .map_err(|e| NodeError::MalformedResponse(format!("TxID {:?}: {e}", self.tx_id)))
    }

    /// The minted token, if the node reported one.
    pub fn token_id(&self) -> Result<Option<TokenId>, NodeError> {
        match self.token_id.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => s
                .parse()
                .map(Some)
                .map_err(|e| NodeError::MalformedResponse(format!("TokenID {s:?}: {e}"))),
        }
    }
}

/// Result of `gettransactionbyhash`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct TxByHashResult {
    #[serde(default)]
    pub block_hash: String,
    #[serde(default)]
    pub block_height: u64,
    #[serde(default)]
    pub is_in_block: bool,
    #[serde(default)]
    pub is_in_mempool: bool,
}

impl TxByHashResult {
    pub fn into_status(self) -> Result<TxStatusInfo, NodeError> {
        // Anything but a full 32-byte hex hash means "no block yet".
        let block_hash = if self.block_hash.len() == 64 {
            let hash: BlockHash = self
                .block_hash
                .parse()
                .map_err(|e| NodeError::MalformedResponse(format!("BlockHash: {e}")))?;
            Some(hash)
        } else {
            None
        };
        Ok(TxStatusInfo {
            in_block: self.is_in_block && block_hash.is_some(),
            in_mempool: self.is_in_mempool,
            block_hash,
            block_height: block_hash.map(|_| self.block_height),
            error: None,
        })
    }
}

/// The subset of `retrieveblock` the wallet reads.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct BlockResult {
    #[serde(default)]
    pub confirmations: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct NetworkInfo {
    pub node_time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct BeaconBestState {
    pub beacon_height: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloak_core::types::Derivator;

    fn coin_json(value: u64) -> serde_json::Value {
        let d = Derivator([7; 32]).encode();
        serde_json::json!({
            "Version": 2,
            "PublicKey": d,
            "CoinCommitment": d,
            "SNDerivator": d,
            "Randomness": d,
            "Value": value.to_string(),
        })
    }

    #[test]
    fn output_page_prefers_payment_address() {
        let json = serde_json::json!({
            "Outputs": { "addr": [coin_json(5), coin_json(6)], "view": [coin_json(1)] },
            "NextHeight": 120,
        });
        let result: OutputCoinsResult = serde_json::from_value(json).unwrap();
        let page = result.into_page("addr", "view");
        assert_eq!(page.coins.len(), 2);
        assert_eq!(page.coins[1].value, 6);
        assert_eq!(page.next_height, 120);
    }

    #[test]
    fn output_page_falls_back_to_viewing_key() {
        let json = serde_json::json!({ "Outputs": { "view": [coin_json(1)] } });
        let result: OutputCoinsResult = serde_json::from_value(json).unwrap();
        let page = result.into_page("addr", "view");
        assert_eq!(page.coins.len(), 1);
        assert_eq!(page.next_height, 0);
    }

    #[test]
    fn send_result_parses_ids() {
        let tx = "ab".repeat(32);
        let json = serde_json::json!({ "TxID": tx, "TokenID": "" });
        let result: SendResult = serde_json::from_value(json).unwrap();
        assert_eq!(result.tx_id().unwrap().to_string(), tx);
        assert_eq!(result.token_id().unwrap(), None);

        let bad: SendResult = serde_json::from_value(serde_json::json!({ "TxID": "xyz" })).unwrap();
        assert!(matches!(bad.tx_id(), Err(NodeError::MalformedResponse(_))));
    }

    #[test]
    fn status_without_block_hash() {
        let json = serde_json::json!({ "IsInBlock": false, "IsInMempool": true, "BlockHash": "" });
        let result: TxByHashResult = serde_json::from_value(json).unwrap();
        let status = result.into_status().unwrap();
        assert!(!status.in_block);
        assert!(status.in_mempool);
        assert_eq!(status.block_hash, None);
        assert_eq!(status.block_height, None);
    }

    #[test]
    fn status_in_block() {
        let hash = "0f".repeat(32);
        let json = serde_json::json!({ "IsInBlock": true, "BlockHash": hash, "BlockHeight": 77 });
        let status = serde_json::from_value::<TxByHashResult>(json)
            .unwrap()
            .into_status()
            .unwrap();
        assert!(status.in_block);
        assert_eq!(status.block_hash.unwrap().to_string(), hash);
        assert_eq!(status.block_height, Some(77));
        assert!(!status.is_rejected());
    }

    #[test]
    fn small_results() {
        let b: BlockResult = serde_json::from_str(r#"{"Confirmations":3,"Height":9}"#).unwrap();
        assert_eq!(b.confirmations, 3);
        let n: NetworkInfo = serde_json::from_str(r#"{"NodeTime":1700000000,"Version":"x"}"#).unwrap();
        assert_eq!(n.node_time, 1_700_000_000);
        let s: BeaconBestState = serde_json::from_str(r#"{"BeaconHeight":42}"#).unwrap();
        assert_eq!(s.beacon_height, 42);
    }
}
