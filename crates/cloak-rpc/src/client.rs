//! [`ChainNode`] over the node's JSON-RPC interface.

use std::time::Duration;

use async_trait::async_trait;
use jsonrpsee::core::client::{ClientT, Error as ClientError};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use cloak_core::error::NodeError;
use cloak_core::traits::{
    BroadcastReceipt, ChainNode, OutputPage, OutputQuery, RingMembers, TxStatusInfo,
};
use cloak_core::types::{BlockHash, SerialNumber, TokenId, TxId};

use crate::wire::{
    BeaconBestState, BlockResult, NetworkInfo, OutputCoinsResult, SendResult, TxByHashResult,
};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Chain node reached over HTTP JSON-RPC.
pub struct RpcChainNode {
    client: HttpClient,
    endpoint: String,
}

impl RpcChainNode {
    pub fn new(endpoint: &str) -> Result<Self, NodeError> {
        Self::with_timeout(endpoint, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self, NodeError> {
        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(endpoint)
            .map_err(|e| NodeError::Transport(format!("cannot build client for {endpoint}: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<R: DeserializeOwned>(
        &self,
        method: &'static str,
        args: Vec<Value>,
    ) -> Result<R, NodeError> {
        let mut params = ArrayParams::new();
        for arg in args {
            params
                .insert(arg)
                .map_err(|e| NodeError::MalformedResponse(format!("{method} params: {e}")))?;
        }
        debug!(method, "rpc request");
        self.client
            .request(method, params)
            .await
            .map_err(map_client_error)
    }
}

pub(crate) fn map_client_error(e: ClientError) -> NodeError {
    match e {
        ClientError::Call(obj) => NodeError::Rpc {
            code: i64::from(obj.code()),
            message: obj.message().to_string(),
        },
        ClientError::ParseError(e) => NodeError::MalformedResponse(e.to_string()),
        other => NodeError::Transport(other.to_string()),
    }
}

/// The node answers lookups of unknown transactions with a call error.
fn is_not_found(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("not found") || lower.contains("not exist")
}

fn token_param(token_id: &TokenId) -> Value {
    json!(token_id.to_string())
}

#[async_trait]
impl ChainNode for RpcChainNode {
    async fn get_unspent_outputs(&self, query: &OutputQuery) -> Result<OutputPage, NodeError> {
        let keys = json!([{
            "PaymentAddress": query.payment_address,
            "ReadonlyKey": query.viewing_key,
            "OTASecretKey": query.ota_key,
            "StartHeight": query.from_height,
        }]);
        let version = query.version.map_or(json!(-1), |v| json!(v));
        let result: OutputCoinsResult = self
            .call(
                "listoutputcoins",
                vec![keys, token_param(&query.token_id), version],
            )
            .await?;
        Ok(result.into_page(&query.payment_address, &query.viewing_key))
    }

    async fn has_serial_numbers(
        &self,
        payment_address: &str,
        serial_numbers: &[SerialNumber],
        token_id: &TokenId,
    ) -> Result<Vec<bool>, NodeError> {
        let encoded: Vec<String> = serial_numbers.iter().map(SerialNumber::encode).collect();
        self.call(
            "hasserialnumbers",
            vec![json!(payment_address), json!(encoded), token_param(token_id)],
        )
        .await
    }

    async fn get_random_ring_members(
        &self,
        payment_address: &str,
        count: usize,
        token_id: &TokenId,
    ) -> Result<RingMembers, NodeError> {
        self.call(
            "randomcommitmentsandpublickeys",
            vec![json!(payment_address), json!(count), token_param(token_id)],
        )
        .await
    }

    async fn broadcast_transaction(
        &self,
        encoded: &str,
        is_token: bool,
    ) -> Result<BroadcastReceipt, NodeError> {
        let method = if is_token {
            "sendrawprivacycustomtokentransaction"
        } else {
            "sendtransaction"
        };
        let result: SendResult = self.call(method, vec![json!(encoded)]).await?;
        Ok(BroadcastReceipt {
            tx_id: result.tx_id()?,
            token_id: result.token_id()?,
        })
    }

    async fn get_transaction_status(&self, tx_id: &TxId) -> Result<TxStatusInfo, NodeError> {
        let result = self
            .call::<TxByHashResult>("gettransactionbyhash", vec![json!(tx_id.to_string())])
            .await;
        match result {
            Ok(found) => found.into_status(),
            Err(NodeError::Rpc { message, .. }) if is_not_found(&message) => {
                Err(NodeError::NotFound(format!("transaction {tx_id}")))
            }
            // Any other refusal means the node dropped the transaction.
            Err(NodeError::Rpc { message, .. }) => Ok(TxStatusInfo {
                error: Some(message),
                ..Default::default()
            }),
            Err(e) => Err(e),
        }
    }

    async fn get_block_confirmations(&self, block_hash: &BlockHash) -> Result<u64, NodeError> {
        let block: BlockResult = self
            .call("retrieveblock", vec![json!(block_hash.to_string()), json!("1")])
            .await?;
        Ok(block.confirmations)
    }

    async fn get_node_time(&self) -> Result<i64, NodeError> {
        let info: NetworkInfo = self.call("getnetworkinfo", Vec::new()).await?;
        Ok(info.node_time)
    }

    async fn get_chain_height(&self) -> Result<u64, NodeError> {
        let state: BeaconBestState = self.call("getbeaconbeststate", Vec::new()).await?;
        Ok(state.beacon_height)
    }

    async fn get_burning_address(&self) -> Result<String, NodeError> {
        self.call("getburningaddress", vec![json!(0)]).await
    }
}
