//! JSON-RPC chain client with endpoint failover.
//!
//! One client serves one configured chain. Reads are plain `eth_call`s at the
//! `latest` block tag over HTTP POST; a transport failure, timeout, or 5xx on
//! the primary endpoint is retried once against the fallback before
//! surfacing a network error. JSON-RPC error envelopes are returned typed and
//! are not retried. The client performs no mutating calls.

use alloy_primitives::{Address, U256};
use alloy_sol_types::{SolCall, sol};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;

use crate::types::{EvmAddress, TokenAmount};

sol! {
    function balanceOf(address owner) external view returns (uint256);
    function ownerOf(uint256 tokenId) external view returns (address);
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// Transport failure, timeout, or bad-gateway class response after the
    /// fallback retry.
    #[error("chain endpoint unreachable: {0}")]
    Network(String),
    /// The node answered with a JSON-RPC error envelope.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    /// The rule referenced a chain this client is not configured for.
    #[error("unsupported chain id {0}")]
    UnsupportedChain(u64),
    /// `ownerOf` reverted; the token does not exist.
    #[error("token not found")]
    TokenNotFound,
    /// The node returned something that does not decode as the expected ABI.
    #[error("malformed rpc response: {0}")]
    BadResponse(String),
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

pub struct ChainClient {
    http: reqwest::Client,
    primary: Url,
    fallback: Option<Url>,
    chain_id: u64,
    timeout: Duration,
    next_id: AtomicU64,
}

impl ChainClient {
    pub fn new(
        primary: Url,
        fallback: Option<Url>,
        chain_id: u64,
        timeout: Duration,
    ) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Network(e.to_string()))?;
        Ok(Self {
            http,
            primary,
            fallback,
            chain_id,
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Performs one JSON-RPC 2.0 call, failing over to the fallback endpoint
    /// on transport-level trouble. Returns the `result` field.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        match self.post(&self.primary, &body).await {
            Ok(result) => Ok(result),
            Err(ChainError::Network(primary_err)) => {
                let Some(fallback) = &self.fallback else {
                    return Err(ChainError::Network(primary_err));
                };
                tracing::warn!(
                    method,
                    error = %primary_err,
                    "primary chain endpoint failed, retrying against fallback"
                );
                self.post(fallback, &body).await
            }
            Err(other) => Err(other),
        }
    }

    async fn post(&self, endpoint: &Url, body: &Value) -> Result<Value, ChainError> {
        let response = self
            .http
            .post(endpoint.clone())
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| ChainError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Network(format!("http status {status}")));
        }

        let envelope: RpcEnvelope = response
            .json()
            .await
            .map_err(|e| ChainError::BadResponse(e.to_string()))?;
        if let Some(error) = envelope.error {
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        envelope
            .result
            .ok_or_else(|| ChainError::BadResponse("missing result field".to_string()))
    }

    /// Readiness probe: does the endpoint answer `eth_chainId`?
    pub async fn health_check(&self) -> bool {
        self.call("eth_chainId", json!([])).await.is_ok()
    }

    /// `balanceOf(address)` on an ERC-20 contract. An empty return decodes
    /// as zero, not as an error.
    pub async fn erc20_balance_of(
        &self,
        chain_id: u64,
        token: &EvmAddress,
        holder: &EvmAddress,
    ) -> Result<U256, ChainError> {
        self.require_chain(chain_id)?;
        let calldata = balanceOfCall {
            owner: holder.address(),
        }
        .abi_encode();
        let word = self.eth_call(token, &calldata).await?;
        Ok(U256::from_be_slice(&word))
    }

    /// `ownerOf(uint256)` on an ERC-721 contract. A reverted call means the
    /// token does not exist and maps to [`ChainError::TokenNotFound`].
    pub async fn erc721_owner_of(
        &self,
        chain_id: u64,
        token: &EvmAddress,
        token_id: TokenAmount,
    ) -> Result<EvmAddress, ChainError> {
        self.require_chain(chain_id)?;
        let calldata = ownerOfCall {
            tokenId: token_id.value(),
        }
        .abi_encode();
        let word = match self.eth_call(token, &calldata).await {
            Ok(word) => word,
            Err(ChainError::Rpc { .. }) => return Err(ChainError::TokenNotFound),
            Err(other) => return Err(other),
        };
        if word.len() < 32 {
            return Err(ChainError::BadResponse(format!(
                "ownerOf returned {} bytes, expected 32",
                word.len()
            )));
        }
        Ok(EvmAddress::new(Address::from_slice(&word[12..32])))
    }

    async fn eth_call(&self, to: &EvmAddress, calldata: &[u8]) -> Result<Vec<u8>, ChainError> {
        let params = json!([
            {
                "to": to.canonical(),
                "data": format!("0x{}", hex::encode(calldata)),
            },
            "latest",
        ]);
        let result = self.call("eth_call", params).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| ChainError::BadResponse("eth_call result is not a string".to_string()))?;
        hex::decode(raw.trim_start_matches("0x"))
            .map_err(|e| ChainError::BadResponse(format!("eth_call result is not hex: {e}")))
    }

    fn require_chain(&self, chain_id: u64) -> Result<(), ChainError> {
        if chain_id == self.chain_id {
            Ok(())
        } else {
            Err(ChainError::UnsupportedChain(chain_id))
        }
    }
}
