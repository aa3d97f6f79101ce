//! Solana RPC signature-detail lookups.
//!
//! Some activity notices arrive without balance metadata; the missing detail
//! is fetched with `getTransaction`. Lookups within one webhook are
//! sequential and spaced by a fixed delay to respect provider rate limits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::domain::{AppError, ExternalServiceError};
use crate::infra::ingest::solana::{SolanaTransaction, TokenBalance};

/// Fixed inter-call delay between sequential lookups.
pub const DEFAULT_LOOKUP_DELAY: Duration = Duration::from_millis(200);

/// Source of full transaction details for a signature.
#[async_trait]
pub trait TransactionDetailSource: Send + Sync {
    /// Fetch the transaction for `signature`, or `None` when the node does
    /// not know it (yet).
    async fn transaction_detail(
        &self,
        signature: &str,
    ) -> Result<Option<SolanaTransaction>, AppError>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<T: Serialize> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'static str,
    params: T,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransactionResult {
    slot: Option<u64>,
    block_time: Option<i64>,
    meta: Option<RpcTransactionMeta>,
    transaction: Option<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransactionMeta {
    #[serde(default)]
    pre_balances: Vec<u64>,
    #[serde(default)]
    post_balances: Vec<u64>,
    #[serde(default)]
    pre_token_balances: Vec<TokenBalance>,
    #[serde(default)]
    post_token_balances: Vec<TokenBalance>,
}

#[derive(Debug, Deserialize)]
struct RpcTransaction {
    message: Option<RpcMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcMessage {
    #[serde(default)]
    account_keys: Vec<RpcAccountKey>,
}

#[derive(Debug, Deserialize)]
struct RpcAccountKey {
    pubkey: String,
}

/// JSON-RPC client for a Solana node.
#[derive(Debug, Clone)]
pub struct SolanaRpcClient {
    http_client: reqwest::Client,
    rpc_url: String,
}

impl SolanaRpcClient {
    pub fn new(rpc_url: &str) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| {
                AppError::ExternalService(ExternalServiceError::Configuration(e.to_string()))
            })?;
        Ok(Self {
            http_client,
            rpc_url: rpc_url.to_string(),
        })
    }
}

#[async_trait]
impl TransactionDetailSource for SolanaRpcClient {
    #[instrument(skip(self))]
    async fn transaction_detail(
        &self,
        signature: &str,
    ) -> Result<Option<SolanaTransaction>, AppError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: "get-transaction",
            method: "getTransaction",
            params: serde_json::json!([
                signature,
                {
                    "encoding": "jsonParsed",
                    "maxSupportedTransactionVersion": 0,
                    "commitment": "confirmed"
                }
            ]),
        };

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalService(ExternalServiceError::Network(e.to_string()))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(ExternalServiceError::ApiError {
                status_code: status.as_u16(),
                message: body,
            }));
        }

        let rpc_response: JsonRpcResponse<RpcTransactionResult> =
            response.json().await.map_err(|e| {
                AppError::ExternalService(ExternalServiceError::ParseError(e.to_string()))
            })?;

        if let Some(err) = rpc_response.error {
            return Err(AppError::ExternalService(ExternalServiceError::ApiError {
                status_code: 200,
                message: format!("RPC error {}: {}", err.code, err.message),
            }));
        }

        let Some(result) = rpc_response.result else {
            debug!(signature = %signature, "Transaction not found on node");
            return Ok(None);
        };

        let meta = result.meta.unwrap_or(RpcTransactionMeta {
            pre_balances: vec![],
            post_balances: vec![],
            pre_token_balances: vec![],
            post_token_balances: vec![],
        });
        let account_keys = result
            .transaction
            .and_then(|t| t.message)
            .map(|m| m.account_keys.into_iter().map(|k| k.pubkey).collect())
            .unwrap_or_default();

        Ok(Some(SolanaTransaction {
            signature: signature.to_string(),
            slot: result.slot,
            is_vote: false,
            account_keys,
            pre_balances: meta.pre_balances,
            post_balances: meta.post_balances,
            pre_token_balances: meta.pre_token_balances,
            post_token_balances: meta.post_token_balances,
            block_time: result.block_time,
        }))
    }
}
