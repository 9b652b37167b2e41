//! EVM JSON-RPC provider over HTTP

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, TxHash, B256, U64};
use alloy_sol_types::{decode_revert_reason, Revert, SolError};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    BlockTag, ChainError, ChainProvider, ContractLog, LogFilter, TransactionReceipt,
    TransactionRequest,
};

/// Wallet bridge reachable over JSON-RPC (Frame, Clef, a dev node with unlocked accounts)
pub struct JsonRpcProvider {
    url: String,
    client: Client,
    next_id: AtomicU64,
}

impl JsonRpcProvider {
    /// Fails when the HTTP client cannot be built with the given timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ChainError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ChainError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .json::<Value>()
            .await?;

        if let Some(err) = resp.get("error") {
            let err = classify_error(err);
            tracing::debug!(method, error = %err, "JSON-RPC call failed");
            return Err(err);
        }

        let result = resp
            .get("result")
            .cloned()
            .ok_or_else(|| ChainError::InvalidResponse(format!("no result for {}", method)))?;

        serde_json::from_value(result)
            .map_err(|e| ChainError::InvalidResponse(format!("{}: {}", method, e)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    block_number: Option<U64>,
    transaction_hash: Option<TxHash>,
    log_index: Option<U64>,
}

impl RawLog {
    /// Pending logs carry no block or hash and are dropped.
    fn into_log(self) -> Option<ContractLog> {
        Some(ContractLog {
            address: self.address,
            topics: self.topics,
            data: self.data,
            block_number: self.block_number?.to::<u64>(),
            transaction_hash: self.transaction_hash?,
            log_index: self.log_index.map(|i| i.to::<u64>()).unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: TxHash,
    block_number: Option<U64>,
    status: Option<U64>,
    #[serde(default)]
    logs: Vec<RawLog>,
}

fn revert_data(value: &Value) -> Option<Bytes> {
    let hex = value
        .as_str()
        .or_else(|| value.get("data").and_then(Value::as_str))?;
    hex.parse::<Bytes>().ok()
}

fn decode_revert(data: &[u8]) -> Option<String> {
    Revert::abi_decode(data, true)
        .map(|r| r.reason)
        .ok()
        .or_else(|| decode_revert_reason(data))
}

/// Map a JSON-RPC error object onto the chain error taxonomy
pub(crate) fn classify_error(error: &Value) -> ChainError {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();

    match code {
        4001 => ChainError::UserRejected,
        4100 => ChainError::NotConnected,
        _ if code == 3 || message.contains("execution reverted") => {
            let reason = error
                .get("data")
                .and_then(revert_data)
                .and_then(|data| decode_revert(&data))
                .unwrap_or_else(|| {
                    message
                        .trim_start_matches("execution reverted")
                        .trim_start_matches(':')
                        .trim()
                        .to_string()
                });
            ChainError::TransactionReverted {
                tx_hash: None,
                reason: if reason.is_empty() {
                    "execution reverted".to_string()
                } else {
                    reason
                },
            }
        }
        _ => ChainError::Rpc { code, message },
    }
}

impl ChainProvider for JsonRpcProvider {
    async fn request_accounts(&self) -> Result<Vec<Address>, ChainError> {
        self.request("eth_requestAccounts", json!([])).await
    }

    async fn accounts(&self) -> Result<Vec<Address>, ChainError> {
        self.request("eth_accounts", json!([])).await
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        let id: U64 = self.request("eth_chainId", json!([])).await?;
        Ok(id.to::<u64>())
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let number: U64 = self.request("eth_blockNumber", json!([])).await?;
        Ok(number.to::<u64>())
    }

    async fn call(&self, request: &TransactionRequest, block: BlockTag) -> Result<Bytes, ChainError> {
        self.request("eth_call", json!([request, block.to_param()]))
            .await
    }

    async fn send_transaction(&self, request: &TransactionRequest) -> Result<TxHash, ChainError> {
        self.request("eth_sendTransaction", json!([request])).await
    }

    async fn transaction_receipt(
        &self,
        tx_hash: TxHash,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        let raw: Option<RawReceipt> = self
            .request("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        // Receipts without a block number are not mined yet
        let Some(block_number) = raw.block_number else {
            return Ok(None);
        };

        Ok(Some(TransactionReceipt {
            transaction_hash: raw.transaction_hash,
            block_number: block_number.to::<u64>(),
            succeeded: raw.status.map(|s| s.to::<u64>() == 1).unwrap_or(true),
            logs: raw.logs.into_iter().filter_map(RawLog::into_log).collect(),
        }))
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<ContractLog>, ChainError> {
        let topics: Vec<Value> = filter
            .topics
            .iter()
            .map(|t| t.map(|t| json!(t)).unwrap_or(Value::Null))
            .collect();

        let raw: Vec<RawLog> = self
            .request(
                "eth_getLogs",
                json!([{
                    "address": filter.address,
                    "fromBlock": BlockTag::Number(filter.from_block).to_param(),
                    "toBlock": BlockTag::Number(filter.to_block).to_param(),
                    "topics": topics,
                }]),
            )
            .await?;

        Ok(raw.into_iter().filter_map(RawLog::into_log).collect())
    }
}
