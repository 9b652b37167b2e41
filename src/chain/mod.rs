//! Wallet-connected chain access
//!
//! `ChainProvider` is the raw EVM JSON-RPC surface (implemented over HTTP by
//! [`JsonRpcProvider`]); [`ChainClient`] layers the process-wide signer binding,
//! invalidation and confirmation waiting on top of it.

use std::future::Future;

use alloy_primitives::{Address, Bytes, TxHash, B256, U256};
use serde::Serialize;
use thiserror::Error;

mod client;
mod rpc;

pub use client::{ChainClient, ChainOptions, PendingTx, SignerBinding, WalletEvent};
pub use rpc::JsonRpcProvider;

/// Errors raised by chain access
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("No wallet found: {0}")]
    NoWalletFound(String),

    #[error("Request rejected by the user")]
    UserRejected,

    #[error("Wallet is not connected")]
    NotConnected,

    #[error("Signer binding is stale, reconnect the wallet and retry")]
    StaleSigner,

    #[error("Transaction reverted: {reason}")]
    TransactionReverted {
        tx_hash: Option<TxHash>,
        reason: String,
    },

    #[error("Transaction {tx_hash} was not confirmed in time")]
    TransactionTimedOut { tx_hash: TxHash },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),
}

/// Block selector for read calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Number(u64),
}

impl BlockTag {
    pub fn to_param(self) -> String {
        match self {
            BlockTag::Latest => "latest".to_string(),
            BlockTag::Number(n) => format!("{:#x}", n),
        }
    }
}

/// Transaction or call request as sent to `eth_call` / `eth_sendTransaction`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
}

/// A log emitted by a mined transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub transaction_hash: TxHash,
    pub log_index: u64,
}

/// Receipt of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub succeeded: bool,
    pub logs: Vec<ContractLog>,
}

/// `eth_getLogs` filter. `topics[i] == None` matches any value at position i.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub from_block: u64,
    pub to_block: u64,
    pub topics: Vec<Option<B256>>,
}

/// Raw wallet provider capability.
///
/// Implementations are expected to map EIP-1193 user rejection (code 4001) to
/// [`ChainError::UserRejected`] and contract reverts to
/// [`ChainError::TransactionReverted`].
pub trait ChainProvider: Send + Sync + 'static {
    /// Prompt the wallet for account access (`eth_requestAccounts`)
    fn request_accounts(&self) -> impl Future<Output = Result<Vec<Address>, ChainError>> + Send;

    /// Currently exposed accounts without prompting (`eth_accounts`)
    fn accounts(&self) -> impl Future<Output = Result<Vec<Address>, ChainError>> + Send;

    fn chain_id(&self) -> impl Future<Output = Result<u64, ChainError>> + Send;

    fn block_number(&self) -> impl Future<Output = Result<u64, ChainError>> + Send;

    fn call(
        &self,
        request: &TransactionRequest,
        block: BlockTag,
    ) -> impl Future<Output = Result<Bytes, ChainError>> + Send;

    fn send_transaction(
        &self,
        request: &TransactionRequest,
    ) -> impl Future<Output = Result<TxHash, ChainError>> + Send;

    fn transaction_receipt(
        &self,
        tx_hash: TxHash,
    ) -> impl Future<Output = Result<Option<TransactionReceipt>, ChainError>> + Send;

    fn logs(
        &self,
        filter: &LogFilter,
    ) -> impl Future<Output = Result<Vec<ContractLog>, ChainError>> + Send;
}
