//! Chain connections
//!
//! A [`ChainConnection`] turns a contract subscription into a bounded stream
//! of decoded logs and resolves transaction receipts. The listener manager
//! only talks to this trait; [`rpc::JsonRpcConnection`] polls an EVM node
//! and [`mock::MockChainConnection`] is driven in-process.

pub mod abi;
pub mod backoff;
pub mod mock;
pub mod rpc;

use crate::gas::GasAmount;
use alloy_json_abi::JsonAbi;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

pub use mock::MockChainConnection;
pub use rpc::{JsonRpcConnection, RpcSettings};

#[derive(Debug)]
pub enum ChainError {
    /// JSON-RPC error object returned by the node
    Rpc { code: i64, message: String },
    Transport(String),
    Abi(String),
    ReceiptUnavailable(String),
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        ChainError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Transport(format!("malformed response: {}", err))
    }
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::Rpc { code, message } => write!(f, "RPC error {}: {}", code, message),
            ChainError::Transport(e) => write!(f, "Transport error: {}", e),
            ChainError::Abi(e) => write!(f, "ABI error: {}", e),
            ChainError::ReceiptUnavailable(tx) => write!(f, "Receipt unavailable for {}", tx),
        }
    }
}

impl std::error::Error for ChainError {}

/// One decoded contract log
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLog {
    pub chain_id: u64,
    pub address: String,
    pub event_name: String,
    /// Decoded parameters keyed by name
    pub args: Value,
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionReceipt {
    pub gas_used: GasAmount,
    pub gas_price: Option<GasAmount>,
}

/// Bounded stream of logs for one subscription; dropping it unsubscribes
pub type LogStream = mpsc::Receiver<DecodedLog>;

/// Parsed contract ABI
#[derive(Debug, Clone)]
pub struct ContractAbi(JsonAbi);

impl ContractAbi {
    pub fn from_value(value: &Value) -> Result<Self, ChainError> {
        serde_json::from_value(value.clone())
            .map(Self)
            .map_err(|e| ChainError::Abi(e.to_string()))
    }

    pub fn parse(json: &str) -> Result<Self, ChainError> {
        serde_json::from_str(json)
            .map(Self)
            .map_err(|e| ChainError::Abi(e.to_string()))
    }

    pub fn inner(&self) -> &JsonAbi {
        &self.0
    }

    pub fn event_names(&self) -> Vec<String> {
        self.0.events().map(|e| e.name.clone()).collect()
    }
}

#[async_trait]
pub trait ChainConnection: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Start delivering every event `address` emits, in log order
    async fn subscribe(&self, address: &str, abi: &ContractAbi) -> Result<LogStream, ChainError>;

    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<TransactionReceipt, ChainError>;
}
