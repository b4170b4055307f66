//! In-process chain connection
//!
//! Logs are pushed with [`MockChainConnection::emit`] and receipts are
//! registered up front. Used by tests and by local runs without a node.

use super::{ChainConnection, ChainError, ContractAbi, DecodedLog, LogStream, TransactionReceipt};
use crate::types::normalize_address;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};

pub struct MockChainConnection {
    chain_id: u64,
    channel_buffer: usize,
    subscriptions: Mutex<HashMap<String, mpsc::Sender<DecodedLog>>>,
    receipts: Mutex<HashMap<String, TransactionReceipt>>,
    next_block: Mutex<u64>,
}

impl MockChainConnection {
    pub fn new(chain_id: u64) -> Self {
        Self::with_buffer(chain_id, 64)
    }

    pub fn with_buffer(chain_id: u64, channel_buffer: usize) -> Self {
        Self {
            chain_id,
            channel_buffer: channel_buffer.max(1),
            subscriptions: Mutex::new(HashMap::new()),
            receipts: Mutex::new(HashMap::new()),
            next_block: Mutex::new(1),
        }
    }

    pub async fn set_receipt(&self, tx_hash: &str, receipt: TransactionReceipt) {
        self.receipts
            .lock()
            .await
            .insert(tx_hash.to_lowercase(), receipt);
    }

    /// True while someone holds the stream for `address`
    pub async fn is_subscribed(&self, address: &str) -> bool {
        self.subscriptions
            .lock()
            .await
            .get(&normalize_address(address))
            .is_some_and(|tx| !tx.is_closed())
    }

    /// End the stream for `address` the way a node that gave up would
    ///
    /// False if there was no stream.
    pub async fn close_stream(&self, address: &str) -> bool {
        self.subscriptions
            .lock()
            .await
            .remove(&normalize_address(address))
            .is_some()
    }

    /// Deliver a log; false when nobody is listening on its address
    pub async fn emit(&self, log: DecodedLog) -> bool {
        let sender = self
            .subscriptions
            .lock()
            .await
            .get(&normalize_address(&log.address))
            .cloned();
        match sender {
            Some(tx) => tx.send(log).await.is_ok(),
            None => false,
        }
    }

    /// Emit `event_name(args)` from `address` in a fresh block
    pub async fn emit_event(
        &self,
        address: &str,
        event_name: &str,
        args: Value,
        tx_hash: &str,
    ) -> bool {
        let block_number = {
            let mut next = self.next_block.lock().await;
            let block = *next;
            *next += 1;
            block
        };
        self.emit(DecodedLog {
            chain_id: self.chain_id,
            address: normalize_address(address),
            event_name: event_name.to_string(),
            args,
            tx_hash: tx_hash.to_lowercase(),
            block_number,
            log_index: 0,
        })
        .await
    }
}

#[async_trait]
impl ChainConnection for MockChainConnection {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn subscribe(&self, address: &str, _abi: &ContractAbi) -> Result<LogStream, ChainError> {
        let (tx, rx) = mpsc::channel(self.channel_buffer);
        self.subscriptions
            .lock()
            .await
            .insert(normalize_address(address), tx);
        Ok(rx)
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<TransactionReceipt, ChainError> {
        self.receipts
            .lock()
            .await
            .get(&tx_hash.to_lowercase())
            .cloned()
            .ok_or_else(|| ChainError::ReceiptUnavailable(tx_hash.to_string()))
    }
}
