//! EVM JSON-RPC connection over HTTP
//!
//! Subscriptions are emulated by polling `eth_getLogs` from the head block
//! at subscription time. Each poll walks forward in ranges of at most
//! `max_block_range` blocks and delivers logs sorted by (block, logIndex).
//! A full channel blocks the poller. The poller exits when the receiver is
//! dropped or its retry budget runs out.

use super::abi::{decode_log, parse_data, parse_topics};
use super::backoff::{ExponentialBackoff, MaxRetriesExceeded};
use super::{ChainConnection, ChainError, ContractAbi, DecodedLog, LogStream, TransactionReceipt};
use crate::gas::GasAmount;
use crate::types::normalize_address;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const RETRY_INITIAL_DELAY_MS: u64 = 500;
const RETRY_MAX_DELAY_MS: u64 = 30_000;
const RETRY_MAX_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone)]
pub struct RpcSettings {
    pub poll_interval: Duration,
    pub max_block_range: u64,
    pub channel_buffer: usize,
    pub request_timeout: Duration,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(4000),
            max_block_range: 500,
            channel_buffer: 1000,
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    topics: Vec<String>,
    data: String,
    block_number: Option<String>,
    transaction_hash: Option<String>,
    log_index: Option<String>,
    #[serde(default)]
    removed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    gas_used: String,
    effective_gas_price: Option<String>,
}

fn parse_quantity(s: &str) -> Result<u64, ChainError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::Transport(format!("bad quantity {}: {}", s, e)))
}

fn quantity(n: u64) -> String {
    format!("0x{:x}", n)
}

/// Shared HTTP client for one node
struct RpcClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcClient {
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});

        let response = self.http.post(&self.url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(ChainError::Transport(format!(
                "{} returned HTTP {}",
                method,
                response.status()
            )));
        }

        let parsed: RpcResponse<T> = response.json().await?;
        if let Some(err) = parsed.error {
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(parsed.result)
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let head: String = self
            .call("eth_blockNumber", json!([]))
            .await?
            .ok_or_else(|| ChainError::Transport("eth_blockNumber returned null".to_string()))?;
        parse_quantity(&head)
    }

    async fn get_logs(
        &self,
        address: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<RpcLog>, ChainError> {
        let filter = json!([{
            "address": address,
            "fromBlock": quantity(from),
            "toBlock": quantity(to),
        }]);
        Ok(self.call("eth_getLogs", filter).await?.unwrap_or_default())
    }
}

pub struct JsonRpcConnection {
    chain_id: u64,
    client: Arc<RpcClient>,
    settings: RpcSettings,
}

impl JsonRpcConnection {
    pub fn new(chain_id: u64, url: &str, settings: RpcSettings) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self {
            chain_id,
            client: Arc::new(RpcClient {
                url: url.to_string(),
                http,
                next_id: AtomicU64::new(1),
            }),
            settings,
        })
    }
}

/// Decode and order one batch of raw logs; undecodable logs are skipped
fn decode_batch(
    chain_id: u64,
    address: &str,
    abi: &ContractAbi,
    logs: Vec<RpcLog>,
) -> Vec<DecodedLog> {
    let mut decoded = Vec::with_capacity(logs.len());
    for raw in logs.into_iter().filter(|l| !l.removed) {
        let (Some(block), Some(tx_hash), Some(index)) =
            (&raw.block_number, &raw.transaction_hash, &raw.log_index)
        else {
            continue;
        };

        let parsed = parse_quantity(block).and_then(|block_number| {
            let log_index = parse_quantity(index)?;
            let topics = parse_topics(&raw.topics)?;
            let data = parse_data(&raw.data)?;
            let (event_name, args) = decode_log(abi, &topics, &data)?;
            Ok(DecodedLog {
                chain_id,
                address: address.to_string(),
                event_name,
                args,
                tx_hash: tx_hash.to_lowercase(),
                block_number,
                log_index,
            })
        });

        match parsed {
            Ok(entry) => decoded.push(entry),
            Err(e) => {
                log::debug!("⚠️  Skipping log from {} in tx {}: {}", address, tx_hash, e)
            }
        }
    }
    decoded.sort_by_key(|l| (l.block_number, l.log_index));
    decoded
}

/// Current head, or `None` after a failed attempt has been backed off
///
/// Any successful fetch resets the backoff, so only consecutive failures
/// count against the retry budget.
async fn fetch_head(
    chain_id: u64,
    client: &RpcClient,
    backoff: &mut ExponentialBackoff,
) -> Result<Option<u64>, MaxRetriesExceeded> {
    match client.block_number().await {
        Ok(head) => {
            backoff.reset();
            Ok(Some(head))
        }
        Err(e) => {
            log::warn!("⚠️  [chain {}] eth_blockNumber failed: {}", chain_id, e);
            backoff.sleep().await?;
            Ok(None)
        }
    }
}

async fn poll_logs(
    chain_id: u64,
    address: String,
    abi: ContractAbi,
    client: Arc<RpcClient>,
    settings: RpcSettings,
    mut next_block: u64,
    tx: mpsc::Sender<DecodedLog>,
) {
    let mut backoff =
        ExponentialBackoff::new(RETRY_INITIAL_DELAY_MS, RETRY_MAX_DELAY_MS, RETRY_MAX_ATTEMPTS);
    let mut timer = tokio::time::interval(settings.poll_interval.max(Duration::from_millis(1)));
    let range = settings.max_block_range.max(1);

    'poll: loop {
        timer.tick().await;
        if tx.is_closed() {
            break;
        }

        let head = match fetch_head(chain_id, &client, &mut backoff).await {
            Ok(Some(head)) => head,
            Ok(None) => continue,
            Err(_) => break,
        };

        while next_block <= head {
            let to = std::cmp::min(next_block + range - 1, head);
            let logs = match client.get_logs(&address, next_block, to).await {
                Ok(logs) => logs,
                Err(e) => {
                    log::warn!(
                        "⚠️  [chain {}] eth_getLogs {}..{} for {} failed: {}",
                        chain_id,
                        next_block,
                        to,
                        address,
                        e
                    );
                    if backoff.sleep().await.is_err() {
                        break 'poll;
                    }
                    continue 'poll;
                }
            };
            backoff.reset();

            for entry in decode_batch(chain_id, &address, &abi, logs) {
                if tx.send(entry).await.is_err() {
                    break 'poll;
                }
            }
            next_block = to + 1;
        }
    }

    if tx.is_closed() {
        log::debug!("🔌 [chain {}] Poller for {} stopped", chain_id, address);
    } else {
        log::error!(
            "❌ [chain {}] Poller for {} gave up after {} retries",
            chain_id,
            address,
            RETRY_MAX_ATTEMPTS
        );
    }
}

#[async_trait]
impl ChainConnection for JsonRpcConnection {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn subscribe(&self, address: &str, abi: &ContractAbi) -> Result<LogStream, ChainError> {
        let address = normalize_address(address);
        let head = self.client.block_number().await?;
        let (tx, rx) = mpsc::channel(self.settings.channel_buffer.max(1));

        log::info!(
            "👂 [chain {}] Polling {} from block {} ({} events)",
            self.chain_id,
            address,
            head + 1,
            abi.event_names().len()
        );

        tokio::spawn(poll_logs(
            self.chain_id,
            address,
            abi.clone(),
            self.client.clone(),
            self.settings.clone(),
            head + 1,
            tx,
        ));
        Ok(rx)
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<TransactionReceipt, ChainError> {
        let receipt: RpcReceipt = self
            .client
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?
            .ok_or_else(|| ChainError::ReceiptUnavailable(tx_hash.to_string()))?;

        let gas_used = GasAmount::from_hex_quantity(&receipt.gas_used)
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        let gas_price = receipt
            .effective_gas_price
            .as_deref()
            .map(GasAmount::from_hex_quantity)
            .transpose()
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        Ok(TransactionReceipt { gas_used, gas_price })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn transfer_abi() -> ContractAbi {
        ContractAbi::from_value(&json!([{
            "type": "event",
            "name": "Transfer",
            "anonymous": false,
            "inputs": [
                {"name": "from", "type": "address", "indexed": true},
                {"name": "to", "type": "address", "indexed": true},
                {"name": "value", "type": "uint256", "indexed": false}
            ]
        }]))
        .unwrap()
    }

    fn raw_log(abi: &ContractAbi, block: u64, index: u64) -> RpcLog {
        let selector = abi.inner().events().next().unwrap().selector();
        let from = Address::repeat_byte(0x01).into_word();
        let to = Address::repeat_byte(0x02).into_word();
        RpcLog {
            topics: vec![selector.to_string(), from.to_string(), to.to_string()],
            data: format!("0x{}", hex::encode(U256::from(7u64).to_be_bytes::<32>())),
            block_number: Some(quantity(block)),
            transaction_hash: Some(format!("0x{:064x}", block * 100 + index)),
            log_index: Some(quantity(index)),
            removed: false,
        }
    }

    #[test]
    fn test_quantity_roundtrip() {
        assert_eq!(quantity(255), "0xff");
        assert_eq!(parse_quantity("0xff").unwrap(), 255);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_decode_batch_orders_and_skips() {
        let abi = transfer_abi();
        let mut removed = raw_log(&abi, 9, 0);
        removed.removed = true;
        let mut garbage = raw_log(&abi, 9, 1);
        garbage.topics = vec![format!("0x{}", "00".repeat(32))];

        let logs = vec![
            raw_log(&abi, 11, 0),
            raw_log(&abi, 10, 3),
            raw_log(&abi, 10, 1),
            removed,
            garbage,
        ];
        let decoded = decode_batch(1, "0xabc", &abi, logs);

        let order: Vec<(u64, u64)> = decoded
            .iter()
            .map(|l| (l.block_number, l.log_index))
            .collect();
        assert_eq!(order, vec![(10, 1), (10, 3), (11, 0)]);
        assert_eq!(decoded[0].event_name, "Transfer");
        assert_eq!(decoded[0].args["value"], json!("7"));
    }

    #[test]
    fn test_receipt_deserializes() {
        let receipt: RpcReceipt = serde_json::from_value(json!({
            "gasUsed": "0x5208",
            "effectiveGasPrice": "0x3b9aca00",
            "status": "0x1"
        }))
        .unwrap();
        assert_eq!(
            GasAmount::from_hex_quantity(&receipt.gas_used).unwrap(),
            GasAmount::from(21000u64)
        );
        assert!(receipt.effective_gas_price.is_some());
    }

    fn client(url: &str) -> RpcClient {
        RpcClient {
            url: url.to_string(),
            http: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn request_complete(request: &[u8]) -> bool {
        let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let headers = String::from_utf8_lossy(&request[..end]).to_lowercase();
        let body_len = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        request.len() >= end + 4 + body_len
    }

    /// Node that answers every request with `head` as the result
    async fn serve_head(head: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request_complete(&request) {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let body = json!({"jsonrpc": "2.0", "id": 1, "result": head}).to_string();
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        url
    }

    /// URL of a port nothing listens on
    async fn dead_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        url
    }

    #[tokio::test]
    async fn test_head_fetch_success_resets_retry_budget() {
        let healthy = client(&serve_head("0x10").await);
        let broken = client(&dead_url().await);
        let mut backoff = ExponentialBackoff::new(1, 1, 2);

        // Failures separated by quiet successful polls never exhaust the budget
        for _ in 0..3 {
            assert_eq!(fetch_head(1, &broken, &mut backoff).await.unwrap(), None);
            assert_eq!(backoff.attempts(), 1);
            assert_eq!(fetch_head(1, &healthy, &mut backoff).await.unwrap(), Some(16));
            assert_eq!(backoff.attempts(), 0);
        }

        // Consecutive failures still do
        assert_eq!(fetch_head(1, &broken, &mut backoff).await.unwrap(), None);
        assert_eq!(fetch_head(1, &broken, &mut backoff).await.unwrap(), None);
        assert!(fetch_head(1, &broken, &mut backoff).await.is_err());
    }
}
