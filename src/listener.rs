//! Multi-chain contract listener
//!
//! One [`ChainConnection`] per chain id, one subscription per
//! (chain id, contract address). Each subscription gets a dispatcher task
//! that pulls decoded logs off the bounded stream and spawns a handler per
//! log. Handler concurrency is capped by a semaphore, so a saturated
//! pipeline stops the dispatcher pulling and the stream fills up behind it.
//!
//! A failing handler is logged and dropped; it never affects the
//! subscription or other handlers.

use crate::aggregates::{
    system_clock, Clock, ContractAnalyticsAggregator, UserAnalyticsAggregator, UserStatsUpdate,
};
use crate::chain::{ChainConnection, ContractAbi, DecodedLog, LogStream};
use crate::config::ContractConfig;
use crate::error::AnalyticsError;
use crate::events::EventStore;
use crate::types::{normalize_address, AnalyticsEvent, ContractEvent, NewContract};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;

/// Argument names checked for the acting wallet, in priority order
const WALLET_ARG_KEYS: [&str; 3] = ["user", "owner", "from"];

/// `0x` followed by 40 hex digits
pub fn looks_like_address(s: &str) -> bool {
    s.len() == 42
        && (s.starts_with("0x") || s.starts_with("0X"))
        && s[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

/// First wallet-like argument among `user`, `owner`, `from`
pub fn extract_wallet(args: &Value) -> Option<String> {
    WALLET_ARG_KEYS
        .iter()
        .filter_map(|key| args.get(*key).and_then(Value::as_str))
        .find(|candidate| looks_like_address(candidate))
        .map(normalize_address)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenedContract {
    pub chain_id: u64,
    pub address: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub contract_type: Option<String>,
}

struct Subscription {
    contract: ListenedContract,
    dispatcher: JoinHandle<()>,
}

/// Turns one decoded log into stored event and aggregate updates
struct LogHandler {
    events: Arc<EventStore>,
    contracts: Arc<ContractAnalyticsAggregator>,
    users: Arc<UserAnalyticsAggregator>,
    clock: Clock,
}

impl LogHandler {
    async fn handle(
        &self,
        connection: &dyn ChainConnection,
        entry: DecodedLog,
    ) -> Result<(), AnalyticsError> {
        let receipt = match connection.get_transaction_receipt(&entry.tx_hash).await {
            Ok(receipt) => Some(receipt),
            Err(e) => {
                log::warn!("⚠️  [chain {}] {}; storing event without gas", entry.chain_id, e);
                None
            }
        };
        let gas_used = receipt.as_ref().map(|r| r.gas_used.clone());
        let gas_price = receipt.and_then(|r| r.gas_price);
        let wallet = extract_wallet(&entry.args);

        let event = ContractEvent {
            id: format!("{}:{}:{}", entry.chain_id, entry.tx_hash, entry.log_index),
            contract_address: normalize_address(&entry.address),
            event_name: entry.event_name.clone(),
            tx_hash: entry.tx_hash.clone(),
            block_number: entry.block_number,
            log_index: entry.log_index,
            wallet_address: wallet.clone(),
            chain_id: entry.chain_id,
            gas_used: gas_used.clone(),
            gas_price,
            event_args: entry.args,
            timestamp: (self.clock)(),
        };
        let address = event.contract_address.clone();
        self.events.store(AnalyticsEvent::Contract(event))?;

        let gas = gas_used.unwrap_or_default();
        let updated = self
            .contracts
            .update(&address, &entry.event_name, wallet.as_deref(), &gas, None)
            .await?;
        if updated.is_none() {
            log::warn!("⚠️  Event {} for untracked contract {}", entry.event_name, address);
        }

        if let Some(wallet) = wallet {
            self.users.get_or_create(&wallet, None).await?;
            self.users
                .update_stats(
                    &wallet,
                    UserStatsUpdate {
                        new_interaction: true,
                        new_transaction: true,
                        gas_spent: Some(gas),
                        ..Default::default()
                    },
                )
                .await?;
        }

        log::debug!(
            "🔔 [chain {}] {}.{} block {} log {}",
            entry.chain_id,
            address,
            entry.event_name,
            entry.block_number,
            entry.log_index
        );
        Ok(())
    }
}

async fn dispatch(
    mut stream: LogStream,
    connection: Arc<dyn ChainConnection>,
    handler: Arc<LogHandler>,
    permits: Arc<Semaphore>,
) {
    while let Some(entry) = stream.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let connection = connection.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let tx_hash = entry.tx_hash.clone();
            if let Err(e) = handler.handle(connection.as_ref(), entry).await {
                log::error!("❌ Failed to handle log from tx {}: {}", tx_hash, e);
            }
        });
    }
}

pub struct BlockchainListenerManager {
    connections: HashMap<u64, Arc<dyn ChainConnection>>,
    configured: Vec<ContractConfig>,
    subscriptions: Mutex<HashMap<(u64, String), Subscription>>,
    handler: Arc<LogHandler>,
    permits: Arc<Semaphore>,
}

impl BlockchainListenerManager {
    pub fn new(
        connections: Vec<Arc<dyn ChainConnection>>,
        configured: Vec<ContractConfig>,
        events: Arc<EventStore>,
        contracts: Arc<ContractAnalyticsAggregator>,
        users: Arc<UserAnalyticsAggregator>,
        max_in_flight_handlers: usize,
    ) -> Self {
        Self::with_clock(
            connections,
            configured,
            events,
            contracts,
            users,
            max_in_flight_handlers,
            system_clock(),
        )
    }

    pub fn with_clock(
        connections: Vec<Arc<dyn ChainConnection>>,
        configured: Vec<ContractConfig>,
        events: Arc<EventStore>,
        contracts: Arc<ContractAnalyticsAggregator>,
        users: Arc<UserAnalyticsAggregator>,
        max_in_flight_handlers: usize,
        clock: Clock,
    ) -> Self {
        let connections = connections
            .into_iter()
            .map(|c| (c.chain_id(), c))
            .collect();
        Self {
            connections,
            configured,
            subscriptions: Mutex::new(HashMap::new()),
            handler: Arc::new(LogHandler {
                events,
                contracts,
                users,
                clock,
            }),
            permits: Arc::new(Semaphore::new(max_in_flight_handlers.max(1))),
        }
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Subscribe to every configured contract; returns how many are live
    ///
    /// A contract that fails (bad ABI, unknown chain, subscribe error) is
    /// logged and skipped.
    pub async fn start(&self) -> usize {
        log::info!(
            "🚀 Starting listeners for {} configured contracts on chains {:?}",
            self.configured.len(),
            self.chain_ids()
        );

        for contract in &self.configured {
            let abi = match ContractAbi::from_value(&contract.abi) {
                Ok(abi) => abi,
                Err(e) => {
                    log::error!("❌ Skipping {}: {}", contract.address, e);
                    continue;
                }
            };
            if let Err(e) = self
                .add_contract(
                    &contract.address,
                    abi,
                    contract.name.clone(),
                    contract.contract_type.clone(),
                    contract.chain_id,
                )
                .await
            {
                log::error!(
                    "❌ Failed to listen to {} on chain {}: {}",
                    contract.address,
                    contract.chain_id,
                    e
                );
            }
        }

        let live = self.list_contracts().await.len();
        log::info!("✅ Listening to {} contracts", live);
        live
    }

    /// Begin listening to `address` on `chain_id`; no-op if already listening
    pub async fn add_contract(
        &self,
        address: &str,
        abi: ContractAbi,
        name: Option<String>,
        contract_type: Option<String>,
        chain_id: u64,
    ) -> Result<(), AnalyticsError> {
        let connection = self
            .connections
            .get(&chain_id)
            .cloned()
            .ok_or(AnalyticsError::NoProviderForChain(chain_id))?;
        let address = normalize_address(address);
        let key = (chain_id, address.clone());

        let mut subscriptions = self.subscriptions.lock().await;
        if let Some(existing) = subscriptions.get(&key) {
            if !existing.dispatcher.is_finished() {
                return Ok(());
            }
        }

        self.handler
            .contracts
            .get_or_create(NewContract {
                address: address.clone(),
                name: name.clone(),
                contract_type: contract_type.clone(),
                ..Default::default()
            })
            .await?;

        let stream = connection.subscribe(&address, &abi).await?;
        let dispatcher = tokio::spawn(dispatch(
            stream,
            connection,
            self.handler.clone(),
            self.permits.clone(),
        ));

        log::info!(
            "👂 [chain {}] Listening to {} ({} events)",
            chain_id,
            name.as_deref().unwrap_or(&address),
            abi.event_names().len()
        );
        subscriptions.insert(
            key,
            Subscription {
                contract: ListenedContract {
                    chain_id,
                    address,
                    name,
                    contract_type,
                },
                dispatcher,
            },
        );
        Ok(())
    }

    /// Stop listening; false if there was no subscription
    ///
    /// Handlers already spawned run to completion.
    pub async fn remove_contract(&self, address: &str, chain_id: u64) -> bool {
        let key = (chain_id, normalize_address(address));
        match self.subscriptions.lock().await.remove(&key) {
            Some(subscription) => {
                subscription.dispatcher.abort();
                log::info!("🔌 [chain {}] Stopped listening to {}", chain_id, key.1);
                true
            }
            None => false,
        }
    }

    /// Active subscriptions ordered by chain id then address
    ///
    /// A subscription whose stream has ended is not active; `add_contract`
    /// will resubscribe it.
    pub async fn list_contracts(&self) -> Vec<ListenedContract> {
        let mut contracts: Vec<ListenedContract> = self
            .subscriptions
            .lock()
            .await
            .values()
            .filter(|s| !s.dispatcher.is_finished())
            .map(|s| s.contract.clone())
            .collect();
        contracts.sort_by(|a, b| (a.chain_id, &a.address).cmp(&(b.chain_id, &b.address)));
        contracts
    }

    /// Remove every subscription
    pub async fn stop(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        for (_, subscription) in subscriptions.drain() {
            subscription.dispatcher.abort();
        }
        log::info!("🛑 All contract listeners stopped");
    }
}
