//! End-to-end listener tests
//!
//! Drive `BlockchainListenerManager` with `MockChainConnection` and check
//! what lands in the event store and the aggregates.

use chainscope::chain::{ChainConnection, ContractAbi, MockChainConnection, TransactionReceipt};
use chainscope::config::ContractConfig;
use chainscope::gas::GasAmount;
use chainscope::store::PersistenceGateway;
use chainscope::types::{AnalyticsEvent, EventFilter, Pagination};
use chainscope::{AnalyticsError, AnalyticsService};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const WALLET_A: &str = "0x1111111111111111111111111111111111111111";
const WALLET_B: &str = "0x2222222222222222222222222222222222222222";
const CONTRACT: &str = "0x000000000000000000000000000000000000ABC0";

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn contract_config(chain_id: u64, address: &str) -> ContractConfig {
    ContractConfig {
        chain_id,
        address: address.to_string(),
        name: Some("Vault".to_string()),
        contract_type: Some("defi".to_string()),
        abi: json!([]),
    }
}

fn setup() -> (Arc<AnalyticsService>, Arc<MockChainConnection>) {
    let gateway = Arc::new(PersistenceGateway::memory_only());
    let service = Arc::new(AnalyticsService::new(gateway, 20));
    let chain = Arc::new(MockChainConnection::new(1));
    (service, chain)
}

fn receipt(gas: u64) -> TransactionReceipt {
    TransactionReceipt {
        gas_used: GasAmount::from(gas),
        gas_price: Some(GasAmount::from(1_000_000_000u64)),
    }
}

#[tokio::test]
async fn test_three_events_two_wallets() {
    let (service, chain) = setup();
    let listener = service.listener(
        vec![chain.clone() as Arc<dyn ChainConnection>],
        vec![contract_config(1, CONTRACT)],
        8,
    );
    assert_eq!(listener.start().await, 1);

    for (tx, wallet) in [("0xa1", WALLET_A), ("0xa2", WALLET_A), ("0xa3", WALLET_B)] {
        chain.set_receipt(tx, receipt(21_000)).await;
        let args = json!({"user": wallet, "amount": "5"});
        assert!(chain.emit_event(CONTRACT, "Deposit", args, tx).await);
    }

    let contracts = service.contracts().clone();
    let address = CONTRACT.to_lowercase();
    assert!(
        eventually(|| {
            let contracts = contracts.clone();
            let address = address.clone();
            async move {
                contracts
                    .get_by_address(&address)
                    .await
                    .ok()
                    .flatten()
                    .is_some_and(|c| c.total_interactions == 3)
            }
        })
        .await,
        "contract never reached 3 interactions"
    );

    let contract = service.contracts().get_by_address(CONTRACT).await.unwrap().unwrap();
    assert_eq!(contract.unique_users, 2);
    assert_eq!(contract.events.get("Deposit"), Some(&3));
    assert_eq!(contract.gas_used, GasAmount::from(63_000u64));
    assert_eq!(contract.name.as_deref(), Some("Vault"));

    let users = service.users().clone();
    assert!(
        eventually(|| {
            let users = users.clone();
            async move {
                users
                    .get_by_wallet(WALLET_B)
                    .await
                    .ok()
                    .flatten()
                    .is_some_and(|u| u.total_transactions == 1)
            }
        })
        .await
    );
    let user = service.users().get_by_wallet(WALLET_A).await.unwrap().unwrap();
    assert_eq!(user.total_interactions, 2);
    assert_eq!(user.total_transactions, 2);
    assert_eq!(user.total_gas_spent, GasAmount::from(42_000u64));

    let filter = EventFilter {
        contract_address: Some(CONTRACT.to_string()),
        ..Default::default()
    };
    let page = service.events().query(&filter, Pagination::default(), None).unwrap();
    assert_eq!(page.total, 3);
    for event in &page.data {
        let AnalyticsEvent::Contract(event) = event else {
            panic!("expected a contract event");
        };
        assert_eq!(event.chain_id, 1);
        assert_eq!(event.gas_used, Some(GasAmount::from(21_000u64)));
    }

    listener.stop().await;
}

#[tokio::test]
async fn test_missing_receipt_still_stores_event() {
    let (service, chain) = setup();
    let listener = service.listener(vec![chain.clone() as Arc<dyn ChainConnection>], Vec::new(), 4);
    let abi = ContractAbi::from_value(&json!([])).unwrap();
    listener.add_contract(CONTRACT, abi, None, None, 1).await.unwrap();

    assert!(chain.emit_event(CONTRACT, "Ping", json!({"from": WALLET_A}), "0xdead").await);

    let events = service.events().clone();
    assert!(
        eventually(|| {
            let events = events.clone();
            async move { events.count(&EventFilter::default()).unwrap_or(0) == 1 }
        })
        .await
    );

    let page = service
        .events()
        .query(&EventFilter::default(), Pagination::default(), None)
        .unwrap();
    let AnalyticsEvent::Contract(event) = &page.data[0] else {
        panic!("expected a contract event");
    };
    assert_eq!(event.gas_used, None);
    assert_eq!(event.wallet_address.as_deref(), Some(WALLET_A));
}

#[tokio::test]
async fn test_event_without_wallet_counts_no_user() {
    let (service, chain) = setup();
    let listener = service.listener(
        vec![chain.clone() as Arc<dyn ChainConnection>],
        vec![contract_config(1, CONTRACT)],
        4,
    );
    listener.start().await;

    chain.set_receipt("0xb1", receipt(30_000)).await;
    assert!(chain.emit_event(CONTRACT, "Paused", json!({"by": "admin"}), "0xb1").await);

    let contracts = service.contracts().clone();
    assert!(
        eventually(|| {
            let contracts = contracts.clone();
            async move {
                contracts
                    .get_by_address(CONTRACT)
                    .await
                    .ok()
                    .flatten()
                    .is_some_and(|c| c.total_interactions == 1)
            }
        })
        .await
    );
    let contract = service.contracts().get_by_address(CONTRACT).await.unwrap().unwrap();
    assert_eq!(contract.unique_users, 0);
    assert_eq!(service.users().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_chain_rejected() {
    let (service, chain) = setup();
    let listener = service.listener(vec![chain as Arc<dyn ChainConnection>], Vec::new(), 4);
    let abi = ContractAbi::from_value(&json!([])).unwrap();

    let err = listener.add_contract(CONTRACT, abi, None, None, 137).await.unwrap_err();
    assert!(matches!(err, AnalyticsError::NoProviderForChain(137)));
    assert!(listener.list_contracts().await.is_empty());
}

#[tokio::test]
async fn test_add_is_idempotent_and_remove_unsubscribes() {
    let (service, chain) = setup();
    let listener = service.listener(vec![chain.clone() as Arc<dyn ChainConnection>], Vec::new(), 4);
    let abi = ContractAbi::from_value(&json!([])).unwrap();

    listener
        .add_contract(CONTRACT, abi.clone(), Some("Vault".to_string()), None, 1)
        .await
        .unwrap();
    listener
        .add_contract(&CONTRACT.to_lowercase(), abi, None, None, 1)
        .await
        .unwrap();

    let listed = listener.list_contracts().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].address, CONTRACT.to_lowercase());
    assert_eq!(listed[0].name.as_deref(), Some("Vault"));

    assert!(listener.remove_contract(CONTRACT, 1).await);
    assert!(!listener.remove_contract(CONTRACT, 1).await);
    assert!(listener.list_contracts().await.is_empty());

    let watched_chain = chain.clone();
    assert!(
        eventually(|| {
            let chain = watched_chain.clone();
            async move { !chain.is_subscribed(CONTRACT).await }
        })
        .await,
        "stream should close once the dispatcher is aborted"
    );
}

#[tokio::test]
async fn test_ended_stream_is_no_longer_listed() {
    let (service, chain) = setup();
    let listener = Arc::new(service.listener(
        vec![chain.clone() as Arc<dyn ChainConnection>],
        vec![contract_config(1, CONTRACT)],
        4,
    ));
    assert_eq!(listener.start().await, 1);
    assert_eq!(listener.list_contracts().await.len(), 1);

    assert!(chain.close_stream(CONTRACT).await);
    let watched = listener.clone();
    assert!(
        eventually(|| {
            let listener = watched.clone();
            async move { listener.list_contracts().await.is_empty() }
        })
        .await,
        "contract still listed after its stream ended"
    );

    // Adding again resubscribes
    let abi = ContractAbi::from_value(&json!([])).unwrap();
    listener.add_contract(CONTRACT, abi, None, None, 1).await.unwrap();
    assert_eq!(listener.list_contracts().await.len(), 1);
    assert!(chain.is_subscribed(CONTRACT).await);
}

#[tokio::test]
async fn test_bad_abi_skipped_at_start() {
    let (service, chain) = setup();
    let mut broken = contract_config(1, "0x00000000000000000000000000000000000000ff");
    broken.abi = json!("not an abi");
    let listener = service.listener(
        vec![chain as Arc<dyn ChainConnection>],
        vec![broken, contract_config(1, CONTRACT), contract_config(10, CONTRACT)],
        4,
    );

    assert_eq!(listener.start().await, 1);
    let listed = listener.list_contracts().await;
    assert_eq!(listed[0].chain_id, 1);
}
