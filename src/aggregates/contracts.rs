use super::{system_clock, Clock};
use crate::gas::GasAmount;
use crate::store::{KeyedLocks, PersistenceGateway, StoreError};
use crate::types::{merge_metadata, normalize_address, ContractAnalytics, Metadata, NewContract};
use std::sync::Arc;

/// Per-contract interaction counters
pub struct ContractAnalyticsAggregator {
    gateway: Arc<PersistenceGateway>,
    locks: KeyedLocks,
    clock: Clock,
}

impl ContractAnalyticsAggregator {
    pub fn new(gateway: Arc<PersistenceGateway>) -> Self {
        Self::with_clock(gateway, system_clock())
    }

    pub fn with_clock(gateway: Arc<PersistenceGateway>, clock: Clock) -> Self {
        Self {
            gateway,
            locks: KeyedLocks::new(),
            clock,
        }
    }

    /// Existing record for the address, or a zeroed one created now
    pub async fn get_or_create(
        &self,
        contract: NewContract,
    ) -> Result<ContractAnalytics, StoreError> {
        let record = contract.into_record((self.clock)());
        self.gateway
            .run(|backend| backend.insert_contract_if_absent(&record))
    }

    /// Count one interaction; `None` when the contract was never created
    pub async fn update(
        &self,
        address: &str,
        event_name: &str,
        wallet_address: Option<&str>,
        gas_used: &GasAmount,
        metadata: Option<&Metadata>,
    ) -> Result<Option<ContractAnalytics>, StoreError> {
        let address = normalize_address(address);
        let wallet = wallet_address
            .map(normalize_address)
            .filter(|w| !w.is_empty());

        let _guard = self.locks.lock(&address).await;
        let now = (self.clock)();

        self.gateway.run(|backend| {
            let Some(mut record) = backend.get_contract(&address)? else {
                return Ok(None);
            };

            record.total_interactions += 1;
            if let Some(wallet) = &wallet {
                if backend.add_contract_user(&address, wallet, now)? {
                    record.unique_users = backend.count_contract_users(&address)?;
                }
            }
            record.last_interaction = Some(now);
            record.gas_used += gas_used;
            *record.events.entry(event_name.to_string()).or_insert(0) += 1;
            if let Some(extra) = metadata {
                merge_metadata(&mut record.metadata, extra);
            }

            backend.save_contract(&record)?;
            Ok(Some(record))
        })
    }

    pub async fn get_by_address(
        &self,
        address: &str,
    ) -> Result<Option<ContractAnalytics>, StoreError> {
        let address = normalize_address(address);
        self.gateway.run(|backend| backend.get_contract(&address))
    }

    /// All contracts, most interactions first (address breaks ties)
    pub async fn get_all(&self) -> Result<Vec<ContractAnalytics>, StoreError> {
        let mut contracts = self.gateway.run(|backend| backend.list_contracts())?;
        contracts.sort_by(|a, b| {
            b.total_interactions
                .cmp(&a.total_interactions)
                .then_with(|| a.address.cmp(&b.address))
        });
        Ok(contracts)
    }

    pub async fn get_top(&self, limit: usize) -> Result<Vec<ContractAnalytics>, StoreError> {
        let mut contracts = self.get_all().await?;
        contracts.truncate(limit);
        Ok(contracts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregates::fixed_clock;
    use crate::store::SqliteStore;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn aggregators() -> Vec<Arc<ContractAnalyticsAggregator>> {
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).unwrap();
        let durable = SqliteStore::open_in_memory().unwrap();
        vec![
            Arc::new(ContractAnalyticsAggregator::with_clock(
                Arc::new(PersistenceGateway::memory_only()),
                fixed_clock(now),
            )),
            Arc::new(ContractAnalyticsAggregator::with_clock(
                Arc::new(PersistenceGateway::new(Some(Arc::new(durable)))),
                fixed_clock(now),
            )),
        ]
    }

    #[tokio::test]
    async fn test_get_or_create_idempotent() {
        for agg in aggregators() {
            let mut contract = NewContract::new("0xABC");
            contract.name = Some("Token".to_string());
            let first = agg.get_or_create(contract).await.unwrap();
            assert_eq!(first.address, "0xabc");
            assert_eq!(first.total_interactions, 0);

            let second = agg.get_or_create(NewContract::new("0xabc")).await.unwrap();
            assert_eq!(second, first);
            assert_eq!(agg.get_all().await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_update_unknown_contract() {
        for agg in aggregators() {
            let result = agg
                .update("0xnope", "Transfer", Some("0x1"), &GasAmount::zero(), None)
                .await
                .unwrap();
            assert!(result.is_none());
        }
    }

    #[tokio::test]
    async fn test_same_wallet_counts_once() {
        for agg in aggregators() {
            agg.get_or_create(NewContract::new("0xabc")).await.unwrap();
            let gas = GasAmount::from(u64::MAX);
            agg.update("0xabc", "Transfer", Some("0x111"), &gas, None).await.unwrap();
            let extra = json!({"k": 1});
            let after = agg
                .update("0xABC", "Approval", Some("0x111"), &gas, extra.as_object())
                .await
                .unwrap()
                .unwrap();

            assert_eq!(after.total_interactions, 2);
            assert_eq!(after.unique_users, 1);
            assert_eq!(after.gas_used.to_string(), "36893488147419103230");
            assert_eq!(after.events.get("Transfer"), Some(&1));
            assert_eq!(after.events.get("Approval"), Some(&1));
            assert_eq!(after.metadata.unwrap()["k"], json!(1));
        }
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized() {
        for agg in aggregators() {
            agg.get_or_create(NewContract::new("0xabc")).await.unwrap();
            let mut handles = Vec::new();
            for i in 0..20 {
                let agg = agg.clone();
                handles.push(tokio::spawn(async move {
                    let wallet = format!("0x{}", i % 5);
                    agg.update("0xabc", "Transfer", Some(&wallet), &GasAmount::from(1u64), None)
                        .await
                        .unwrap();
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }
            let record = agg.get_by_address("0xabc").await.unwrap().unwrap();
            assert_eq!(record.total_interactions, 20);
            assert_eq!(record.unique_users, 5);
            assert_eq!(record.gas_used, GasAmount::from(20u64));
        }
    }

    #[tokio::test]
    async fn test_top_ordering() {
        for agg in aggregators() {
            for address in ["0xb", "0xa", "0xc"] {
                agg.get_or_create(NewContract::new(address)).await.unwrap();
            }
            for _ in 0..2 {
                agg.update("0xc", "E", None, &GasAmount::zero(), None).await.unwrap();
            }
            let top: Vec<String> = agg
                .get_top(2)
                .await
                .unwrap()
                .into_iter()
                .map(|c| c.address)
                .collect();
            assert_eq!(top, vec!["0xc", "0xa"]);
        }
    }
}
