use super::{system_clock, Clock};
use crate::gas::GasAmount;
use crate::store::{KeyedLocks, PersistenceGateway, StoreError};
use crate::types::{merge_metadata, normalize_address, AnalyticsUser, Metadata};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Window for "active" and "new" users
const ACTIVITY_WINDOW_HOURS: i64 = 24;

/// Increments applied by [`UserAnalyticsAggregator::update_stats`]
#[derive(Debug, Clone, Default)]
pub struct UserStatsUpdate {
    pub new_session: bool,
    pub new_interaction: bool,
    pub new_transaction: bool,
    pub gas_spent: Option<GasAmount>,
    pub metadata: Option<Metadata>,
}

impl UserStatsUpdate {
    pub fn session() -> Self {
        Self {
            new_session: true,
            ..Default::default()
        }
    }

    pub fn interaction() -> Self {
        Self {
            new_interaction: true,
            ..Default::default()
        }
    }
}

pub struct UserAnalyticsAggregator {
    gateway: Arc<PersistenceGateway>,
    locks: KeyedLocks,
    clock: Clock,
}

impl UserAnalyticsAggregator {
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

    pub async fn get_or_create(
        &self,
        wallet_address: &str,
        metadata: Option<Metadata>,
    ) -> Result<AnalyticsUser, StoreError> {
        let user = AnalyticsUser::new(normalize_address(wallet_address), (self.clock)(), metadata);
        self.gateway.run(|backend| backend.insert_user_if_absent(&user))
    }

    /// Apply `update` and bump `last_seen`; `None` for an unknown wallet
    pub async fn update_stats(
        &self,
        wallet_address: &str,
        update: UserStatsUpdate,
    ) -> Result<Option<AnalyticsUser>, StoreError> {
        let wallet = normalize_address(wallet_address);
        let _guard = self.locks.lock(&wallet).await;
        let now = (self.clock)();

        self.gateway.run(|backend| {
            let Some(mut user) = backend.get_user(&wallet)? else {
                return Ok(None);
            };

            user.last_seen = now;
            if update.new_session {
                user.total_sessions += 1;
            }
            if update.new_interaction {
                user.total_interactions += 1;
            }
            if update.new_transaction {
                user.total_transactions += 1;
            }
            if let Some(gas) = &update.gas_spent {
                user.total_gas_spent += gas;
            }
            if let Some(extra) = &update.metadata {
                merge_metadata(&mut user.metadata, extra);
            }

            backend.save_user(&user)?;
            Ok(Some(user))
        })
    }

    /// Union `tags` into the user's tag set (kept sorted)
    pub async fn add_tags(
        &self,
        wallet_address: &str,
        tags: &[String],
    ) -> Result<Option<AnalyticsUser>, StoreError> {
        let wallet = normalize_address(wallet_address);
        let _guard = self.locks.lock(&wallet).await;

        self.gateway.run(|backend| {
            let Some(mut user) = backend.get_user(&wallet)? else {
                return Ok(None);
            };
            user.tags.extend(tags.iter().cloned());
            user.tags.sort();
            user.tags.dedup();
            backend.save_user(&user)?;
            Ok(Some(user))
        })
    }

    pub async fn get_by_wallet(
        &self,
        wallet_address: &str,
    ) -> Result<Option<AnalyticsUser>, StoreError> {
        let wallet = normalize_address(wallet_address);
        self.gateway.run(|backend| backend.get_user(&wallet))
    }

    /// Users seen in the trailing 24 hours, most recent first
    pub async fn get_active_users(&self) -> Result<Vec<AnalyticsUser>, StoreError> {
        let since = (self.clock)() - Duration::hours(ACTIVITY_WINDOW_HOURS);
        let mut users = self.gateway.run(|backend| backend.users_last_seen_since(since))?;
        users.sort_by(|a, b| {
            b.last_seen
                .cmp(&a.last_seen)
                .then_with(|| a.wallet_address.cmp(&b.wallet_address))
        });
        Ok(users)
    }

    /// Users first seen in the trailing 24 hours, newest first
    pub async fn get_new_users(&self) -> Result<Vec<AnalyticsUser>, StoreError> {
        let now = (self.clock)();
        let since = now - Duration::hours(ACTIVITY_WINDOW_HOURS);
        // The backend end bound is exclusive; a user created this instant counts
        let until = now + Duration::milliseconds(1);
        let mut users = self
            .gateway
            .run(|backend| backend.users_first_seen_between(since, until))?;
        users.sort_by(|a, b| {
            b.first_seen
                .cmp(&a.first_seen)
                .then_with(|| a.wallet_address.cmp(&b.wallet_address))
        });
        Ok(users)
    }

    /// Users with `last_seen >= since`, in no particular order
    pub async fn get_users_seen_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AnalyticsUser>, StoreError> {
        self.gateway.run(|backend| backend.users_last_seen_since(since))
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        self.gateway.run(|backend| backend.count_users())
    }
}
