use crate::types::{
    AnalyticsEvent, AnalyticsSession, AnalyticsUser, ContractAnalytics, DailySnapshot, EventFilter,
    EventSort, EventType, Page, Pagination,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;

#[derive(Debug)]
pub enum StoreError {
    /// Durable backend not configured or not reachable
    Unavailable(String),
    Database(String),
    Serialization(String),
    /// A lock guarding in-memory state was poisoned by a panicking writer
    Poisoned(&'static str),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(e) => write!(f, "Store unavailable: {}", e),
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
            StoreError::Poisoned(table) => write!(f, "Lock poisoned: {}", table),
        }
    }
}

impl std::error::Error for StoreError {}

/// Keyed storage for every analytics entity
///
/// Implemented by the durable SQLite store and the in-memory fallback. All
/// aggregate logic lives above this trait and is written once against it;
/// implementations only persist and fetch rows.
///
/// Addresses passed in are already normalized by the caller.
pub trait AnalyticsBackend: Send + Sync {
    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;

    // Events

    /// Append an event; an id that already exists is ignored
    fn insert_event(&self, event: &AnalyticsEvent) -> Result<(), StoreError>;

    fn query_events(
        &self,
        filter: &EventFilter,
        pagination: Pagination,
        sort: Option<EventSort>,
    ) -> Result<Page<AnalyticsEvent>, StoreError>;

    fn count_events(&self, filter: &EventFilter) -> Result<u64, StoreError>;

    fn get_event(&self, id: &str) -> Result<Option<AnalyticsEvent>, StoreError>;

    /// Returns true if a row was removed
    fn delete_event(&self, id: &str) -> Result<bool, StoreError>;

    /// Every event with `start <= timestamp < end`, oldest first
    fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AnalyticsEvent>, StoreError>;

    fn count_events_by_type(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<BTreeMap<EventType, u64>, StoreError>;

    // Contracts

    fn get_contract(&self, address: &str) -> Result<Option<ContractAnalytics>, StoreError>;

    /// Insert unless a row with the same address exists; returns the stored row
    fn insert_contract_if_absent(
        &self,
        record: &ContractAnalytics,
    ) -> Result<ContractAnalytics, StoreError>;

    fn save_contract(&self, record: &ContractAnalytics) -> Result<(), StoreError>;

    fn list_contracts(&self) -> Result<Vec<ContractAnalytics>, StoreError>;

    /// Record that `wallet` touched `address`; true only the first time
    fn add_contract_user(
        &self,
        address: &str,
        wallet: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    fn count_contract_users(&self, address: &str) -> Result<u64, StoreError>;

    // Users

    fn get_user(&self, wallet: &str) -> Result<Option<AnalyticsUser>, StoreError>;

    fn insert_user_if_absent(&self, user: &AnalyticsUser) -> Result<AnalyticsUser, StoreError>;

    fn save_user(&self, user: &AnalyticsUser) -> Result<(), StoreError>;

    fn users_last_seen_since(&self, since: DateTime<Utc>) -> Result<Vec<AnalyticsUser>, StoreError>;

    /// Users with `start <= first_seen < end`
    fn users_first_seen_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AnalyticsUser>, StoreError>;

    fn count_users(&self) -> Result<u64, StoreError>;

    // Sessions

    fn insert_session(&self, session: &AnalyticsSession) -> Result<(), StoreError>;

    fn get_session(&self, id: &str) -> Result<Option<AnalyticsSession>, StoreError>;

    fn save_session(&self, session: &AnalyticsSession) -> Result<(), StoreError>;

    fn active_sessions(&self) -> Result<Vec<AnalyticsSession>, StoreError>;

    /// Sessions for a wallet, newest start first
    fn sessions_by_wallet(&self, wallet: &str) -> Result<Vec<AnalyticsSession>, StoreError>;

    /// Sessions with `start <= start_time < end`
    fn sessions_started_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AnalyticsSession>, StoreError>;

    // Snapshots

    /// Insert or fully overwrite the snapshot for `snapshot.date`
    fn upsert_snapshot(&self, snapshot: &DailySnapshot) -> Result<(), StoreError>;

    fn get_snapshot(&self, date: NaiveDate) -> Result<Option<DailySnapshot>, StoreError>;

    /// Snapshots with `start <= date <= end`, ascending
    fn snapshots_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailySnapshot>, StoreError>;
}
