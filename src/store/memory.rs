//! Process-local fallback backend
//!
//! One keyed map per entity, nothing survives a restart. Constructed
//! explicitly and shared by handle; there is no global instance.

use super::backend::{AnalyticsBackend, StoreError};
use crate::types::{
    AnalyticsEvent, AnalyticsSession, AnalyticsUser, ContractAnalytics, DailySnapshot, EventFilter,
    EventSort, EventType, Page, Pagination, SortField, SortOrder,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Events keyed by insertion sequence so iteration is insertion order
#[derive(Default)]
struct EventTable {
    next_seq: u64,
    rows: BTreeMap<u64, AnalyticsEvent>,
    by_id: HashMap<String, u64>,
}

#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<EventTable>,
    contracts: RwLock<HashMap<String, ContractAnalytics>>,
    contract_users: RwLock<HashMap<String, HashSet<String>>>,
    users: RwLock<HashMap<String, AnalyticsUser>>,
    sessions: RwLock<HashMap<String, AnalyticsSession>>,
    snapshots: RwLock<BTreeMap<NaiveDate, DailySnapshot>>,
}

fn read<'a, T>(
    lock: &'a RwLock<T>,
    table: &'static str,
) -> Result<RwLockReadGuard<'a, T>, StoreError> {
    lock.read().map_err(|_| StoreError::Poisoned(table))
}

fn write<'a, T>(
    lock: &'a RwLock<T>,
    table: &'static str,
) -> Result<RwLockWriteGuard<'a, T>, StoreError> {
    lock.write().map_err(|_| StoreError::Poisoned(table))
}

/// Stable sort; equal keys keep insertion order
fn sort_events(events: &mut [AnalyticsEvent], sort: EventSort) {
    match (sort.field, sort.order) {
        (SortField::Timestamp, SortOrder::Asc) => events.sort_by_key(|e| e.timestamp()),
        (SortField::Timestamp, SortOrder::Desc) => {
            events.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()))
        }
        (SortField::BlockNumber, SortOrder::Asc) => events.sort_by_key(|e| e.block_number()),
        (SortField::BlockNumber, SortOrder::Desc) => {
            events.sort_by(|a, b| b.block_number().cmp(&a.block_number()))
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matching_events(&self, filter: &EventFilter) -> Result<Vec<AnalyticsEvent>, StoreError> {
        let table = read(&self.events, "events")?;
        Ok(table
            .rows
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }
}

impl AnalyticsBackend for MemoryStore {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    fn insert_event(&self, event: &AnalyticsEvent) -> Result<(), StoreError> {
        let mut table = write(&self.events, "events")?;
        if table.by_id.contains_key(event.id()) {
            return Ok(());
        }
        let seq = table.next_seq;
        table.next_seq += 1;
        table.by_id.insert(event.id().to_string(), seq);
        table.rows.insert(seq, event.clone());
        Ok(())
    }

    fn query_events(
        &self,
        filter: &EventFilter,
        pagination: Pagination,
        sort: Option<EventSort>,
    ) -> Result<Page<AnalyticsEvent>, StoreError> {
        let mut matching = self.matching_events(filter)?;
        if let Some(sort) = sort {
            sort_events(&mut matching, sort);
        }
        let total = matching.len() as u64;
        let data = matching
            .into_iter()
            .skip(pagination.offset())
            .take(pagination.limit as usize)
            .collect();
        Ok(Page::new(data, total, pagination))
    }

    fn count_events(&self, filter: &EventFilter) -> Result<u64, StoreError> {
        let table = read(&self.events, "events")?;
        Ok(table.rows.values().filter(|e| filter.matches(e)).count() as u64)
    }

    fn get_event(&self, id: &str) -> Result<Option<AnalyticsEvent>, StoreError> {
        let table = read(&self.events, "events")?;
        Ok(table.by_id.get(id).and_then(|seq| table.rows.get(seq)).cloned())
    }

    fn delete_event(&self, id: &str) -> Result<bool, StoreError> {
        let mut table = write(&self.events, "events")?;
        match table.by_id.remove(id) {
            Some(seq) => Ok(table.rows.remove(&seq).is_some()),
            None => Ok(false),
        }
    }

    fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AnalyticsEvent>, StoreError> {
        let since = EventFilter {
            start: Some(start),
            ..Default::default()
        };
        let mut events = self.matching_events(&since)?;
        events.retain(|e| e.timestamp() < end);
        events.sort_by_key(|e| e.timestamp());
        Ok(events)
    }

    fn count_events_by_type(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<BTreeMap<EventType, u64>, StoreError> {
        let filter = EventFilter {
            start,
            end,
            ..Default::default()
        };
        let table = read(&self.events, "events")?;
        let mut counts = BTreeMap::new();
        for event in table.rows.values().filter(|e| filter.matches(e)) {
            *counts.entry(event.event_type()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    fn get_contract(&self, address: &str) -> Result<Option<ContractAnalytics>, StoreError> {
        Ok(read(&self.contracts, "contracts")?.get(address).cloned())
    }

    fn insert_contract_if_absent(
        &self,
        record: &ContractAnalytics,
    ) -> Result<ContractAnalytics, StoreError> {
        let mut contracts = write(&self.contracts, "contracts")?;
        Ok(contracts
            .entry(record.address.clone())
            .or_insert_with(|| record.clone())
            .clone())
    }

    fn save_contract(&self, record: &ContractAnalytics) -> Result<(), StoreError> {
        write(&self.contracts, "contracts")?.insert(record.address.clone(), record.clone());
        Ok(())
    }

    fn list_contracts(&self) -> Result<Vec<ContractAnalytics>, StoreError> {
        Ok(read(&self.contracts, "contracts")?.values().cloned().collect())
    }

    fn add_contract_user(
        &self,
        address: &str,
        wallet: &str,
        _seen_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut junction = write(&self.contract_users, "contract_users")?;
        Ok(junction
            .entry(address.to_string())
            .or_default()
            .insert(wallet.to_string()))
    }

    fn count_contract_users(&self, address: &str) -> Result<u64, StoreError> {
        let junction = read(&self.contract_users, "contract_users")?;
        Ok(junction.get(address).map(|w| w.len() as u64).unwrap_or(0))
    }

    fn get_user(&self, wallet: &str) -> Result<Option<AnalyticsUser>, StoreError> {
        Ok(read(&self.users, "users")?.get(wallet).cloned())
    }

    fn insert_user_if_absent(&self, user: &AnalyticsUser) -> Result<AnalyticsUser, StoreError> {
        let mut users = write(&self.users, "users")?;
        Ok(users
            .entry(user.wallet_address.clone())
            .or_insert_with(|| user.clone())
            .clone())
    }

    fn save_user(&self, user: &AnalyticsUser) -> Result<(), StoreError> {
        write(&self.users, "users")?.insert(user.wallet_address.clone(), user.clone());
        Ok(())
    }

    fn users_last_seen_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AnalyticsUser>, StoreError> {
        Ok(read(&self.users, "users")?
            .values()
            .filter(|u| u.last_seen >= since)
            .cloned()
            .collect())
    }

    fn users_first_seen_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AnalyticsUser>, StoreError> {
        Ok(read(&self.users, "users")?
            .values()
            .filter(|u| u.first_seen >= start && u.first_seen < end)
            .cloned()
            .collect())
    }

    fn count_users(&self) -> Result<u64, StoreError> {
        Ok(read(&self.users, "users")?.len() as u64)
    }

    fn insert_session(&self, session: &AnalyticsSession) -> Result<(), StoreError> {
        write(&self.sessions, "sessions")?
            .entry(session.id.clone())
            .or_insert_with(|| session.clone());
        Ok(())
    }

    fn get_session(&self, id: &str) -> Result<Option<AnalyticsSession>, StoreError> {
        Ok(read(&self.sessions, "sessions")?.get(id).cloned())
    }

    fn save_session(&self, session: &AnalyticsSession) -> Result<(), StoreError> {
        write(&self.sessions, "sessions")?.insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn active_sessions(&self) -> Result<Vec<AnalyticsSession>, StoreError> {
        let mut active: Vec<AnalyticsSession> = read(&self.sessions, "sessions")?
            .values()
            .filter(|s| s.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(active)
    }

    fn sessions_by_wallet(&self, wallet: &str) -> Result<Vec<AnalyticsSession>, StoreError> {
        let mut sessions: Vec<AnalyticsSession> = read(&self.sessions, "sessions")?
            .values()
            .filter(|s| s.wallet_address.as_deref() == Some(wallet))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(sessions)
    }

    fn sessions_started_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AnalyticsSession>, StoreError> {
        let mut sessions: Vec<AnalyticsSession> = read(&self.sessions, "sessions")?
            .values()
            .filter(|s| s.start_time >= start && s.start_time < end)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(sessions)
    }

    fn upsert_snapshot(&self, snapshot: &DailySnapshot) -> Result<(), StoreError> {
        write(&self.snapshots, "snapshots")?.insert(snapshot.date, snapshot.clone());
        Ok(())
    }

    fn get_snapshot(&self, date: NaiveDate) -> Result<Option<DailySnapshot>, StoreError> {
        Ok(read(&self.snapshots, "snapshots")?.get(&date).cloned())
    }

    fn snapshots_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailySnapshot>, StoreError> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(read(&self.snapshots, "snapshots")?
            .range(start..=end)
            .map(|(_, s)| s.clone())
            .collect())
    }
}
