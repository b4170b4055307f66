//! Daily snapshots
//!
//! A snapshot summarizes one UTC calendar day, the half-open range from its
//! midnight to the next midnight.
//! Backends only return the raw in-window rows; the reduction happens in
//! [`compile_snapshot`], so both backends produce identical output for the
//! same data and recompiling a day yields a byte-identical record.

use crate::aggregates::{system_clock, Clock, SessionTracker};
use crate::gas::GasAmount;
use crate::store::{PersistenceGateway, StoreError};
use crate::types::{
    AnalyticsEvent, AnalyticsSession, ContractCount, DailySnapshot, EventCount, EventType,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::interval;

/// Entries kept in `top_contracts` and `top_events`
pub const TOP_LIST_LEN: usize = 10;

/// UTC bounds of `date` as `[midnight, next midnight)`
pub fn day_window(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

/// Reduce one day's rows to a snapshot
///
/// `events` and `sessions` must already be restricted to the day window.
pub fn compile_snapshot(
    date: NaiveDate,
    events: &[AnalyticsEvent],
    sessions: &[AnalyticsSession],
    new_users: u64,
) -> DailySnapshot {
    let active_users = events
        .iter()
        .filter_map(|e| e.wallet_address())
        .collect::<HashSet<_>>()
        .len() as u64;

    let durations: Vec<i64> = sessions.iter().filter_map(|s| s.duration).collect();
    let average_session_duration = if durations.is_empty() {
        0.0
    } else {
        durations.iter().map(|d| *d as f64).sum::<f64>() / durations.len() as f64
    };

    let total_transactions = events
        .iter()
        .filter(|e| e.event_type() == EventType::ContractInteraction)
        .count() as u64;

    let total_gas_used: GasAmount = events.iter().filter_map(|e| e.gas_used()).sum();

    let mut contract_counts: HashMap<&str, u64> = HashMap::new();
    let mut type_counts: HashMap<EventType, u64> = HashMap::new();
    for event in events {
        if let Some(address) = event.contract_address() {
            *contract_counts.entry(address).or_insert(0) += 1;
        }
        *type_counts.entry(event.event_type()).or_insert(0) += 1;
    }

    let mut top_contracts: Vec<ContractCount> = contract_counts
        .into_iter()
        .map(|(address, interactions)| ContractCount {
            address: address.to_string(),
            interactions,
        })
        .collect();
    top_contracts.sort_by(|a, b| {
        b.interactions
            .cmp(&a.interactions)
            .then_with(|| a.address.cmp(&b.address))
    });
    top_contracts.truncate(TOP_LIST_LEN);

    let mut top_events: Vec<EventCount> = type_counts
        .into_iter()
        .map(|(event_type, count)| EventCount { event_type, count })
        .collect();
    top_events.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.event_type.as_str().cmp(b.event_type.as_str()))
    });
    top_events.truncate(TOP_LIST_LEN);

    DailySnapshot {
        date,
        new_users,
        active_users,
        total_sessions: sessions.len() as u64,
        average_session_duration,
        total_transactions,
        total_gas_used,
        top_contracts,
        top_events,
    }
}

pub struct SnapshotEngine {
    gateway: Arc<PersistenceGateway>,
    clock: Clock,
}

impl SnapshotEngine {
    pub fn new(gateway: Arc<PersistenceGateway>) -> Self {
        Self::with_clock(gateway, system_clock())
    }

    pub fn with_clock(gateway: Arc<PersistenceGateway>, clock: Clock) -> Self {
        Self { gateway, clock }
    }

    pub fn today(&self) -> NaiveDate {
        (self.clock)().date_naive()
    }

    /// Compile `date` from raw rows and overwrite any stored snapshot
    pub async fn create_daily_snapshot(
        &self,
        date: NaiveDate,
    ) -> Result<DailySnapshot, StoreError> {
        let (start, end) = day_window(date);
        let snapshot = self.gateway.run(|backend| {
            let events = backend.events_between(start, end)?;
            let sessions = backend.sessions_started_between(start, end)?;
            let new_users = backend.users_first_seen_between(start, end)?.len() as u64;
            let snapshot = compile_snapshot(date, &events, &sessions, new_users);
            backend.upsert_snapshot(&snapshot)?;
            Ok(snapshot)
        })?;

        log::debug!(
            "📸 Snapshot {}: {} active users, {} sessions, {} txs",
            date,
            snapshot.active_users,
            snapshot.total_sessions,
            snapshot.total_transactions
        );
        Ok(snapshot)
    }

    pub async fn get_daily_snapshot(
        &self,
        date: NaiveDate,
    ) -> Result<Option<DailySnapshot>, StoreError> {
        self.gateway.run(|backend| backend.get_snapshot(date))
    }

    /// Stored snapshots in `[start, end]`, ascending by date
    pub async fn get_daily_snapshots(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailySnapshot>, StoreError> {
        self.gateway.run(|backend| backend.snapshots_between(start, end))
    }
}

/// Snapshot scheduler task - periodically recompile recent days
///
/// Every tick recompiles yesterday (to pick up late events) and today, then
/// expires idle sessions. Runs until cancelled.
pub async fn snapshot_scheduler_task(
    engine: Arc<SnapshotEngine>,
    sessions: Arc<SessionTracker>,
    interval_ms: u64,
    idle_timeout: Duration,
) {
    log::info!("⏰ Starting snapshot scheduler (interval: {}ms)", interval_ms);

    let mut timer = interval(std::time::Duration::from_millis(interval_ms.max(1)));

    loop {
        timer.tick().await;

        if let Err(e) = sessions.expire_idle_sessions(idle_timeout).await {
            log::error!("❌ Idle session sweep failed: {}", e);
        }

        let today = engine.today();
        let days = [today.pred_opt(), Some(today)];
        for date in days.into_iter().flatten() {
            match engine.create_daily_snapshot(date).await {
                Ok(snapshot) => log::debug!(
                    "✅ Snapshot scheduler compiled {} ({} event types)",
                    date,
                    snapshot.top_events.len()
                ),
                Err(e) => log::error!("❌ Snapshot for {} failed: {}", date, e),
            }
        }
    }
}
