//! Read-time dashboard views
//!
//! Nothing here is persisted; every call recomputes from the aggregators.

use crate::aggregates::{
    system_clock, Clock, ContractAnalyticsAggregator, SessionTracker, UserAnalyticsAggregator,
};
use crate::error::AnalyticsError;
use crate::events::EventStore;
use crate::gas::GasAmount;
use crate::snapshot::{SnapshotEngine, TOP_LIST_LEN};
use crate::types::{
    AnalyticsEvent, AnalyticsSession, ContractAnalytics, DailySnapshot, EventFilter, EventType,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageActivity {
    pub url: String,
    pub users: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealTimeAnalytics {
    pub active_users: u64,
    pub active_sessions: u64,
    pub transactions_in_last_hour: u64,
    pub events_in_last_hour: u64,
    pub top_current_pages: Vec<PageActivity>,
    pub recent_events: Vec<AnalyticsEvent>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DashboardPeriod {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

impl DashboardPeriod {
    pub fn days(&self) -> i64 {
        match self {
            DashboardPeriod::Day => 1,
            DashboardPeriod::Week => 7,
            DashboardPeriod::Month => 30,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DashboardPeriod::Day => "24h",
            DashboardPeriod::Week => "7d",
            DashboardPeriod::Month => "30d",
        }
    }
}

impl fmt::Display for DashboardPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DashboardPeriod {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "24h" => Ok(DashboardPeriod::Day),
            "7d" => Ok(DashboardPeriod::Week),
            "30d" => Ok(DashboardPeriod::Month),
            other => Err(AnalyticsError::Validation(format!(
                "unknown period {:?} (expected 24h, 7d or 30d)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardTotals {
    pub new_users: u64,
    pub sessions: u64,
    pub transactions: u64,
    pub gas_used: GasAmount,
    /// Session-weighted mean over the snapshots, milliseconds
    pub average_session_duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub period: DashboardPeriod,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub snapshots: Vec<DailySnapshot>,
    pub totals: DashboardTotals,
    pub active_users: u64,
    pub top_contracts: Vec<ContractAnalytics>,
    pub event_counts: BTreeMap<EventType, u64>,
}

/// Group active sessions by the page they are on
///
/// A session counts toward its exit page, or its entry page if it has not
/// navigated. Ordered by users desc then url asc.
pub fn top_pages(sessions: &[AnalyticsSession], limit: usize) -> Vec<PageActivity> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for page in sessions.iter().filter_map(|s| s.current_page()) {
        *counts.entry(page).or_insert(0) += 1;
    }
    let mut pages: Vec<PageActivity> = counts
        .into_iter()
        .map(|(url, users)| PageActivity {
            url: url.to_string(),
            users,
        })
        .collect();
    pages.sort_by(|a, b| b.users.cmp(&a.users).then_with(|| a.url.cmp(&b.url)));
    pages.truncate(limit);
    pages
}

/// Sum snapshot totals; the average duration is weighted by session count
pub fn summarize_snapshots(snapshots: &[DailySnapshot]) -> DashboardTotals {
    let sessions: u64 = snapshots.iter().map(|s| s.total_sessions).sum();
    let weighted: f64 = snapshots
        .iter()
        .map(|s| s.average_session_duration * s.total_sessions as f64)
        .sum();
    DashboardTotals {
        new_users: snapshots.iter().map(|s| s.new_users).sum(),
        sessions,
        transactions: snapshots.iter().map(|s| s.total_transactions).sum(),
        gas_used: snapshots.iter().map(|s| &s.total_gas_used).sum(),
        average_session_duration: if sessions == 0 {
            0.0
        } else {
            weighted / sessions as f64
        },
    }
}

pub struct RealTimeDashboardComposer {
    events: Arc<EventStore>,
    contracts: Arc<ContractAnalyticsAggregator>,
    users: Arc<UserAnalyticsAggregator>,
    sessions: Arc<SessionTracker>,
    snapshots: Arc<SnapshotEngine>,
    recent_events_limit: u32,
    clock: Clock,
}

impl RealTimeDashboardComposer {
    pub fn new(
        events: Arc<EventStore>,
        contracts: Arc<ContractAnalyticsAggregator>,
        users: Arc<UserAnalyticsAggregator>,
        sessions: Arc<SessionTracker>,
        snapshots: Arc<SnapshotEngine>,
        recent_events_limit: u32,
    ) -> Self {
        Self {
            events,
            contracts,
            users,
            sessions,
            snapshots,
            recent_events_limit,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// "Right now" view over the trailing hour
    pub async fn get_realtime_analytics(&self) -> Result<RealTimeAnalytics, AnalyticsError> {
        let now = (self.clock)();
        let hour_ago = now - Duration::hours(1);

        let active_users = self.users.get_active_users().await?.len() as u64;
        let active_sessions = self.sessions.get_active_sessions().await?;

        let last_hour = EventFilter {
            start: Some(hour_ago),
            end: Some(now),
            ..Default::default()
        };
        let events_in_last_hour = self.events.count(&last_hour)?;
        let transactions_in_last_hour = self.events.count(&EventFilter {
            event_type: Some(EventType::ContractInteraction),
            ..last_hour.clone()
        })?;

        let mut recent_events = self.events.recent(hour_ago, self.recent_events_limit)?;
        recent_events.retain(|e| e.timestamp() <= now);

        Ok(RealTimeAnalytics {
            active_users,
            active_sessions: active_sessions.len() as u64,
            transactions_in_last_hour,
            events_in_last_hour,
            top_current_pages: top_pages(&active_sessions, TOP_LIST_LEN),
            recent_events,
            generated_at: now,
        })
    }

    /// Snapshot series and totals for the trailing period
    pub async fn get_dashboard_stats(
        &self,
        period: DashboardPeriod,
    ) -> Result<DashboardStats, AnalyticsError> {
        let now = (self.clock)();
        let end_date = now.date_naive();
        let start_date = end_date - Duration::days(period.days() - 1);
        let since = now - Duration::days(period.days());

        let snapshots = self.snapshots.get_daily_snapshots(start_date, end_date).await?;
        let totals = summarize_snapshots(&snapshots);
        let active_users = self.users.get_users_seen_since(since).await?.len() as u64;
        let top_contracts = self.contracts.get_top(TOP_LIST_LEN).await?;
        let event_counts = self.events.count_by_type(Some(since), None)?;

        Ok(DashboardStats {
            period,
            start_date,
            end_date,
            snapshots,
            totals,
            active_users,
            top_contracts,
            event_counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregates::{fixed_clock, NewSession, SessionStatsUpdate};
    use crate::store::PersistenceGateway;
    use crate::types::{NewContract, UiEvent};
    use chrono::TimeZone;

    fn session_on(page: &str) -> AnalyticsSession {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        AnalyticsSession {
            id: page.to_string(),
            wallet_address: None,
            user_agent: None,
            ip_address: None,
            referrer: None,
            start_time: now,
            end_time: None,
            duration: None,
            last_activity: now,
            is_active: true,
            entry_page: Some("/landing".to_string()),
            exit_page: Some(page.to_string()),
            page_views: 1,
            interactions: 0,
            chain_id: None,
        }
    }

    #[test]
    fn test_top_pages_grouping() {
        let sessions = vec![session_on("/home"), session_on("/home"), session_on("/profile")];
        assert_eq!(
            top_pages(&sessions, 10),
            vec![
                PageActivity { url: "/home".to_string(), users: 2 },
                PageActivity { url: "/profile".to_string(), users: 1 },
            ]
        );

        let mut entry_only = session_on("/x");
        entry_only.exit_page = None;
        assert_eq!(top_pages(&[entry_only], 10)[0].url, "/landing");
    }

    #[test]
    fn test_period_parsing() {
        assert_eq!("7d".parse::<DashboardPeriod>().unwrap(), DashboardPeriod::Week);
        assert!(matches!(
            "1y".parse::<DashboardPeriod>(),
            Err(AnalyticsError::Validation(_))
        ));
        assert_eq!(serde_json::to_string(&DashboardPeriod::Day).unwrap(), "\"24h\"");
    }

    #[test]
    fn test_summarize_weights_by_sessions() {
        let day = |d: u32, sessions: u64, avg: f64| DailySnapshot {
            date: NaiveDate::from_ymd_opt(2024, 1, d).unwrap(),
            new_users: 1,
            active_users: 1,
            total_sessions: sessions,
            average_session_duration: avg,
            total_transactions: 2,
            total_gas_used: GasAmount::from(u64::MAX),
            top_contracts: vec![],
            top_events: vec![],
        };
        let totals = summarize_snapshots(&[day(1, 1, 1000.0), day(2, 3, 2000.0)]);
        assert_eq!(totals.sessions, 4);
        assert_eq!(totals.new_users, 2);
        assert_eq!(totals.average_session_duration, 1750.0);
        assert_eq!(totals.gas_used.to_string(), "36893488147419103230");
        assert_eq!(summarize_snapshots(&[]).average_session_duration, 0.0);
    }

    #[tokio::test]
    async fn test_realtime_composition() {
        let now = Utc.with_ymd_and_hms(2024, 5, 5, 12, 0, 0).unwrap();
        let clock = fixed_clock(now);
        let gateway = Arc::new(PersistenceGateway::memory_only());

        let events = Arc::new(EventStore::new(gateway.clone()));
        let contracts = Arc::new(ContractAnalyticsAggregator::with_clock(
            gateway.clone(),
            clock.clone(),
        ));
        let users = Arc::new(UserAnalyticsAggregator::with_clock(gateway.clone(), clock.clone()));
        let sessions = Arc::new(SessionTracker::with_clock(gateway.clone(), clock.clone()));
        let snapshots = Arc::new(SnapshotEngine::with_clock(gateway.clone(), clock.clone()));

        users.get_or_create("0x1", None).await.unwrap();
        contracts.get_or_create(NewContract::new("0xabc")).await.unwrap();
        for (i, page) in ["/home", "/home", "/profile"].iter().enumerate() {
            let session = sessions
                .create_session(NewSession {
                    entry_page: Some(format!("/entry{}", i)),
                    ..Default::default()
                })
                .await
                .unwrap();
            sessions
                .update_session_stats(
                    &session.id,
                    SessionStatsUpdate {
                        current_page: Some(page.to_string()),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
        for (id, minutes_ago) in [("old", 90), ("a", 30), ("b", 5)] {
            events
                .store(AnalyticsEvent::Ui(UiEvent {
                    id: id.to_string(),
                    event_type: EventType::PageView,
                    wallet_address: None,
                    session_id: None,
                    url: None,
                    referrer: None,
                    element: None,
                    action: None,
                    value: None,
                    metadata: None,
                    timestamp: now - Duration::minutes(minutes_ago),
                }))
                .unwrap();
        }

        let composer = RealTimeDashboardComposer::new(
            events, contracts, users, sessions, snapshots, 20,
        )
        .with_clock(clock);
        let realtime = composer.get_realtime_analytics().await.unwrap();

        assert_eq!(realtime.active_users, 1);
        assert_eq!(realtime.active_sessions, 3);
        assert_eq!(realtime.events_in_last_hour, 2);
        assert_eq!(realtime.transactions_in_last_hour, 0);
        assert_eq!(
            realtime.top_current_pages[0],
            PageActivity {
                url: "/home".to_string(),
                users: 2
            }
        );
        let ids: Vec<&str> = realtime.recent_events.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let stats = composer.get_dashboard_stats(DashboardPeriod::Week).await.unwrap();
        assert_eq!(stats.start_date, NaiveDate::from_ymd_opt(2024, 4, 29).unwrap());
        assert_eq!(stats.top_contracts.len(), 1);
        assert_eq!(stats.event_counts.get(&EventType::PageView), Some(&3));
    }
}
