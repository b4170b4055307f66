//! Ingestion and query entry points
//!
//! `AnalyticsService` wires every component over one shared
//! [`PersistenceGateway`] and exposes the operations an HTTP layer would
//! call. Payloads deserialize from camelCase JSON.

use crate::aggregates::{
    system_clock, Clock, ContractAnalyticsAggregator, NewSession, SessionStatsUpdate,
    SessionTracker, UserAnalyticsAggregator, UserStatsUpdate,
};
use crate::chain::ChainConnection;
use crate::config::ContractConfig;
use crate::dashboard::{
    DashboardPeriod, DashboardStats, RealTimeAnalytics, RealTimeDashboardComposer,
};
use crate::error::AnalyticsError;
use crate::events::EventStore;
use crate::listener::BlockchainListenerManager;
use crate::snapshot::SnapshotEngine;
use crate::store::PersistenceGateway;
use crate::types::{
    normalize_address, AnalyticsEvent, AnalyticsSession, EventType, Metadata, UiEvent,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEventPayload {
    pub event_type: EventType,
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub element: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    /// Client-side time; server time when absent
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TrackEventPayload {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            wallet_address: None,
            session_id: None,
            url: None,
            referrer: None,
            element: None,
            action: None,
            value: None,
            metadata: None,
            timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionPayload {
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub entry_page: Option<String>,
    #[serde(default)]
    pub chain_id: Option<u64>,
}

impl From<StartSessionPayload> for NewSession {
    fn from(payload: StartSessionPayload) -> Self {
        NewSession {
            wallet_address: payload.wallet_address,
            user_agent: payload.user_agent,
            ip_address: payload.ip_address,
            referrer: payload.referrer,
            entry_page: payload.entry_page,
            chain_id: payload.chain_id,
        }
    }
}

pub struct AnalyticsService {
    gateway: Arc<PersistenceGateway>,
    events: Arc<EventStore>,
    contracts: Arc<ContractAnalyticsAggregator>,
    users: Arc<UserAnalyticsAggregator>,
    sessions: Arc<SessionTracker>,
    snapshots: Arc<SnapshotEngine>,
    dashboard: RealTimeDashboardComposer,
    clock: Clock,
}

impl AnalyticsService {
    pub fn new(gateway: Arc<PersistenceGateway>, recent_events_limit: u32) -> Self {
        Self::with_clock(gateway, recent_events_limit, system_clock())
    }

    pub fn with_clock(
        gateway: Arc<PersistenceGateway>,
        recent_events_limit: u32,
        clock: Clock,
    ) -> Self {
        let events = Arc::new(EventStore::new(gateway.clone()));
        let contracts = Arc::new(ContractAnalyticsAggregator::with_clock(
            gateway.clone(),
            clock.clone(),
        ));
        let users = Arc::new(UserAnalyticsAggregator::with_clock(gateway.clone(), clock.clone()));
        let sessions = Arc::new(SessionTracker::with_clock(gateway.clone(), clock.clone()));
        let snapshots = Arc::new(SnapshotEngine::with_clock(gateway.clone(), clock.clone()));
        let dashboard = RealTimeDashboardComposer::new(
            events.clone(),
            contracts.clone(),
            users.clone(),
            sessions.clone(),
            snapshots.clone(),
            recent_events_limit,
        )
        .with_clock(clock.clone());

        Self {
            gateway,
            events,
            contracts,
            users,
            sessions,
            snapshots,
            dashboard,
            clock,
        }
    }

    /// Listener feeding this service's stores and aggregates
    pub fn listener(
        &self,
        connections: Vec<Arc<dyn ChainConnection>>,
        configured: Vec<ContractConfig>,
        max_in_flight_handlers: usize,
    ) -> BlockchainListenerManager {
        BlockchainListenerManager::with_clock(
            connections,
            configured,
            self.events.clone(),
            self.contracts.clone(),
            self.users.clone(),
            max_in_flight_handlers,
            self.clock.clone(),
        )
    }

    /// Store a front-end event and fold it into user and session stats
    pub async fn track_ui_event(
        &self,
        payload: TrackEventPayload,
    ) -> Result<UiEvent, AnalyticsError> {
        let wallet = payload
            .wallet_address
            .as_deref()
            .map(normalize_address)
            .filter(|w| !w.is_empty());
        let is_page_view = payload.event_type == EventType::PageView;

        let event = UiEvent {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: payload.event_type,
            wallet_address: wallet.clone(),
            session_id: payload.session_id.clone(),
            url: payload.url.clone(),
            referrer: payload.referrer,
            element: payload.element,
            action: payload.action,
            value: payload.value,
            metadata: payload.metadata,
            timestamp: payload.timestamp.unwrap_or_else(|| (self.clock)()),
        };
        self.events.store(AnalyticsEvent::Ui(event.clone()))?;

        if let Some(wallet) = &wallet {
            self.users.get_or_create(wallet, None).await?;
            // A page view only refreshes last_seen
            let update = if is_page_view {
                UserStatsUpdate::default()
            } else {
                UserStatsUpdate::interaction()
            };
            self.users.update_stats(wallet, update).await?;
        }

        if let Some(session_id) = &payload.session_id {
            let update = SessionStatsUpdate {
                page_view: is_page_view,
                interaction: !is_page_view,
                current_page: payload.url,
            };
            if self.sessions.update_session_stats(session_id, update).await?.is_none() {
                log::debug!("⚠️  UI event for unknown session {}", session_id);
            }
        }

        Ok(event)
    }

    pub async fn start_session(
        &self,
        payload: StartSessionPayload,
    ) -> Result<AnalyticsSession, AnalyticsError> {
        let session = self.sessions.create_session(payload.into()).await?;
        if let Some(wallet) = &session.wallet_address {
            self.users.get_or_create(wallet, None).await?;
            self.users.update_stats(wallet, UserStatsUpdate::session()).await?;
        }
        Ok(session)
    }

    pub async fn end_session(
        &self,
        session_id: &str,
        exit_page: Option<&str>,
    ) -> Result<Option<AnalyticsSession>, AnalyticsError> {
        Ok(self.sessions.end_session(session_id, exit_page).await?)
    }

    pub async fn get_realtime_analytics(&self) -> Result<RealTimeAnalytics, AnalyticsError> {
        self.dashboard.get_realtime_analytics().await
    }

    pub async fn get_dashboard_stats(
        &self,
        period: DashboardPeriod,
    ) -> Result<DashboardStats, AnalyticsError> {
        self.dashboard.get_dashboard_stats(period).await
    }

    pub fn gateway(&self) -> &Arc<PersistenceGateway> {
        &self.gateway
    }

    pub fn events(&self) -> &Arc<EventStore> {
        &self.events
    }

    pub fn contracts(&self) -> &Arc<ContractAnalyticsAggregator> {
        &self.contracts
    }

    pub fn users(&self) -> &Arc<UserAnalyticsAggregator> {
        &self.users
    }

    pub fn sessions(&self) -> &Arc<SessionTracker> {
        &self.sessions
    }

    pub fn snapshots(&self) -> &Arc<SnapshotEngine> {
        &self.snapshots
    }
}
