use super::{system_clock, Clock};
use crate::store::{KeyedLocks, PersistenceGateway, StoreError};
use crate::types::{normalize_address, AnalyticsSession};
use chrono::Duration;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub wallet_address: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub referrer: Option<String>,
    pub entry_page: Option<String>,
    pub chain_id: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionStatsUpdate {
    pub page_view: bool,
    pub interaction: bool,
    pub current_page: Option<String>,
}

pub struct SessionTracker {
    gateway: Arc<PersistenceGateway>,
    locks: KeyedLocks,
    clock: Clock,
}

impl SessionTracker {
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

    /// Open a session; it starts with one page view
    pub async fn create_session(&self, new: NewSession) -> Result<AnalyticsSession, StoreError> {
        let now = (self.clock)();
        let session = AnalyticsSession {
            id: uuid::Uuid::new_v4().to_string(),
            wallet_address: new
                .wallet_address
                .as_deref()
                .map(normalize_address)
                .filter(|w| !w.is_empty()),
            user_agent: new.user_agent,
            ip_address: new.ip_address,
            referrer: new.referrer,
            start_time: now,
            end_time: None,
            duration: None,
            last_activity: now,
            is_active: true,
            entry_page: new.entry_page,
            exit_page: None,
            page_views: 1,
            interactions: 0,
            chain_id: new.chain_id,
        };

        self.gateway.run(|backend| backend.insert_session(&session))?;
        log::debug!("🟢 Session started: {}", session.id);
        Ok(session)
    }

    /// Close a session; ending an already closed session changes nothing
    pub async fn end_session(
        &self,
        id: &str,
        exit_page: Option<&str>,
    ) -> Result<Option<AnalyticsSession>, StoreError> {
        let _guard = self.locks.lock(id).await;
        let now = (self.clock)();

        self.gateway.run(|backend| {
            let Some(mut session) = backend.get_session(id)? else {
                return Ok(None);
            };
            if !session.is_active {
                return Ok(Some(session));
            }

            session.end_time = Some(now);
            session.duration = Some((now - session.start_time).num_milliseconds());
            session.is_active = false;
            session.last_activity = now;
            if let Some(page) = exit_page {
                session.exit_page = Some(page.to_string());
            }

            backend.save_session(&session)?;
            Ok(Some(session))
        })
    }

    /// Count activity on an open session; closed sessions are returned as-is
    pub async fn update_session_stats(
        &self,
        id: &str,
        update: SessionStatsUpdate,
    ) -> Result<Option<AnalyticsSession>, StoreError> {
        let _guard = self.locks.lock(id).await;
        let now = (self.clock)();

        self.gateway.run(|backend| {
            let Some(mut session) = backend.get_session(id)? else {
                return Ok(None);
            };
            if !session.is_active {
                return Ok(Some(session));
            }

            if update.page_view {
                session.page_views += 1;
            }
            if update.interaction {
                session.interactions += 1;
            }
            if let Some(page) = &update.current_page {
                session.exit_page = Some(page.clone());
            }
            session.last_activity = now;

            backend.save_session(&session)?;
            Ok(Some(session))
        })
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<AnalyticsSession>, StoreError> {
        self.gateway.run(|backend| backend.get_session(id))
    }

    pub async fn get_active_sessions(&self) -> Result<Vec<AnalyticsSession>, StoreError> {
        self.gateway.run(|backend| backend.active_sessions())
    }

    /// Sessions for one wallet, newest first
    pub async fn get_sessions_by_wallet(
        &self,
        wallet_address: &str,
    ) -> Result<Vec<AnalyticsSession>, StoreError> {
        let wallet = normalize_address(wallet_address);
        self.gateway.run(|backend| backend.sessions_by_wallet(&wallet))
    }

    /// End active sessions idle for longer than `idle_timeout`
    ///
    /// The session is closed at its last activity, not at the sweep time.
    /// Returns the ids that were expired.
    pub async fn expire_idle_sessions(
        &self,
        idle_timeout: Duration,
    ) -> Result<Vec<String>, StoreError> {
        let cutoff = (self.clock)() - idle_timeout;
        let candidates: Vec<String> = self
            .get_active_sessions()
            .await?
            .into_iter()
            .filter(|s| s.last_activity < cutoff)
            .map(|s| s.id)
            .collect();

        let mut expired = Vec::new();
        for id in candidates {
            let _guard = self.locks.lock(&id).await;
            let closed = self.gateway.run(|backend| {
                let Some(mut session) = backend.get_session(&id)? else {
                    return Ok(false);
                };
                // Activity may have landed since the scan
                if !session.is_active || session.last_activity >= cutoff {
                    return Ok(false);
                }
                session.end_time = Some(session.last_activity);
                session.duration =
                    Some((session.last_activity - session.start_time).num_milliseconds());
                session.is_active = false;
                backend.save_session(&session)?;
                Ok(true)
            })?;
            if closed {
                expired.push(id);
            }
        }

        if !expired.is_empty() {
            log::info!("⏱️  Expired {} idle sessions", expired.len());
        }
        Ok(expired)
    }
}
