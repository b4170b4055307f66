//! Append-only store for contract and UI events

use crate::store::{PersistenceGateway, StoreError};
use crate::types::{
    normalize_address, AnalyticsEvent, EventFilter, EventSort, EventType, Page, Pagination,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct EventStore {
    gateway: Arc<PersistenceGateway>,
}

impl EventStore {
    pub fn new(gateway: Arc<PersistenceGateway>) -> Self {
        Self { gateway }
    }

    /// Persist an event and return its id
    ///
    /// An empty id is replaced with a fresh UUID. Addresses are lowercased.
    /// If the id already exists the stored event is left untouched.
    pub fn store(&self, mut event: AnalyticsEvent) -> Result<String, StoreError> {
        if event.id().is_empty() {
            event.set_id(uuid::Uuid::new_v4().to_string());
        }
        normalize_event(&mut event);

        self.gateway.run(|backend| backend.insert_event(&event))?;
        log::debug!("📝 Stored {} event {}", event.event_type(), event.id());
        Ok(event.id().to_string())
    }

    /// Filtered page of events; insertion order unless `sort` is given
    pub fn query(
        &self,
        filter: &EventFilter,
        pagination: Pagination,
        sort: Option<EventSort>,
    ) -> Result<Page<AnalyticsEvent>, StoreError> {
        let filter = filter.normalized();
        let pagination = Pagination::new(pagination.page, pagination.limit);
        self.gateway
            .run(|backend| backend.query_events(&filter, pagination, sort))
    }

    pub fn count(&self, filter: &EventFilter) -> Result<u64, StoreError> {
        let filter = filter.normalized();
        self.gateway.run(|backend| backend.count_events(&filter))
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<AnalyticsEvent>, StoreError> {
        self.gateway.run(|backend| backend.get_event(id))
    }

    pub fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        self.gateway.run(|backend| backend.delete_event(id))
    }

    pub fn count_by_type(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<BTreeMap<EventType, u64>, StoreError> {
        self.gateway
            .run(|backend| backend.count_events_by_type(start, end))
    }

    /// Events at or after `since`, newest first
    pub fn recent(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<AnalyticsEvent>, StoreError> {
        let filter = EventFilter {
            start: Some(since),
            ..Default::default()
        };
        let page = self.query(&filter, Pagination::new(1, limit), Some(EventSort::newest_first()))?;
        Ok(page.data)
    }

    /// Every event inside `[start, end)`, oldest first
    pub fn between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AnalyticsEvent>, StoreError> {
        self.gateway.run(|backend| backend.events_between(start, end))
    }
}

fn normalize_event(event: &mut AnalyticsEvent) {
    match event {
        AnalyticsEvent::Contract(e) => {
            e.contract_address = normalize_address(&e.contract_address);
            e.wallet_address = e.wallet_address.as_deref().map(normalize_address);
        }
        AnalyticsEvent::Ui(e) => {
            e.wallet_address = e.wallet_address.as_deref().map(normalize_address);
        }
    }
}
