//! Core entities for the analytics pipeline
//!
//! Every entity serializes with camelCase field names so the same JSON can be
//! handed straight to the HTTP layer sitting in front of this crate.

use crate::gas::GasAmount;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Free-form metadata object attached to users, contracts and UI events
pub type Metadata = serde_json::Map<String, Value>;

/// Normalize a contract or wallet address for use as a key
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Shallow-merge `extra` into `target`, keys in `extra` win
pub fn merge_metadata(target: &mut Option<Metadata>, extra: &Metadata) {
    let map = target.get_or_insert_with(Metadata::new);
    for (key, value) in extra {
        map.insert(key.clone(), value.clone());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    PageView,
    ContractInteraction,
    WalletConnect,
    WalletDisconnect,
    ButtonClick,
    FormSubmit,
    TransactionSubmitted,
    TransactionConfirmed,
    TransactionFailed,
    Error,
    Custom,
}

impl EventType {
    pub const ALL: [EventType; 11] = [
        EventType::PageView,
        EventType::ContractInteraction,
        EventType::WalletConnect,
        EventType::WalletDisconnect,
        EventType::ButtonClick,
        EventType::FormSubmit,
        EventType::TransactionSubmitted,
        EventType::TransactionConfirmed,
        EventType::TransactionFailed,
        EventType::Error,
        EventType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PageView => "PAGE_VIEW",
            EventType::ContractInteraction => "CONTRACT_INTERACTION",
            EventType::WalletConnect => "WALLET_CONNECT",
            EventType::WalletDisconnect => "WALLET_DISCONNECT",
            EventType::ButtonClick => "BUTTON_CLICK",
            EventType::FormSubmit => "FORM_SUBMIT",
            EventType::TransactionSubmitted => "TRANSACTION_SUBMITTED",
            EventType::TransactionConfirmed => "TRANSACTION_CONFIRMED",
            EventType::TransactionFailed => "TRANSACTION_FAILED",
            EventType::Error => "ERROR",
            EventType::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown event type: {}", s))
    }
}

/// Decoded log emitted by a tracked contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractEvent {
    pub id: String,
    pub contract_address: String,
    pub event_name: String,
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u64,
    pub wallet_address: Option<String>,
    pub chain_id: u64,
    pub gas_used: Option<GasAmount>,
    pub gas_price: Option<GasAmount>,
    pub event_args: Value,
    pub timestamp: DateTime<Utc>,
}

/// Off-chain action reported by the dApp front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiEvent {
    pub id: String,
    pub event_type: EventType,
    pub wallet_address: Option<String>,
    pub session_id: Option<String>,
    pub url: Option<String>,
    pub referrer: Option<String>,
    pub element: Option<String>,
    pub action: Option<String>,
    pub value: Option<String>,
    pub metadata: Option<Metadata>,
    pub timestamp: DateTime<Utc>,
}

/// Anything the EventStore holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalyticsEvent {
    Contract(ContractEvent),
    Ui(UiEvent),
}

impl AnalyticsEvent {
    pub fn id(&self) -> &str {
        match self {
            AnalyticsEvent::Contract(e) => &e.id,
            AnalyticsEvent::Ui(e) => &e.id,
        }
    }

    pub fn set_id(&mut self, id: String) {
        match self {
            AnalyticsEvent::Contract(e) => e.id = id,
            AnalyticsEvent::Ui(e) => e.id = id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AnalyticsEvent::Contract(_) => "contract",
            AnalyticsEvent::Ui(_) => "ui",
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            AnalyticsEvent::Contract(_) => EventType::ContractInteraction,
            AnalyticsEvent::Ui(e) => e.event_type,
        }
    }

    pub fn wallet_address(&self) -> Option<&str> {
        match self {
            AnalyticsEvent::Contract(e) => e.wallet_address.as_deref(),
            AnalyticsEvent::Ui(e) => e.wallet_address.as_deref(),
        }
    }

    pub fn contract_address(&self) -> Option<&str> {
        match self {
            AnalyticsEvent::Contract(e) => Some(&e.contract_address),
            AnalyticsEvent::Ui(_) => None,
        }
    }

    pub fn chain_id(&self) -> Option<u64> {
        match self {
            AnalyticsEvent::Contract(e) => Some(e.chain_id),
            AnalyticsEvent::Ui(_) => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            AnalyticsEvent::Contract(_) => None,
            AnalyticsEvent::Ui(e) => e.session_id.as_deref(),
        }
    }

    pub fn block_number(&self) -> Option<u64> {
        match self {
            AnalyticsEvent::Contract(e) => Some(e.block_number),
            AnalyticsEvent::Ui(_) => None,
        }
    }

    pub fn gas_used(&self) -> Option<&GasAmount> {
        match self {
            AnalyticsEvent::Contract(e) => e.gas_used.as_ref(),
            AnalyticsEvent::Ui(_) => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AnalyticsEvent::Contract(e) => e.timestamp,
            AnalyticsEvent::Ui(e) => e.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSession {
    pub id: String,
    pub wallet_address: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub referrer: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Milliseconds between start and end
    pub duration: Option<i64>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
    pub entry_page: Option<String>,
    pub exit_page: Option<String>,
    pub page_views: u64,
    pub interactions: u64,
    pub chain_id: Option<u64>,
}

impl AnalyticsSession {
    /// Page the visitor is currently on, as far as we know
    pub fn current_page(&self) -> Option<&str> {
        self.exit_page.as_deref().or(self.entry_page.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsUser {
    pub wallet_address: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_sessions: u64,
    pub total_interactions: u64,
    pub total_transactions: u64,
    pub total_gas_spent: GasAmount,
    #[serde(default)]
    pub tags: Vec<String>,
    pub metadata: Option<Metadata>,
}

impl AnalyticsUser {
    pub fn new(wallet_address: String, now: DateTime<Utc>, metadata: Option<Metadata>) -> Self {
        Self {
            wallet_address,
            first_seen: now,
            last_seen: now,
            total_sessions: 0,
            total_interactions: 0,
            total_transactions: 0,
            total_gas_spent: GasAmount::zero(),
            tags: Vec::new(),
            metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractAnalytics {
    pub address: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub contract_type: Option<String>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub deployer_address: Option<String>,
    pub total_interactions: u64,
    pub unique_users: u64,
    pub last_interaction: Option<DateTime<Utc>>,
    pub gas_used: GasAmount,
    pub events: BTreeMap<String, u64>,
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
}

/// Identifying and descriptive fields for a contract's first sighting
#[derive(Debug, Clone, Default)]
pub struct NewContract {
    pub address: String,
    pub name: Option<String>,
    pub contract_type: Option<String>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub deployer_address: Option<String>,
    pub metadata: Option<Metadata>,
}

impl NewContract {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            ..Default::default()
        }
    }

    pub fn into_record(self, now: DateTime<Utc>) -> ContractAnalytics {
        ContractAnalytics {
            address: normalize_address(&self.address),
            name: self.name,
            contract_type: self.contract_type,
            deployed_at: self.deployed_at,
            deployer_address: self.deployer_address.map(|a| normalize_address(&a)),
            total_interactions: 0,
            unique_users: 0,
            last_interaction: None,
            gas_used: GasAmount::zero(),
            events: BTreeMap::new(),
            metadata: self.metadata,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractCount {
    pub address: String,
    pub interactions: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCount {
    pub event_type: EventType,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySnapshot {
    pub date: NaiveDate,
    pub new_users: u64,
    pub active_users: u64,
    pub total_sessions: u64,
    /// Mean session duration in milliseconds
    pub average_session_duration: f64,
    pub total_transactions: u64,
    pub total_gas_used: GasAmount,
    pub top_contracts: Vec<ContractCount>,
    pub top_events: Vec<EventCount>,
}

/// EventStore query filter; all bounds inclusive, all fields optional
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub wallet_address: Option<String>,
    pub contract_address: Option<String>,
    pub event_type: Option<EventType>,
    pub chain_id: Option<u64>,
}

impl EventFilter {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            ..Default::default()
        }
    }

    /// Copy with addresses normalized the way the stores key them
    pub fn normalized(&self) -> Self {
        Self {
            wallet_address: self.wallet_address.as_deref().map(normalize_address),
            contract_address: self.contract_address.as_deref().map(normalize_address),
            ..self.clone()
        }
    }

    pub fn matches(&self, event: &AnalyticsEvent) -> bool {
        let ts = event.timestamp();
        if self.start.is_some_and(|start| ts < start) {
            return false;
        }
        if self.end.is_some_and(|end| ts > end) {
            return false;
        }
        if let Some(wallet) = &self.wallet_address {
            if event.wallet_address() != Some(wallet.as_str()) {
                return false;
            }
        }
        if let Some(contract) = &self.contract_address {
            if event.contract_address() != Some(contract.as_str()) {
                return false;
            }
        }
        if self.event_type.is_some_and(|t| event.event_type() != t) {
            return false;
        }
        if self.chain_id.is_some() && event.chain_id() != self.chain_id {
            return false;
        }
        true
    }
}

pub const MAX_PAGE_LIMIT: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.limit as usize
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, 50)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    Timestamp,
    BlockNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSort {
    pub field: SortField,
    pub order: SortOrder,
}

impl EventSort {
    pub fn newest_first() -> Self {
        Self {
            field: SortField::Timestamp,
            order: SortOrder::Desc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let seen = pagination.page as u64 * pagination.limit as u64;
        Self {
            data,
            total,
            page: pagination.page,
            limit: pagination.limit,
            has_more: seen < total,
        }
    }
}
