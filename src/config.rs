use crate::chain::RpcSettings;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// One entry of the `CONTRACTS_CONFIG` file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractConfig {
    pub chain_id: u64,
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub contract_type: Option<String>,
    pub abi: Value,
}

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    pub db_path: PathBuf,
    pub enable_durable_store: bool,
    /// chain id -> JSON-RPC endpoint
    pub rpc_urls: BTreeMap<u64, String>,
    pub contracts_config: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub max_block_range: u64,
    pub rpc_timeout_secs: u64,
    pub channel_buffer: usize,
    pub max_in_flight_handlers: usize,
    pub snapshot_interval_ms: u64,
    pub session_idle_timeout_secs: u64,
    pub recent_events_limit: u32,
    pub enable_dashboard_ui: bool,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/chainscope.db"),
            enable_durable_store: true,
            rpc_urls: BTreeMap::new(),
            contracts_config: None,
            poll_interval_ms: 4000,
            max_block_range: 500,
            rpc_timeout_secs: 10,
            channel_buffer: 1000,
            max_in_flight_handlers: 64,
            snapshot_interval_ms: 300_000,
            session_idle_timeout_secs: 1800,
            recent_events_limit: 20,
            enable_dashboard_ui: false,
        }
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn parse_flag(raw: Option<String>, default: bool) -> bool {
    raw.and_then(|s| s.trim().to_lowercase().parse().ok())
        .unwrap_or(default)
}

/// Parse `"1=https://a,137=https://b"` into chain id -> url
pub fn parse_rpc_urls(raw: &str) -> Result<BTreeMap<u64, String>, ConfigError> {
    let mut urls = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (chain, url) = entry.split_once('=').ok_or_else(|| {
            ConfigError::InvalidValue(format!(
                "CHAIN_RPC_URLS entry '{}' is not chainId=url",
                entry
            ))
        })?;
        let chain_id = chain.trim().parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue(format!(
                "CHAIN_RPC_URLS chain id '{}' is not a number",
                chain.trim()
            ))
        })?;
        let url = url.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(format!(
                "CHAIN_RPC_URLS url for chain {} must start with http:// or https://",
                chain_id
            )));
        }
        urls.insert(chain_id, url.to_string());
    }
    Ok(urls)
}

/// Read the JSON array of contracts to listen to
pub fn load_contracts(path: impl AsRef<Path>) -> Result<Vec<ContractConfig>, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::InvalidValue(format!("cannot read contracts file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        ConfigError::InvalidValue(format!("contracts file {} is malformed: {}", path.display(), e))
    })
}

impl AnalyticsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let rpc_urls = match lookup("CHAIN_RPC_URLS") {
            Some(raw) => parse_rpc_urls(&raw)?,
            None => BTreeMap::new(),
        };

        Ok(Self {
            db_path: lookup("ANALYTICS_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            enable_durable_store: parse_flag(
                lookup("ENABLE_DURABLE_STORE"),
                defaults.enable_durable_store,
            ),
            rpc_urls,
            contracts_config: lookup("CONTRACTS_CONFIG")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            poll_interval_ms: parse_or(lookup("CHAIN_POLL_INTERVAL_MS"), defaults.poll_interval_ms),
            max_block_range: parse_or(lookup("CHAIN_MAX_BLOCK_RANGE"), defaults.max_block_range),
            rpc_timeout_secs: parse_or(lookup("RPC_TIMEOUT_SECS"), defaults.rpc_timeout_secs),
            channel_buffer: parse_or(lookup("LISTENER_CHANNEL_BUFFER"), defaults.channel_buffer),
            max_in_flight_handlers: parse_or(
                lookup("LISTENER_MAX_IN_FLIGHT"),
                defaults.max_in_flight_handlers,
            ),
            snapshot_interval_ms: parse_or(
                lookup("SNAPSHOT_INTERVAL_MS"),
                defaults.snapshot_interval_ms,
            ),
            session_idle_timeout_secs: parse_or(
                lookup("SESSION_IDLE_TIMEOUT_SECS"),
                defaults.session_idle_timeout_secs,
            ),
            recent_events_limit: parse_or(
                lookup("DASHBOARD_RECENT_EVENTS"),
                defaults.recent_events_limit,
            ),
            enable_dashboard_ui: parse_flag(
                lookup("ENABLE_DASHBOARD_UI"),
                defaults.enable_dashboard_ui,
            ),
        })
    }

    pub fn rpc_settings(&self) -> RpcSettings {
        RpcSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_block_range: self.max_block_range,
            channel_buffer: self.channel_buffer,
            request_timeout: Duration::from_secs(self.rpc_timeout_secs),
        }
    }

    pub fn session_idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_idle_timeout_secs.min(u32::MAX as u64) as i64)
    }

    /// Configured contracts; empty when `CONTRACTS_CONFIG` is unset
    pub fn load_contracts(&self) -> Result<Vec<ContractConfig>, ConfigError> {
        match &self.contracts_config {
            Some(path) => load_contracts(path),
            None => Ok(Vec::new()),
        }
    }
}
