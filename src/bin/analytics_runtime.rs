//! Analytics Runtime
//!
//! Orchestrates the analytics pipeline:
//! - Opens the durable store (or falls back to memory)
//! - Connects one JSON-RPC poller per configured chain
//! - Subscribes to every contract in CONTRACTS_CONFIG
//! - Spawns the snapshot scheduler (daily rollups + idle session sweep)
//! - Optionally runs the live terminal dashboard
//!
//! Usage:
//!   cargo run --release --bin analytics_runtime
//!
//! See .env.example for the environment variables.

use chainscope::chain::{ChainConnection, JsonRpcConnection};
use chainscope::config::AnalyticsConfig;
use chainscope::service::AnalyticsService;
use chainscope::snapshot::snapshot_scheduler_task;
use chainscope::store::PersistenceGateway;
use chainscope::ui::run_ui;
use dotenv::dotenv;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 chainscope analytics runtime");

    let config = AnalyticsConfig::from_env()?;
    let contracts = config.load_contracts()?;

    info!("📊 Configuration:");
    info!(
        "   ├─ Database: {} (durable: {})",
        config.db_path.display(),
        config.enable_durable_store
    );
    info!("   ├─ Chains: {:?}", config.rpc_urls.keys().collect::<Vec<_>>());
    info!("   ├─ Contracts: {}", contracts.len());
    info!("   ├─ Poll interval: {}ms", config.poll_interval_ms);
    info!("   ├─ Max in-flight handlers: {}", config.max_in_flight_handlers);
    info!("   └─ Snapshot interval: {}ms", config.snapshot_interval_ms);

    let gateway = Arc::new(PersistenceGateway::from_config(
        config.enable_durable_store,
        &config.db_path,
    ));
    let service = Arc::new(AnalyticsService::new(gateway, config.recent_events_limit));

    let mut connections: Vec<Arc<dyn ChainConnection>> = Vec::new();
    for (chain_id, url) in &config.rpc_urls {
        match JsonRpcConnection::new(*chain_id, url, config.rpc_settings()) {
            Ok(connection) => connections.push(Arc::new(connection)),
            Err(e) => error!("❌ Could not create client for chain {}: {}", chain_id, e),
        }
    }
    if connections.is_empty() {
        warn!(
            "⚠️  No chain connections configured (set CHAIN_RPC_URLS); only UI ingestion is live"
        );
    }

    let listener = service.listener(connections, contracts, config.max_in_flight_handlers);
    let live = listener.start().await;

    let scheduler = tokio::spawn(snapshot_scheduler_task(
        service.snapshots().clone(),
        service.sessions().clone(),
        config.snapshot_interval_ms,
        config.session_idle_timeout(),
    ));
    info!("✅ Snapshot scheduler spawned");

    info!("");
    info!("📡 Runtime Status:");
    info!("   ├─ Listeners: {} contracts", live);
    info!("   └─ Store: {}", service.gateway().durable_backend_type().unwrap_or("memory"));

    if config.enable_dashboard_ui {
        if let Err(e) = run_ui(service.clone(), Duration::from_secs(1)).await {
            error!("❌ Dashboard UI failed: {}", e);
        }
    } else {
        info!("🔄 Press CTRL+C to shutdown gracefully");
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
            Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
        }
    }

    listener.stop().await;
    scheduler.abort();

    // Final rollup so today's snapshot reflects everything ingested
    let today = service.snapshots().today();
    if let Err(e) = service.snapshots().create_daily_snapshot(today).await {
        error!("❌ Final snapshot failed: {}", e);
    }

    info!(
        "✅ Analytics runtime stopped ({} fallback operations)",
        service.gateway().fallback_count()
    );
    Ok(())
}
