//! chainscope - analytics backend for a Web3 dApp
//!
//! Ingests decoded contract logs from EVM chains and off-chain UI events,
//! keeps running per-contract, per-wallet and per-session aggregates, and
//! compiles daily snapshots plus a live dashboard view. Storage goes through
//! a [`store::PersistenceGateway`] that degrades to memory when SQLite fails.

pub mod aggregates;
pub mod chain;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod events;
pub mod gas;
pub mod listener;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod ui;

pub use error::AnalyticsError;
pub use service::AnalyticsService;
