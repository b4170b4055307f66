//! Running aggregates keyed by contract, wallet and session
//!
//! Each aggregator owns a `KeyedLocks` so read-modify-write on one key is
//! serialized, and runs the whole sequence as a single gateway operation so
//! every step hits the same backend.

pub mod contracts;
pub mod sessions;
pub mod users;

pub use contracts::ContractAnalyticsAggregator;
pub use sessions::{NewSession, SessionStatsUpdate, SessionTracker};
pub use users::{UserAnalyticsAggregator, UserStatsUpdate};

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Source of "now" (injectable for tests)
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Clock frozen at `at`
pub fn fixed_clock(at: DateTime<Utc>) -> Clock {
    Arc::new(move || at)
}
