//! Storage layer: backend trait, SQLite and in-memory implementations, and
//! the gateway that picks between them

pub mod backend;
pub mod gateway;
pub mod keyed_lock;
pub mod memory;
pub mod sqlite;

pub use backend::{AnalyticsBackend, StoreError};
pub use gateway::PersistenceGateway;
pub use keyed_lock::KeyedLocks;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
