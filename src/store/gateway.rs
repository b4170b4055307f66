//! Durable-first execution with in-memory fallback
//!
//! Every aggregate operation goes through [`PersistenceGateway`]. When the
//! durable backend is configured the operation runs there first; on any
//! error (or when no durable backend exists) it runs once against the
//! process-local [`MemoryStore`]. Nothing is retried.

use super::backend::{AnalyticsBackend, StoreError};
use super::memory::MemoryStore;
use super::sqlite::SqliteStore;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// The "falling back" notice is logged once per process
static FALLBACK_NOTICE_LOGGED: AtomicBool = AtomicBool::new(false);

pub struct PersistenceGateway {
    durable: Option<Arc<dyn AnalyticsBackend>>,
    fallback: OnceLock<Arc<MemoryStore>>,
    fallback_count: AtomicU64,
}

impl PersistenceGateway {
    pub fn new(durable: Option<Arc<dyn AnalyticsBackend>>) -> Self {
        Self {
            durable,
            fallback: OnceLock::new(),
            fallback_count: AtomicU64::new(0),
        }
    }

    /// Gateway with no durable backend; everything lands in memory
    pub fn memory_only() -> Self {
        Self::new(None)
    }

    /// Open the SQLite file when enabled; an open failure degrades to memory
    pub fn from_config(enable_durable: bool, db_path: impl AsRef<Path>) -> Self {
        if !enable_durable {
            log::info!("💾 Durable store disabled, using in-memory backend");
            return Self::memory_only();
        }
        match SqliteStore::open(db_path.as_ref()) {
            Ok(store) => {
                log::info!("💾 Durable store ready: {}", db_path.as_ref().display());
                Self::new(Some(Arc::new(store)))
            }
            Err(e) => {
                log::warn!(
                    "⚠️  Could not open durable store at {}: {}",
                    db_path.as_ref().display(),
                    e
                );
                Self::memory_only()
            }
        }
    }

    pub fn durable_backend_type(&self) -> Option<&'static str> {
        self.durable.as_ref().map(|d| d.backend_type())
    }

    /// Operations served by the in-memory backend so far
    pub fn fallback_count(&self) -> u64 {
        self.fallback_count.load(Ordering::Relaxed)
    }

    fn memory(&self) -> &Arc<MemoryStore> {
        self.fallback.get_or_init(|| {
            log::debug!("🧠 Initializing in-memory backend");
            Arc::new(MemoryStore::new())
        })
    }

    /// Run `durable_op` against the durable backend, else `fallback_op`
    /// against memory
    pub fn execute<T, D, F>(&self, durable_op: D, fallback_op: F) -> Result<T, StoreError>
    where
        D: FnOnce(&dyn AnalyticsBackend) -> Result<T, StoreError>,
        F: FnOnce(&dyn AnalyticsBackend) -> Result<T, StoreError>,
    {
        if let Some(durable) = &self.durable {
            match durable_op(durable.as_ref()) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !FALLBACK_NOTICE_LOGGED.swap(true, Ordering::SeqCst) {
                        log::warn!(
                            "⚠️  Durable store failed ({}), falling back to in-memory storage",
                            e
                        );
                    } else {
                        log::debug!("Durable op failed, using fallback: {}", e);
                    }
                }
            }
        }

        self.fallback_count.fetch_add(1, Ordering::Relaxed);
        let memory: &MemoryStore = self.memory();
        fallback_op(memory)
    }

    /// Same operation against whichever backend serves it
    pub fn run<T, O>(&self, op: O) -> Result<T, StoreError>
    where
        O: Fn(&dyn AnalyticsBackend) -> Result<T, StoreError>,
    {
        self.execute(&op, &op)
    }
}
