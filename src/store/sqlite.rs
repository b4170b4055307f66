//! Durable SQLite backend
//!
//! Schema lives in `/sql/*.sql` and is embedded at build time. Every file
//! uses IF NOT EXISTS so migrations run on each open.
//!
//! Timestamps are stored as integer milliseconds since the epoch, gas
//! quantities as decimal TEXT, nested structures as JSON TEXT.

use super::backend::{AnalyticsBackend, StoreError};
use crate::gas::GasAmount;
use crate::types::{
    AnalyticsEvent, AnalyticsSession, AnalyticsUser, ContractAnalytics, DailySnapshot, EventFilter,
    EventSort, EventType, Page, Pagination, SortField, SortOrder,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const MIGRATIONS: &[(&str, &str)] = &[
    ("00_events.sql", include_str!("../../sql/00_events.sql")),
    ("01_contract_analytics.sql", include_str!("../../sql/01_contract_analytics.sql")),
    ("02_users.sql", include_str!("../../sql/02_users.sql")),
    ("03_sessions.sql", include_str!("../../sql/03_sessions.sql")),
    ("04_daily_snapshots.sql", include_str!("../../sql/04_daily_snapshots.sql")),
];

const CONTRACT_COLUMNS: &str = "address, name, contract_type, deployed_at, deployer_address, \
     total_interactions, unique_users, last_interaction, gas_used, events, metadata, created_at";

const USER_COLUMNS: &str = "wallet_address, first_seen, last_seen, total_sessions, \
     total_interactions, total_transactions, total_gas_spent, tags, metadata";

const SESSION_COLUMNS: &str = "id, wallet_address, user_agent, ip_address, referrer, start_time, \
     end_time, duration, last_activity, is_active, entry_page, exit_page, page_views, \
     interactions, chain_id";

const SNAPSHOT_COLUMNS: &str = "date, new_users, active_users, total_sessions, \
     average_session_duration, total_transactions, total_gas_used, top_contracts, top_events";

/// Apply every embedded migration in filename order
pub fn run_schema_migrations(conn: &Connection) -> Result<(), StoreError> {
    log::info!("🔧 Running schema migrations");
    for (name, sql) in MIGRATIONS {
        log::debug!("   ├─ Executing: {}", name);
        conn.execute_batch(sql)?;
    }
    log::info!("✅ Schema migrations complete ({} files)", MIGRATIONS.len());
    Ok(())
}

fn ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn conversion_error(
    idx: usize,
    ty: Type,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, err.into())
}

fn time_col(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| {
            conversion_error(idx, Type::Integer, format!("timestamp out of range: {}", millis))
        })
}

fn opt_time_col(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => time_col(row, idx).map(Some),
        None => Ok(None),
    }
}

fn json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, Type::Text, e))
}

fn opt_json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| conversion_error(idx, Type::Text, e)),
        None => Ok(None),
    }
}

fn gas_col(row: &Row, idx: usize) -> rusqlite::Result<GasAmount> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, Type::Text, e))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    Ok(serde_json::to_string(value)?)
}

fn opt_to_json<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>, StoreError> {
    value.as_ref().map(to_json).transpose()
}

fn contract_from_row(row: &Row) -> rusqlite::Result<ContractAnalytics> {
    Ok(ContractAnalytics {
        address: row.get(0)?,
        name: row.get(1)?,
        contract_type: row.get(2)?,
        deployed_at: opt_time_col(row, 3)?,
        deployer_address: row.get(4)?,
        total_interactions: row.get(5)?,
        unique_users: row.get(6)?,
        last_interaction: opt_time_col(row, 7)?,
        gas_used: gas_col(row, 8)?,
        events: json_col(row, 9)?,
        metadata: opt_json_col(row, 10)?,
        created_at: time_col(row, 11)?,
    })
}

fn user_from_row(row: &Row) -> rusqlite::Result<AnalyticsUser> {
    Ok(AnalyticsUser {
        wallet_address: row.get(0)?,
        first_seen: time_col(row, 1)?,
        last_seen: time_col(row, 2)?,
        total_sessions: row.get(3)?,
        total_interactions: row.get(4)?,
        total_transactions: row.get(5)?,
        total_gas_spent: gas_col(row, 6)?,
        tags: json_col(row, 7)?,
        metadata: opt_json_col(row, 8)?,
    })
}

fn session_from_row(row: &Row) -> rusqlite::Result<AnalyticsSession> {
    Ok(AnalyticsSession {
        id: row.get(0)?,
        wallet_address: row.get(1)?,
        user_agent: row.get(2)?,
        ip_address: row.get(3)?,
        referrer: row.get(4)?,
        start_time: time_col(row, 5)?,
        end_time: opt_time_col(row, 6)?,
        duration: row.get(7)?,
        last_activity: time_col(row, 8)?,
        is_active: row.get(9)?,
        entry_page: row.get(10)?,
        exit_page: row.get(11)?,
        page_views: row.get(12)?,
        interactions: row.get(13)?,
        chain_id: row.get(14)?,
    })
}

fn snapshot_from_row(row: &Row) -> rusqlite::Result<DailySnapshot> {
    let date: String = row.get(0)?;
    Ok(DailySnapshot {
        date: date
            .parse::<NaiveDate>()
            .map_err(|e| conversion_error(0, Type::Text, e))?,
        new_users: row.get(1)?,
        active_users: row.get(2)?,
        total_sessions: row.get(3)?,
        average_session_duration: row.get(4)?,
        total_transactions: row.get(5)?,
        total_gas_used: gas_col(row, 6)?,
        top_contracts: json_col(row, 7)?,
        top_events: json_col(row, 8)?,
    })
}

fn event_from_row(row: &Row) -> rusqlite::Result<AnalyticsEvent> {
    json_col(row, 0)
}

/// WHERE clause and bound values for an event filter
fn filter_clause(filter: &EventFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(start) = filter.start {
        clauses.push("timestamp >= ?");
        values.push(Value::Integer(ms(start)));
    }
    if let Some(end) = filter.end {
        clauses.push("timestamp <= ?");
        values.push(Value::Integer(ms(end)));
    }
    if let Some(wallet) = &filter.wallet_address {
        clauses.push("wallet_address = ?");
        values.push(Value::Text(wallet.clone()));
    }
    if let Some(contract) = &filter.contract_address {
        clauses.push("contract_address = ?");
        values.push(Value::Text(contract.clone()));
    }
    if let Some(event_type) = filter.event_type {
        clauses.push("event_type = ?");
        values.push(Value::Text(event_type.as_str().to_string()));
    }
    if let Some(chain_id) = filter.chain_id {
        clauses.push("chain_id = ?");
        values.push(Value::Integer(chain_id as i64));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

fn order_clause(sort: Option<EventSort>) -> &'static str {
    match sort {
        None => " ORDER BY seq ASC",
        Some(EventSort { field: SortField::Timestamp, order: SortOrder::Asc }) => {
            " ORDER BY timestamp ASC, seq ASC"
        }
        Some(EventSort { field: SortField::Timestamp, order: SortOrder::Desc }) => {
            " ORDER BY timestamp DESC, seq ASC"
        }
        Some(EventSort { field: SortField::BlockNumber, order: SortOrder::Asc }) => {
            " ORDER BY block_number ASC, seq ASC"
        }
        Some(EventSort { field: SortField::BlockNumber, order: SortOrder::Desc }) => {
            " ORDER BY block_number DESC, seq ASC"
        }
    }
}

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and bring the schema up to date
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        log::info!("📊 Opened {} (journal_mode={})", db_path.display(), mode);

        run_schema_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        run_schema_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned("sqlite"))
    }

    fn query_contracts(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ContractAnalytics>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, contract_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn query_users(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<AnalyticsUser>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, user_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn query_sessions(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<AnalyticsSession>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, session_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn write_session(&self, session: &AnalyticsSession, sql: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            sql,
            params![
                session.id,
                session.wallet_address,
                session.user_agent,
                session.ip_address,
                session.referrer,
                ms(session.start_time),
                session.end_time.map(ms),
                session.duration,
                ms(session.last_activity),
                session.is_active,
                session.entry_page,
                session.exit_page,
                session.page_views,
                session.interactions,
                session.chain_id,
            ],
        )?;
        Ok(())
    }
}

impl AnalyticsBackend for SqliteStore {
    fn backend_type(&self) -> &'static str {
        "sqlite"
    }

    fn insert_event(&self, event: &AnalyticsEvent) -> Result<(), StoreError> {
        let payload = to_json(event)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO events
             (id, kind, event_type, wallet_address, contract_address, chain_id,
              session_id, block_number, timestamp, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                event.id(),
                event.kind(),
                event.event_type().as_str(),
                event.wallet_address(),
                event.contract_address(),
                event.chain_id(),
                event.session_id(),
                event.block_number(),
                ms(event.timestamp()),
                payload,
            ],
        )?;
        Ok(())
    }

    fn query_events(
        &self,
        filter: &EventFilter,
        pagination: Pagination,
        sort: Option<EventSort>,
    ) -> Result<Page<AnalyticsEvent>, StoreError> {
        let total = self.count_events(filter)?;

        let (where_sql, mut values) = filter_clause(filter);
        let sql = format!(
            "SELECT payload FROM events{}{} LIMIT ? OFFSET ?",
            where_sql,
            order_clause(sort)
        );
        values.push(Value::Integer(pagination.limit as i64));
        values.push(Value::Integer(pagination.offset() as i64));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), event_from_row)?;
        let data = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(data, total, pagination))
    }

    fn count_events(&self, filter: &EventFilter) -> Result<u64, StoreError> {
        let (where_sql, values) = filter_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM events{}", where_sql);
        let conn = self.lock()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(count as u64)
    }

    fn get_event(&self, id: &str) -> Result<Option<AnalyticsEvent>, StoreError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row("SELECT payload FROM events WHERE id = ?1", [id], event_from_row)
            .optional()?)
    }

    fn delete_event(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM events WHERE id = ?1", [id])? > 0)
    }

    fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AnalyticsEvent>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM events
             WHERE timestamp >= ?1 AND timestamp < ?2
             ORDER BY timestamp ASC, seq ASC",
        )?;
        let rows = stmt.query_map(params![ms(start), ms(end)], event_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn count_events_by_type(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<BTreeMap<EventType, u64>, StoreError> {
        let filter = EventFilter {
            start,
            end,
            ..Default::default()
        };
        let (where_sql, values) = filter_clause(&filter);
        let sql = format!(
            "SELECT event_type, COUNT(*) FROM events{} GROUP BY event_type",
            where_sql
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (name, count) = row?;
            match name.parse::<EventType>() {
                Ok(event_type) => {
                    counts.insert(event_type, count as u64);
                }
                Err(e) => log::warn!("⚠️  Skipping stored event type: {}", e),
            }
        }
        Ok(counts)
    }

    fn get_contract(&self, address: &str) -> Result<Option<ContractAnalytics>, StoreError> {
        let sql = format!("SELECT {} FROM contract_analytics WHERE address = ?1", CONTRACT_COLUMNS);
        let conn = self.lock()?;
        Ok(conn.query_row(&sql, [address], contract_from_row).optional()?)
    }

    fn insert_contract_if_absent(
        &self,
        record: &ContractAnalytics,
    ) -> Result<ContractAnalytics, StoreError> {
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT OR IGNORE INTO contract_analytics
                 (address, name, contract_type, deployed_at, deployer_address,
                  total_interactions, unique_users, last_interaction, gas_used,
                  events, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    record.address,
                    record.name,
                    record.contract_type,
                    record.deployed_at.map(ms),
                    record.deployer_address,
                    record.total_interactions,
                    record.unique_users,
                    record.last_interaction.map(ms),
                    record.gas_used.to_decimal_string(),
                    to_json(&record.events)?,
                    opt_to_json(&record.metadata)?,
                    ms(record.created_at),
                ],
            )?;
        }
        self.get_contract(&record.address)?
            .ok_or_else(|| {
                StoreError::Database(format!("contract {} vanished after insert", record.address))
            })
    }

    fn save_contract(&self, record: &ContractAnalytics) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO contract_analytics
             (address, name, contract_type, deployed_at, deployer_address,
              total_interactions, unique_users, last_interaction, gas_used,
              events, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(address) DO UPDATE SET
                name = excluded.name,
                contract_type = excluded.contract_type,
                deployed_at = excluded.deployed_at,
                deployer_address = excluded.deployer_address,
                total_interactions = excluded.total_interactions,
                unique_users = excluded.unique_users,
                last_interaction = excluded.last_interaction,
                gas_used = excluded.gas_used,
                events = excluded.events,
                metadata = excluded.metadata",
            params![
                record.address,
                record.name,
                record.contract_type,
                record.deployed_at.map(ms),
                record.deployer_address,
                record.total_interactions,
                record.unique_users,
                record.last_interaction.map(ms),
                record.gas_used.to_decimal_string(),
                to_json(&record.events)?,
                opt_to_json(&record.metadata)?,
                ms(record.created_at),
            ],
        )?;
        Ok(())
    }

    fn list_contracts(&self) -> Result<Vec<ContractAnalytics>, StoreError> {
        let sql = format!("SELECT {} FROM contract_analytics", CONTRACT_COLUMNS);
        self.query_contracts(&sql, &[])
    }

    fn add_contract_user(
        &self,
        address: &str,
        wallet: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO contract_users (contract_address, wallet_address, first_seen)
             VALUES (?1, ?2, ?3)",
            params![address, wallet, ms(seen_at)],
        )?;
        Ok(inserted > 0)
    }

    fn count_contract_users(&self, address: &str) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM contract_users WHERE contract_address = ?1",
            [address],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn get_user(&self, wallet: &str) -> Result<Option<AnalyticsUser>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE wallet_address = ?1", USER_COLUMNS);
        let conn = self.lock()?;
        Ok(conn.query_row(&sql, [wallet], user_from_row).optional()?)
    }

    fn insert_user_if_absent(&self, user: &AnalyticsUser) -> Result<AnalyticsUser, StoreError> {
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT OR IGNORE INTO users
                 (wallet_address, first_seen, last_seen, total_sessions, total_interactions,
                  total_transactions, total_gas_spent, tags, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    user.wallet_address,
                    ms(user.first_seen),
                    ms(user.last_seen),
                    user.total_sessions,
                    user.total_interactions,
                    user.total_transactions,
                    user.total_gas_spent.to_decimal_string(),
                    to_json(&user.tags)?,
                    opt_to_json(&user.metadata)?,
                ],
            )?;
        }
        self.get_user(&user.wallet_address)?
            .ok_or_else(|| {
                StoreError::Database(format!("user {} vanished after insert", user.wallet_address))
            })
    }

    fn save_user(&self, user: &AnalyticsUser) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users
             (wallet_address, first_seen, last_seen, total_sessions, total_interactions,
              total_transactions, total_gas_spent, tags, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(wallet_address) DO UPDATE SET
                first_seen = excluded.first_seen,
                last_seen = excluded.last_seen,
                total_sessions = excluded.total_sessions,
                total_interactions = excluded.total_interactions,
                total_transactions = excluded.total_transactions,
                total_gas_spent = excluded.total_gas_spent,
                tags = excluded.tags,
                metadata = excluded.metadata",
            params![
                user.wallet_address,
                ms(user.first_seen),
                ms(user.last_seen),
                user.total_sessions,
                user.total_interactions,
                user.total_transactions,
                user.total_gas_spent.to_decimal_string(),
                to_json(&user.tags)?,
                opt_to_json(&user.metadata)?,
            ],
        )?;
        Ok(())
    }

    fn users_last_seen_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AnalyticsUser>, StoreError> {
        let sql = format!("SELECT {} FROM users WHERE last_seen >= ?1", USER_COLUMNS);
        self.query_users(&sql, &[&ms(since)])
    }

    fn users_first_seen_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AnalyticsUser>, StoreError> {
        let sql = format!(
            "SELECT {} FROM users WHERE first_seen >= ?1 AND first_seen < ?2",
            USER_COLUMNS
        );
        self.query_users(&sql, &[&ms(start), &ms(end)])
    }

    fn count_users(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn insert_session(&self, session: &AnalyticsSession) -> Result<(), StoreError> {
        self.write_session(
            session,
            "INSERT OR IGNORE INTO sessions
             (id, wallet_address, user_agent, ip_address, referrer, start_time, end_time,
              duration, last_activity, is_active, entry_page, exit_page, page_views,
              interactions, chain_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )
    }

    fn get_session(&self, id: &str) -> Result<Option<AnalyticsSession>, StoreError> {
        let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
        let conn = self.lock()?;
        Ok(conn.query_row(&sql, [id], session_from_row).optional()?)
    }

    fn save_session(&self, session: &AnalyticsSession) -> Result<(), StoreError> {
        self.write_session(
            session,
            "INSERT INTO sessions
             (id, wallet_address, user_agent, ip_address, referrer, start_time, end_time,
              duration, last_activity, is_active, entry_page, exit_page, page_views,
              interactions, chain_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(id) DO UPDATE SET
                wallet_address = excluded.wallet_address,
                user_agent = excluded.user_agent,
                ip_address = excluded.ip_address,
                referrer = excluded.referrer,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                duration = excluded.duration,
                last_activity = excluded.last_activity,
                is_active = excluded.is_active,
                entry_page = excluded.entry_page,
                exit_page = excluded.exit_page,
                page_views = excluded.page_views,
                interactions = excluded.interactions,
                chain_id = excluded.chain_id",
        )
    }

    fn active_sessions(&self) -> Result<Vec<AnalyticsSession>, StoreError> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE is_active = 1 ORDER BY start_time DESC, id ASC",
            SESSION_COLUMNS
        );
        self.query_sessions(&sql, &[])
    }

    fn sessions_by_wallet(&self, wallet: &str) -> Result<Vec<AnalyticsSession>, StoreError> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE wallet_address = ?1 ORDER BY start_time DESC, id ASC",
            SESSION_COLUMNS
        );
        self.query_sessions(&sql, &[&wallet])
    }

    fn sessions_started_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AnalyticsSession>, StoreError> {
        let sql = format!(
            "SELECT {} FROM sessions WHERE start_time >= ?1 AND start_time < ?2
             ORDER BY start_time ASC, id ASC",
            SESSION_COLUMNS
        );
        self.query_sessions(&sql, &[&ms(start), &ms(end)])
    }

    fn upsert_snapshot(&self, snapshot: &DailySnapshot) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO daily_snapshots
             (date, new_users, active_users, total_sessions, average_session_duration,
              total_transactions, total_gas_used, top_contracts, top_events)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(date) DO UPDATE SET
                new_users = excluded.new_users,
                active_users = excluded.active_users,
                total_sessions = excluded.total_sessions,
                average_session_duration = excluded.average_session_duration,
                total_transactions = excluded.total_transactions,
                total_gas_used = excluded.total_gas_used,
                top_contracts = excluded.top_contracts,
                top_events = excluded.top_events",
            params![
                snapshot.date.format("%Y-%m-%d").to_string(),
                snapshot.new_users,
                snapshot.active_users,
                snapshot.total_sessions,
                snapshot.average_session_duration,
                snapshot.total_transactions,
                snapshot.total_gas_used.to_decimal_string(),
                to_json(&snapshot.top_contracts)?,
                to_json(&snapshot.top_events)?,
            ],
        )?;
        Ok(())
    }

    fn get_snapshot(&self, date: NaiveDate) -> Result<Option<DailySnapshot>, StoreError> {
        let sql = format!("SELECT {} FROM daily_snapshots WHERE date = ?1", SNAPSHOT_COLUMNS);
        let conn = self.lock()?;
        Ok(conn
            .query_row(&sql, [date.format("%Y-%m-%d").to_string()], snapshot_from_row)
            .optional()?)
    }

    fn snapshots_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailySnapshot>, StoreError> {
        let sql = format!(
            "SELECT {} FROM daily_snapshots WHERE date >= ?1 AND date <= ?2 ORDER BY date ASC",
            SNAPSHOT_COLUMNS
        );
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![start.format("%Y-%m-%d").to_string(), end.format("%Y-%m-%d").to_string()],
            snapshot_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContractCount, ContractEvent, EventCount, NewContract};
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::tempdir;

    fn contract_event(id: &str, block: u64, hour: u32) -> AnalyticsEvent {
        AnalyticsEvent::Contract(ContractEvent {
            id: id.to_string(),
            contract_address: "0xabc".to_string(),
            event_name: "Transfer".to_string(),
            tx_hash: format!("0xtx{}", id),
            block_number: block,
            log_index: 0,
            wallet_address: Some("0x1".to_string()),
            chain_id: 1,
            gas_used: Some(GasAmount::from(21000u64)),
            gas_price: None,
            event_args: json!({"value": "5"}),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
        })
    }

    #[test]
    fn test_open_creates_parent_dir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("analytics.db");
        let store = SqliteStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.count_users().unwrap(), 0);

        // Second open re-runs migrations without error
        drop(store);
        SqliteStore::open(&path).unwrap();
    }

    #[test]
    fn test_events_roundtrip_and_sort() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_event(&contract_event("a", 30, 1)).unwrap();
        store.insert_event(&contract_event("b", 10, 3)).unwrap();
        store.insert_event(&contract_event("c", 20, 2)).unwrap();
        store.insert_event(&contract_event("a", 99, 9)).unwrap();

        let filter = EventFilter::default();
        assert_eq!(store.count_events(&filter).unwrap(), 3);

        let by_block = store
            .query_events(
                &filter,
                Pagination::new(1, 2),
                Some(EventSort { field: SortField::BlockNumber, order: SortOrder::Asc }),
            )
            .unwrap();
        let ids: Vec<&str> = by_block.data.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(by_block.total, 3);
        assert!(by_block.has_more);

        let stored = store.get_event("a").unwrap().unwrap();
        assert_eq!(stored, contract_event("a", 30, 1));

        let counts = store.count_events_by_type(None, None).unwrap();
        assert_eq!(counts.get(&EventType::ContractInteraction), Some(&3));
    }

    #[test]
    fn test_contract_roundtrip_with_big_gas() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let first = store
            .insert_contract_if_absent(&NewContract::new("0xabc").into_record(now))
            .unwrap();
        assert_eq!(first.total_interactions, 0);

        let mut updated = first.clone();
        updated.total_interactions = 7;
        updated.gas_used = "99999999999999999999999999".parse().unwrap();
        updated.events.insert("Transfer".to_string(), 7);
        updated.last_interaction = Some(now);
        store.save_contract(&updated).unwrap();

        // insert-if-absent must not clobber the saved row
        let again = store
            .insert_contract_if_absent(&NewContract::new("0xabc").into_record(now))
            .unwrap();
        assert_eq!(again, updated);
    }

    #[test]
    fn test_snapshot_upsert_overwrites() {
        let store = SqliteStore::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let mut snapshot = DailySnapshot {
            date,
            new_users: 1,
            active_users: 2,
            total_sessions: 3,
            average_session_duration: 1500.0,
            total_transactions: 4,
            total_gas_used: GasAmount::from(42000u64),
            top_contracts: vec![ContractCount { address: "0xabc".to_string(), interactions: 4 }],
            top_events: vec![EventCount { event_type: EventType::ContractInteraction, count: 4 }],
        };
        store.upsert_snapshot(&snapshot).unwrap();
        snapshot.new_users = 10;
        store.upsert_snapshot(&snapshot).unwrap();

        let all = store.snapshots_between(date, date).unwrap();
        assert_eq!(all, vec![snapshot]);
    }
}
