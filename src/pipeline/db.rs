//! Notification store: cooldown state and delivered-alert log
//!
//! Tables (see `/sql/` directory):
//! - `notification_records` - UPSERT on (pattern_id, instrument)
//! - `alert_history` - INSERT (append-only, pruned by retention horizon)

use super::detection::{Detection, PatternId};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Last successful delivery for one (pattern, instrument) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub pattern_id: PatternId,
    pub instrument: String,
    /// Unix seconds
    pub last_sent_at: i64,
}

impl NotificationRecord {
    pub fn new(pattern_id: PatternId, instrument: &str, last_sent_at: i64) -> Self {
        Self {
            pattern_id,
            instrument: instrument.to_string(),
            last_sent_at,
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    Schema(String),
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "sqlite error: {}", e),
            StoreError::Io(e) => write!(f, "io error: {}", e),
            StoreError::Schema(msg) => write!(f, "schema error: {}", msg),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Sqlite(e) => Some(e),
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

/// Persistence behind the cooldown gate
///
/// Single writer: only the dispatch policy calls `save`, and only after the
/// channel confirmed delivery.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn load(
        &self,
        pattern_id: PatternId,
        instrument: &str,
    ) -> Result<Option<NotificationRecord>, StoreError>;

    /// UPSERT on (pattern_id, instrument)
    async fn save(&self, record: &NotificationRecord) -> Result<(), StoreError>;

    /// Append a delivered alert to the audit log
    async fn append_history(&self, _detection: &Detection, _delivered_at: i64) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Run schema migrations from SQL files
///
/// Reads all .sql files from `schema_dir` in file-name order and executes
/// them. Every file must use `IF NOT EXISTS` so reruns are harmless.
pub fn run_schema_migrations(conn: &mut Connection, schema_dir: &str) -> Result<(), StoreError> {
    let schema_path = Path::new(schema_dir);

    if !schema_path.exists() {
        return Err(StoreError::Schema(format!(
            "schema directory not found: {}",
            schema_dir
        )));
    }

    conn.pragma_update(None, "journal_mode", "WAL")?;
    log::info!("📊 Enabled WAL mode for SQLite database");

    // 01_, 02_, ... order
    let mut sql_files: Vec<_> = fs::read_dir(schema_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();
    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_dir);

    for entry in sql_files {
        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().into_owned();

        log::info!("   ├─ Executing: {}", filename);
        let sql_content = fs::read_to_string(&path)?;
        conn.execute_batch(&sql_content)?;
        log::info!("   └─ ✅ Success: {}", filename);
    }

    log::info!("✅ All schema migrations completed successfully");
    Ok(())
}

/// SQLite implementation of NotificationStore
pub struct SqliteNotificationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteNotificationStore {
    /// Open an existing database
    ///
    /// Does NOT create the schema; run `run_schema_migrations` first.
    pub fn new(db_path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock leaves the connection usable
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Delete alert_history rows delivered before `cutoff`, returns rows removed
    pub fn prune_history(&self, cutoff: i64) -> Result<usize, StoreError> {
        let conn = self.lock();
        let removed = conn.execute("DELETE FROM alert_history WHERE delivered_at < ?", [cutoff])?;
        if removed > 0 {
            log::info!("🧹 Pruned {} alert_history rows older than {}", removed, cutoff);
        }
        Ok(removed)
    }

    /// Rows in alert_history for one pair, newest first: (pattern_name, delivered_at)
    pub fn history_for(&self, pattern_id: PatternId, instrument: &str) -> Result<Vec<(String, i64)>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT pattern_name, delivered_at FROM alert_history
             WHERE pattern_id = ? AND instrument = ?
             ORDER BY delivered_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![pattern_id.0, instrument], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[async_trait]
impl NotificationStore for SqliteNotificationStore {
    async fn load(
        &self,
        pattern_id: PatternId,
        instrument: &str,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        let conn = self.lock();
        let last_sent_at: Option<i64> = conn
            .query_row(
                "SELECT last_sent_at FROM notification_records WHERE pattern_id = ? AND instrument = ?",
                rusqlite::params![pattern_id.0, instrument],
                |row| row.get(0),
            )
            .optional()?;

        Ok(last_sent_at.map(|ts| NotificationRecord::new(pattern_id, instrument, ts)))
    }

    async fn save(&self, record: &NotificationRecord) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO notification_records (pattern_id, instrument, last_sent_at)
            VALUES (?, ?, ?)
            ON CONFLICT(pattern_id, instrument) DO UPDATE SET
                last_sent_at = excluded.last_sent_at
            "#,
            rusqlite::params![record.pattern_id.0, record.instrument, record.last_sent_at],
        )?;
        Ok(())
    }

    async fn append_history(&self, detection: &Detection, delivered_at: i64) -> Result<(), StoreError> {
        let evidence_json = serde_json::to_string(&detection.evidence).ok();
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO alert_history (
                pattern_id, pattern_name, instrument, priority, confidence, evidence_json, delivered_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            rusqlite::params![
                detection.pattern_id.0,
                detection.pattern_name,
                detection.instrument,
                detection.priority.as_str(),
                detection.confidence,
                evidence_json,
                delivered_at,
            ],
        )?;
        Ok(())
    }
}

/// Delivered alerts kept by `InMemoryNotificationStore` unless told otherwise
pub const DEFAULT_IN_MEMORY_HISTORY: usize = 500;

/// Process-local store, used by tests and when no database is configured
///
/// The delivered-alert log is a ring buffer: once `history_capacity` entries
/// are held, each append evicts the oldest.
pub struct InMemoryNotificationStore {
    records: Mutex<HashMap<(PatternId, String), NotificationRecord>>,
    history: Mutex<VecDeque<(PatternId, String, i64)>>,
    history_capacity: usize,
}

impl Default for InMemoryNotificationStore {
    fn default() -> Self {
        Self::with_history_capacity(DEFAULT_IN_MEMORY_HISTORY)
    }
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            history_capacity: capacity,
        }
    }

    pub fn records(&self) -> Vec<NotificationRecord> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        let mut all: Vec<NotificationRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| (a.pattern_id, &a.instrument).cmp(&(b.pattern_id, &b.instrument)));
        all
    }

    /// Delivered alerts as (pattern_id, instrument, delivered_at), oldest first
    pub fn history(&self) -> Vec<(PatternId, String, i64)> {
        self.history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn load(
        &self,
        pattern_id: PatternId,
        instrument: &str,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        Ok(records.get(&(pattern_id, instrument.to_string())).cloned())
    }

    async fn save(&self, record: &NotificationRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        records.insert(
            (record.pattern_id, record.instrument.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn append_history(&self, detection: &Detection, delivered_at: i64) -> Result<(), StoreError> {
        let mut history = self.history.lock().unwrap_or_else(|p| p.into_inner());
        while history.len() >= self.history_capacity {
            history.pop_front();
        }
        history.push_back((detection.pattern_id, detection.instrument.clone(), delivered_at));
        Ok(())
    }
}
