//! SQLite-based store implementation

use chrono::{DateTime, Local};
use rental_api::{HistoryFilter, SessionInfo};
use rental_util::SessionId;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{ActiveSessionsSnapshot, AuditEvent, Store, StoreError, StoreResult};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        // A restarting service may briefly overlap the previous one
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Completed sessions (read-only history)
            CREATE TABLE IF NOT EXISTS completed_sessions (
                session_id TEXT PRIMARY KEY,
                resource_id TEXT NOT NULL,
                customer_name TEXT NOT NULL,
                completed_at_ms INTEGER NOT NULL,
                session_json TEXT NOT NULL
            );

            -- Active-session snapshot (single row)
            CREATE TABLE IF NOT EXISTS snapshot (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                snapshot_json TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_completed_at ON completed_sessions(completed_at_ms);
            CREATE INDEX IF NOT EXISTS idx_completed_resource ON completed_sessions(resource_id);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

impl Store for SqliteStore {
    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Local))
                .map_err(|e| StoreError::InvalidRecord(format!("audit {}: {}", id, e)))?;
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn record_completed(&self, session: &SessionInfo) -> StoreResult<()> {
        let completion = session.completion.as_ref().ok_or_else(|| {
            StoreError::InvalidRecord(format!("session {} is not completed", session.session_id))
        })?;

        let conn = self.conn()?;
        let json = serde_json::to_string(session)?;

        let inserted = conn.execute(
            r#"
            INSERT INTO completed_sessions
                (session_id, resource_id, customer_name, completed_at_ms, session_json)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO NOTHING
            "#,
            params![
                session.session_id.to_string(),
                session.resource_id.as_str(),
                session.customer_name,
                completion.completed_at.timestamp_millis(),
                json
            ],
        )?;

        if inserted == 0 {
            warn!(session_id = %session.session_id, "Completed session already recorded");
        } else {
            debug!(session_id = %session.session_id, "Completed session recorded");
        }
        Ok(())
    }

    fn is_completed(&self, session_id: &SessionId) -> StoreResult<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM completed_sessions WHERE session_id = ?",
                [session_id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn query_history(&self, filter: &HistoryFilter) -> StoreResult<Vec<SessionInfo>> {
        let conn = self.conn()?;

        let mut sql = String::from("SELECT session_json FROM completed_sessions WHERE 1 = 1");
        let mut args: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(resource_id) = &filter.resource_id {
            sql.push_str(" AND resource_id = ?");
            args.push(Box::new(resource_id.as_str().to_string()));
        }
        if let Some(customer) = &filter.customer {
            sql.push_str(" AND instr(lower(customer_name), lower(?)) > 0");
            args.push(Box::new(customer.clone()));
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND completed_at_ms >= ?");
            args.push(Box::new(since.timestamp_millis()));
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND completed_at_ms < ?");
            args.push(Box::new(until.timestamp_millis()));
        }
        sql.push_str(" ORDER BY completed_at_ms DESC, session_id");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            args.push(Box::new(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            row.get::<_, String>(0)
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let session: SessionInfo = serde_json::from_str(&row?)?;
            sessions.push(session);
        }

        Ok(sessions)
    }

    fn clear_history(&self, before: Option<DateTime<Local>>) -> StoreResult<usize> {
        let conn = self.conn()?;

        let removed = match before {
            Some(before) => conn.execute(
                "DELETE FROM completed_sessions WHERE completed_at_ms < ?",
                [before.timestamp_millis()],
            )?,
            None => conn.execute("DELETE FROM completed_sessions", [])?,
        };

        debug!(removed, "History cleared");
        Ok(removed)
    }

    fn load_snapshot(&self) -> StoreResult<Option<ActiveSessionsSnapshot>> {
        let conn = self.conn()?;

        let json: Option<String> = conn
            .query_row("SELECT snapshot_json FROM snapshot WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match json {
            Some(s) => {
                let snapshot: ActiveSessionsSnapshot = serde_json::from_str(&s)?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    fn save_snapshot(&self, snapshot: &ActiveSessionsSnapshot) -> StoreResult<()> {
        let conn = self.conn()?;
        let json = serde_json::to_string(snapshot)?;

        conn.execute(
            r#"
            INSERT INTO snapshot (id, snapshot_json)
            VALUES (1, ?)
            ON CONFLICT(id)
            DO UPDATE SET snapshot_json = excluded.snapshot_json
            "#,
            [json],
        )?;

        debug!(sessions = snapshot.sessions.len(), "Snapshot saved");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuditEventType;
    use chrono::TimeZone;
    use rental_api::{
        CompletionReason, CompletionSnapshot, Money, RentalMode, SessionState,
    };
    use rental_util::{ResourceId, SessionId};

    fn completed(resource: &str, customer: &str, completed_at: DateTime<Local>) -> SessionInfo {
        SessionInfo {
            session_id: SessionId::new(),
            resource_id: ResourceId::new(resource),
            resource_label: resource.to_uppercase(),
            hourly_rate: Money::from_cents(800),
            customer_name: customer.into(),
            mode: RentalMode::OpenEnded,
            state: SessionState::Completed,
            base_elapsed_ms: 30 * 60_000,
            last_resume_at: None,
            created_at: completed_at - chrono::Duration::minutes(32),
            revision: 4,
            completion: Some(CompletionSnapshot {
                raw_minutes: 30,
                billed_minutes: 30,
                billed_amount: Money::from_cents(400),
                reason: CompletionReason::Manual,
                completed_at,
            }),
        }
    }

    fn at(hour: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
    }

    #[test]
    fn test_audit_log() {
        let store = SqliteStore::in_memory().unwrap();

        let event = AuditEvent::new(AuditEventType::ServiceStarted);
        store.append_audit(event).unwrap();
        store
            .append_audit(AuditEvent::new(AuditEventType::HistoryCleared {
                removed: 2,
                before: None,
            }))
            .unwrap();

        let events = store.get_recent_audits(10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0].event,
            AuditEventType::HistoryCleared { removed: 2, .. }
        ));
        assert!(matches!(events[1].event, AuditEventType::ServiceStarted));
    }

    #[test]
    fn test_history_filters() {
        let store = SqliteStore::in_memory().unwrap();
        store.record_completed(&completed("ps5-1", "Jane Doe", at(10))).unwrap();
        store.record_completed(&completed("ps5-2", "John", at(11))).unwrap();
        store.record_completed(&completed("ps5-1", "JANE roe", at(12))).unwrap();

        let all = store.query_history(&HistoryFilter::default()).unwrap();
        assert_eq!(all.len(), 3);
        // Newest first
        assert_eq!(all[0].customer_name, "JANE roe");

        let by_resource = store
            .query_history(&HistoryFilter {
                resource_id: Some(ResourceId::new("ps5-1")),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_resource.len(), 2);

        let by_customer = store
            .query_history(&HistoryFilter {
                customer: Some("jane".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_customer.len(), 2);

        let window = store
            .query_history(&HistoryFilter {
                since: Some(at(11)),
                until: Some(at(12)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].customer_name, "John");

        let limited = store
            .query_history(&HistoryFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_record_completed_once() {
        let store = SqliteStore::in_memory().unwrap();
        let session = completed("ps5-1", "Jane", at(10));

        store.record_completed(&session).unwrap();
        store.record_completed(&session).unwrap();

        let all = store.query_history(&HistoryFilter::default()).unwrap();
        assert_eq!(all, vec![session]);
    }

    #[test]
    fn test_is_completed() {
        let store = SqliteStore::in_memory().unwrap();
        let session = completed("ps5-1", "Jane", at(10));
        assert!(!store.is_completed(&session.session_id).unwrap());

        store.record_completed(&session).unwrap();
        assert!(store.is_completed(&session.session_id).unwrap());
        assert!(!store.is_completed(&SessionId::new()).unwrap());

        store.clear_history(None).unwrap();
        assert!(!store.is_completed(&session.session_id).unwrap());
    }

    #[test]
    fn test_live_session_rejected_from_history() {
        let store = SqliteStore::in_memory().unwrap();
        let mut session = completed("ps5-1", "Jane", at(10));
        session.state = SessionState::Active;
        session.completion = None;

        assert!(matches!(
            store.record_completed(&session),
            Err(StoreError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_clear_history() {
        let store = SqliteStore::in_memory().unwrap();
        store.record_completed(&completed("ps5-1", "A", at(9))).unwrap();
        store.record_completed(&completed("ps5-1", "B", at(10))).unwrap();
        store.record_completed(&completed("ps5-1", "C", at(11))).unwrap();

        assert_eq!(store.clear_history(Some(at(10))).unwrap(), 1);
        assert_eq!(store.clear_history(None).unwrap(), 2);
        assert!(store.query_history(&HistoryFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_snapshot() {
        let store = SqliteStore::in_memory().unwrap();

        // No snapshot initially
        assert!(store.load_snapshot().unwrap().is_none());

        let snapshot = ActiveSessionsSnapshot {
            timestamp: at(10),
            sessions: Vec::new(),
        };
        store.save_snapshot(&snapshot).unwrap();

        let loaded = store.load_snapshot().unwrap().unwrap();
        assert!(loaded.sessions.is_empty());
        assert_eq!(loaded.timestamp, at(10));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rentald.db");
        let session = completed("ps5-1", "Jane", at(10));

        {
            let store = SqliteStore::open(&path).unwrap();
            store.record_completed(&session).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let history = store.query_history(&HistoryFilter::default()).unwrap();
        assert_eq!(history, vec![session]);
    }
}
