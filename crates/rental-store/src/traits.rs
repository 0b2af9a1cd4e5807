//! Store trait definitions

use chrono::{DateTime, Local};
use rental_api::{HistoryFilter, SessionInfo};
use rental_util::SessionId;

use crate::{AuditEvent, StoreResult};

/// Main store trait
pub trait Store: Send + Sync {
    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // History

    /// Record a completed session. A session is recorded at most once;
    /// repeated calls for the same id are ignored.
    fn record_completed(&self, session: &SessionInfo) -> StoreResult<()>;

    /// Whether `session_id` is recorded as completed
    fn is_completed(&self, session_id: &SessionId) -> StoreResult<bool>;

    /// Completed sessions matching the filter, most recently completed first
    fn query_history(&self, filter: &HistoryFilter) -> StoreResult<Vec<SessionInfo>>;

    /// Delete completed sessions (all, or those completed before `before`).
    /// Returns the number removed.
    fn clear_history(&self, before: Option<DateTime<Local>>) -> StoreResult<usize>;

    // Active-session snapshot

    /// Load last saved snapshot
    fn load_snapshot(&self) -> StoreResult<Option<ActiveSessionsSnapshot>>;

    /// Save snapshot of in-progress sessions
    fn save_snapshot(&self, snapshot: &ActiveSessionsSnapshot) -> StoreResult<()>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// In-progress sessions at a point in time, for crash recovery
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ActiveSessionsSnapshot {
    /// Timestamp of snapshot
    pub timestamp: DateTime<Local>,

    /// Live (active or paused) sessions
    pub sessions: Vec<SessionInfo>,
}
