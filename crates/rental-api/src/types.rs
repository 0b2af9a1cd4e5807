//! Shared types for the rentald API

use chrono::{DateTime, Local};
use rental_util::{ResourceId, SessionId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ConvertedAmount, Money};

/// Rental mode as requested by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RentalModeTag {
    OpenEnded,
    FixedDuration,
}

/// Rental mode of a session. The fixed duration exists only for
/// fixed-duration rentals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RentalMode {
    /// Ends only by an explicit finish
    OpenEnded,
    /// Auto-completes once the accrued time reaches `minutes`
    FixedDuration { minutes: u32 },
}

impl RentalMode {
    pub fn tag(&self) -> RentalModeTag {
        match self {
            RentalMode::OpenEnded => RentalModeTag::OpenEnded,
            RentalMode::FixedDuration { .. } => RentalModeTag::FixedDuration,
        }
    }

    pub fn fixed_minutes(&self) -> Option<u32> {
        match self {
            RentalMode::OpenEnded => None,
            RentalMode::FixedDuration { minutes } => Some(*minutes),
        }
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Paused,
    Completed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Paused => "paused",
            SessionState::Completed => "completed",
        }
    }

    /// Active or paused: the session still holds its resource
    pub fn is_live(&self) -> bool {
        !matches!(self, SessionState::Completed)
    }
}

/// Why a session reached COMPLETED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// Operator called finish
    Manual,
    /// Fixed duration reached
    Expired,
}

impl CompletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionReason::Manual => "manual",
            CompletionReason::Expired => "expired",
        }
    }
}

/// Result of running the billing policy over an elapsed duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bill {
    pub raw_minutes: u64,
    pub billable_minutes: u64,
    pub amount: Money,
}

/// Billing record written once, when a session completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionSnapshot {
    pub raw_minutes: u64,
    pub billed_minutes: u64,
    pub billed_amount: Money,
    pub reason: CompletionReason,
    pub completed_at: DateTime<Local>,
}

/// A rental session as seen by clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub resource_id: ResourceId,
    pub resource_label: String,
    /// Hourly rate in force when the session started
    pub hourly_rate: Money,
    pub customer_name: String,
    pub mode: RentalMode,
    pub state: SessionState,
    /// Active time accumulated before the current running interval
    pub base_elapsed_ms: u64,
    /// Start of the current running interval; present iff state is active
    pub last_resume_at: Option<DateTime<Local>>,
    pub created_at: DateTime<Local>,
    /// Incremented on every applied transition
    pub revision: u64,
    pub completion: Option<CompletionSnapshot>,
}

impl SessionInfo {
    /// Elapsed active time at `now` computed from the carried timestamps.
    ///
    /// Clients use this for display only; the service recomputes billing
    /// from its own state.
    pub fn elapsed_at(&self, now: DateTime<Local>) -> Duration {
        let base = Duration::from_millis(self.base_elapsed_ms);
        match (self.state, self.last_resume_at) {
            (SessionState::Active, Some(resumed)) => {
                base + rental_util::interval_between(resumed, now)
            }
            _ => base,
        }
    }
}

/// Outcome of a finish request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishOutcome {
    pub session: SessionInfo,
    pub billed_minutes: u64,
    pub billed_amount: Money,
    /// Display-currency amount, if a rate is configured
    pub converted: Option<ConvertedAmount>,
}

/// Live cost estimate for an in-progress session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub session: SessionInfo,
    pub elapsed_ms: u64,
    pub bill: Bill,
    /// Minutes left for fixed-duration rentals (negative once overdue)
    pub remaining_minutes: Option<i64>,
    pub converted: Option<ConvertedAmount>,
}

/// Catalog resource with live availability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceView {
    pub resource_id: ResourceId,
    pub label: String,
    pub hourly_rate: Money,
    pub active: bool,
    /// Active in the catalog and not held by a live session
    pub available: bool,
    pub current_session: Option<SessionId>,
}

/// Filter over completed sessions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub resource_id: Option<ResourceId>,
    /// Case-insensitive substring of the customer name
    pub customer: Option<String>,
    /// Completed at or after
    pub since: Option<DateTime<Local>>,
    /// Completed strictly before
    pub until: Option<DateTime<Local>>,
    pub limit: Option<usize>,
}

/// Aggregate usage over completed sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_sessions: u64,
    pub total_raw_minutes: u64,
    pub total_billed_minutes: u64,
    pub revenue: Money,
    pub average_billed_minutes: u64,
    pub average_revenue: Money,
    pub converted_revenue: Option<ConvertedAmount>,
}

/// Advisory elapsed-time report pushed by an observer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub session_id: SessionId,
    /// Elapsed time the observer's display clock shows
    pub observed_elapsed_ms: i64,
    /// Observer's local wall-clock time when the value was read
    pub observed_at: DateTime<Local>,
}

/// Service answer to a reconciliation report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    /// Authoritative session, for the observer to re-anchor on
    pub session: SessionInfo,
    pub authoritative_elapsed_ms: u64,
    /// observed - authoritative
    pub drift_ms: i64,
    /// False when the report was discarded as implausible
    pub accepted: bool,
    pub within_tolerance: bool,
}

/// Full set of live sessions, sent on subscribe and on request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSnapshot {
    pub api_version: u32,
    /// Service wall-clock time when the snapshot was taken
    pub server_time: DateTime<Local>,
    pub sessions: Vec<SessionInfo>,
}

/// Role for authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Counter operator - can start, pause, resume, finish
    Operator,
    /// Shop owner - can also clear history
    Admin,
    /// Read-only display
    Observer,
}

impl ClientRole {
    pub fn can_mutate_sessions(&self) -> bool {
        matches!(self, ClientRole::Operator | ClientRole::Admin)
    }

    pub fn can_clear_history(&self) -> bool {
        matches!(self, ClientRole::Admin)
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub ready: bool,
    pub store_ok: bool,
    pub active_sessions: usize,
    pub connected_clients: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session(state: SessionState, last_resume_at: Option<DateTime<Local>>) -> SessionInfo {
        let created = Local.with_ymd_and_hms(2025, 6, 1, 15, 0, 0).unwrap();
        SessionInfo {
            session_id: SessionId::new(),
            resource_id: ResourceId::new("ps5-1"),
            resource_label: "PS5 #1".into(),
            hourly_rate: Money::from_cents(800),
            customer_name: "Jane".into(),
            mode: RentalMode::OpenEnded,
            state,
            base_elapsed_ms: 600_000,
            last_resume_at,
            created_at: created,
            revision: 1,
            completion: None,
        }
    }

    #[test]
    fn rental_mode_serialization() {
        let mode = RentalMode::FixedDuration { minutes: 30 };
        let json = serde_json::to_string(&mode).unwrap();
        assert_eq!(json, r#"{"type":"fixed_duration","minutes":30}"#);

        let parsed: RentalMode = serde_json::from_str(r#"{"type":"open_ended"}"#).unwrap();
        assert_eq!(parsed, RentalMode::OpenEnded);
        assert_eq!(mode.fixed_minutes(), Some(30));
        assert_eq!(parsed.fixed_minutes(), None);
    }

    #[test]
    fn paused_session_elapsed_is_frozen() {
        let s = session(SessionState::Paused, None);
        let later = s.created_at + chrono::Duration::hours(3);
        assert_eq!(s.elapsed_at(later), Duration::from_secs(600));
    }

    #[test]
    fn active_session_elapsed_adds_live_interval() {
        let resumed = Local.with_ymd_and_hms(2025, 6, 1, 15, 12, 0).unwrap();
        let s = session(SessionState::Active, Some(resumed));
        let now = resumed + chrono::Duration::minutes(5);
        assert_eq!(s.elapsed_at(now), Duration::from_secs(900));
    }

    #[test]
    fn role_permissions() {
        assert!(ClientRole::Operator.can_mutate_sessions());
        assert!(!ClientRole::Operator.can_clear_history());
        assert!(ClientRole::Admin.can_clear_history());
        assert!(!ClientRole::Observer.can_mutate_sessions());
    }
}
