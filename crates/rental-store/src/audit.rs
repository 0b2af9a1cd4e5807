//! Audit event types

use chrono::{DateTime, Local};
use rental_api::{CompletionReason, Money, RentalMode};
use rental_util::{ResourceId, SessionId};
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Daemon started
    ServiceStarted,

    /// Daemon stopped
    ServiceStopped,

    /// Configuration loaded
    PolicyLoaded { resource_count: usize },

    /// In-progress sessions reinstalled after a restart
    SessionsRecovered { count: usize },

    SessionStarted {
        session_id: SessionId,
        resource_id: ResourceId,
        customer_name: String,
        mode: RentalMode,
    },

    SessionPaused {
        session_id: SessionId,
        elapsed_ms: u64,
    },

    SessionResumed { session_id: SessionId },

    SessionCompleted {
        session_id: SessionId,
        resource_id: ResourceId,
        reason: CompletionReason,
        raw_minutes: u64,
        billed_minutes: u64,
        billed_amount: Money,
    },

    /// Expiry warning issued for a fixed-duration session
    ExpiryWarning {
        session_id: SessionId,
        remaining_minutes: u64,
    },

    /// Completed history deleted (admin action)
    HistoryCleared {
        removed: usize,
        before: Option<DateTime<Local>>,
    },

    /// Client connected
    ClientConnected {
        observer_id: String,
        role: String,
        uid: Option<u32>,
    },

    /// Client disconnected
    ClientDisconnected { observer_id: String },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self::at(rental_util::now(), event)
    }

    /// Event stamped with the time the action took effect
    pub fn at(timestamp: DateTime<Local>, event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp,
            event,
        }
    }
}
