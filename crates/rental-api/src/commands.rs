//! Command types for the rentald protocol

use chrono::{DateTime, Local};
use rental_util::{ObserverId, RentalError, ResourceId, SessionId};
use serde::{Deserialize, Serialize};

use crate::{
    ActiveSnapshot, ClientRole, FinishOutcome, HealthStatus, HistoryFilter, Quote,
    ReconcileOutcome, ReconcileReport, RentalModeTag, ResourceView, SessionInfo, UsageStats,
    API_VERSION,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&RentalError> for ErrorInfo {
    fn from(err: &RentalError) -> Self {
        let code = match err {
            RentalError::ResourceNotFound(_) => ErrorCode::ResourceNotFound,
            RentalError::ResourceBusy { .. } => ErrorCode::ResourceBusy,
            RentalError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            RentalError::AlreadyCompleted(_) => ErrorCode::AlreadyCompleted,
            RentalError::InvalidDuration => ErrorCode::InvalidDuration,
            RentalError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            RentalError::StoreError(_) => ErrorCode::StoreError,
            RentalError::IpcError(_) | RentalError::Internal(_) => ErrorCode::InternalError,
        };
        Self::new(code, err.to_string())
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ResourceNotFound,
    ResourceBusy,
    SessionNotFound,
    AlreadyCompleted,
    InvalidDuration,
    InvalidTransition,
    InvalidRequest,
    PermissionDenied,
    RateLimited,
    StoreError,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Lease a resource to a customer
    Start {
        resource_id: ResourceId,
        customer_name: String,
        mode: RentalModeTag,
        /// Required (and positive) for fixed-duration rentals
        #[serde(default)]
        duration_minutes: Option<u32>,
    },

    Pause { session_id: SessionId },

    Resume { session_id: SessionId },

    /// Complete a session and bill it
    Finish { session_id: SessionId },

    /// Snapshot of all live sessions
    ListActive,

    /// Completed sessions matching a filter
    History {
        #[serde(default)]
        filter: HistoryFilter,
    },

    /// Aggregate usage over completed sessions
    Stats {
        #[serde(default)]
        filter: HistoryFilter,
    },

    /// Catalog resources with availability
    ListResources,

    /// Live elapsed time and estimated bill
    Quote { session_id: SessionId },

    /// Advisory elapsed-time report from an observer's display clock
    Reconcile { report: ReconcileReport },

    /// Subscribe to events; the response carries a full snapshot
    SubscribeEvents,

    /// Unsubscribe from events
    UnsubscribeEvents,

    /// Get health status
    GetHealth,

    // Admin commands

    /// Drop completed sessions from history (admin only)
    ClearHistory {
        /// Only sessions completed strictly before this time; all if absent
        #[serde(default)]
        before: Option<DateTime<Local>>,
    },

    /// Ping for keepalive
    Ping,
}

impl Command {
    /// Whether the command changes session state
    pub fn is_session_mutation(&self) -> bool {
        matches!(
            self,
            Command::Start { .. }
                | Command::Pause { .. }
                | Command::Resume { .. }
                | Command::Finish { .. }
        )
    }
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Session(SessionInfo),
    Finished(FinishOutcome),
    Sessions { sessions: Vec<SessionInfo> },
    Snapshot(ActiveSnapshot),
    Stats(UsageStats),
    Resources { resources: Vec<ResourceView> },
    Quote(Quote),
    Reconciled(ReconcileOutcome),
    Subscribed {
        observer_id: ObserverId,
        snapshot: ActiveSnapshot,
    },
    Unsubscribed,
    Health(HealthStatus),
    HistoryCleared {
        removed: usize,
    },
    Pong,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub observer_id: ObserverId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: ClientRole) -> Self {
        Self {
            observer_id: ObserverId::new(),
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}
