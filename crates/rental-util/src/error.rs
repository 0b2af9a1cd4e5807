//! Error types for rentald

use thiserror::Error;

use crate::{ResourceId, SessionId};

/// Error taxonomy for rental operations.
///
/// Every variant is returned synchronously to the caller. None of them are
/// retried by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RentalError {
    #[error("Resource not found or inactive: {0}")]
    ResourceNotFound(ResourceId),

    #[error("Resource {resource_id} is busy with session {session_id}")]
    ResourceBusy {
        resource_id: ResourceId,
        session_id: SessionId,
    },

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Session already completed: {0}")]
    AlreadyCompleted(SessionId),

    #[error("Fixed-duration rental requires a positive duration in minutes")]
    InvalidDuration,

    #[error("Cannot {action} session {session_id} while it is {state}")]
    InvalidTransition {
        session_id: SessionId,
        action: &'static str,
        state: &'static str,
    },

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RentalError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreError(msg.into())
    }

    pub fn ipc(msg: impl Into<String>) -> Self {
        Self::IpcError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, RentalError>;
