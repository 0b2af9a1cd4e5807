//! Persistence layer for rentald
//!
//! Provides:
//! - Audit log (append-only)
//! - Completed-session history with filtering
//! - Snapshot of in-progress sessions for crash recovery

mod audit;
mod sqlite;
mod traits;

pub use audit::*;
pub use sqlite::*;
pub use traits::*;

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for rental_util::RentalError {
    fn from(e: StoreError) -> Self {
        rental_util::RentalError::store(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
