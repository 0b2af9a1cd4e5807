//! Core events reported by the engine's periodic tick

use rental_api::FinishOutcome;
use rental_util::{ResourceId, SessionId};

/// Events produced by [`crate::RentalEngine::tick`]
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// A fixed-duration session is close to its limit
    ExpiryWarning {
        session_id: SessionId,
        resource_id: ResourceId,
        remaining_minutes: u64,
    },

    /// A fixed-duration session reached its limit and was completed
    Expired(FinishOutcome),
}
