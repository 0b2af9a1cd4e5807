//! Shared utilities for rentald
//!
//! This crate provides:
//! - ID types (ResourceId, SessionId, ObserverId)
//! - Wall-clock helpers (mock time, saturating intervals, display formatting)
//! - The rental error taxonomy
//! - Rate limiting helpers
//! - Default paths for socket, data, and config files

mod error;
mod ids;
mod paths;
mod rate_limit;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use rate_limit::*;
pub use time::*;
