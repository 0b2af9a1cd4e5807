//! Core rental engine for rentald
//!
//! This crate is the heart of rentald, containing:
//! - Block billing with a grace window
//! - Elapsed-time accrual across pause/resume cycles
//! - Session state machine (Active <-> Paused -> Completed)
//! - Resource registry enforcing one live session per resource
//! - Expiration of fixed-duration rentals
//! - Snapshot + delta synchronization of observers

mod accrual;
mod billing;
mod catalog;
mod engine;
mod events;
mod registry;
mod session;
mod sync;
mod watcher;

pub use accrual::*;
pub use billing::*;
pub use catalog::*;
pub use engine::*;
pub use events::*;
pub use registry::*;
pub use session::*;
pub use sync::*;
pub use watcher::*;
