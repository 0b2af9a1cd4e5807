//! Protocol types for rentald IPC
//!
//! This crate defines the stable API between rentald and its observers:
//! - Session and resource views shared by every client
//! - Commands (requests from clients) and responses
//! - Events (service -> observers)
//! - Money in base-currency minor units
//! - Versioning

mod commands;
mod events;
mod money;
mod types;

pub use commands::*;
pub use events::*;
pub use money::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
