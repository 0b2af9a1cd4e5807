//! rentald - the rental timing and billing service
//!
//! Wires together:
//! - Configuration loading
//! - Store initialization and crash recovery
//! - Rental engine
//! - IPC server and event forwarding

mod service;

pub use service::*;
