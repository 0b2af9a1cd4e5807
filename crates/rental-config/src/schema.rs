//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Daemon settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Billing block policy
    #[serde(default)]
    pub billing: RawBillingConfig,

    /// Base currency and optional display conversion
    #[serde(default)]
    pub currency: RawCurrencyConfig,

    /// Observer synchronization tuning
    #[serde(default)]
    pub sync: RawSyncConfig,

    /// Fixed-duration expiry alerts
    #[serde(default)]
    pub expiry: RawExpiryConfig,

    /// Rentable resource catalog
    #[serde(default)]
    pub resources: Vec<RawResource>,
}

/// Daemon-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path
    pub socket_path: Option<PathBuf>,

    /// Data directory for the SQLite store
    pub data_dir: Option<PathBuf>,

    /// Period of the expiry check loop in milliseconds
    pub tick_interval_ms: Option<u64>,
}

/// Billing block policy
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawBillingConfig {
    pub block_minutes: Option<u32>,
    /// Overshoot past a block boundary that is not charged
    pub grace_minutes: Option<u32>,
    /// Smallest number of blocks charged for any non-zero session
    pub minimum_blocks: Option<u32>,
}

/// Currency settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawCurrencyConfig {
    /// Code of the currency rates and bills are kept in (e.g. "USD")
    pub base_code: Option<String>,
    /// Code of the display currency (e.g. "Bs")
    pub display_code: Option<String>,
    /// Display-currency units per base unit
    pub display_rate: Option<f64>,
}

/// Synchronizer settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSyncConfig {
    /// Broadcast buffer size before slow observers lag
    pub event_buffer: Option<usize>,
    /// Drift below this is reported as within tolerance
    pub drift_tolerance_secs: Option<u64>,
    /// Reports drifting more than this are discarded
    pub max_plausible_drift_secs: Option<u64>,
}

/// Expiry alert settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawExpiryConfig {
    /// Warn once when this many minutes or fewer remain
    pub warning_minutes: Option<u32>,
}

/// Raw resource definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawResource {
    /// Unique stable ID
    pub id: String,

    /// Display label
    pub label: String,

    /// Hourly rate in base-currency cents
    pub hourly_rate_cents: i64,

    /// Inactive resources cannot be rented
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}
