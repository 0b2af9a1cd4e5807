//! Validated policy structures

use crate::schema::{
    RawBillingConfig, RawConfig, RawCurrencyConfig, RawExpiryConfig, RawResource,
    RawServiceConfig, RawSyncConfig,
};
use rental_api::{ExchangeRate, Money};
use rental_util::ResourceId;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_BLOCK_MINUTES: u32 = 15;
pub const DEFAULT_GRACE_MINUTES: u32 = 5;
pub const DEFAULT_MINIMUM_BLOCKS: u32 = 1;
pub const DEFAULT_BASE_CURRENCY: &str = "USD";
pub const DEFAULT_EVENT_BUFFER: usize = 256;
pub const DEFAULT_DRIFT_TOLERANCE_SECS: u64 = 5;
pub const DEFAULT_MAX_PLAUSIBLE_DRIFT_SECS: u64 = 3600;
pub const DEFAULT_WARNING_MINUTES: u32 = 5;

/// Validated policy ready for use by the core engine
#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub service: ServiceConfig,
    pub billing: BillingConfig,
    pub currency: CurrencyConfig,
    pub sync: SyncConfig,
    pub expiry: ExpiryConfig,
    /// Resource catalog in file order
    pub resources: Vec<Resource>,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            billing: BillingConfig::from_raw(raw.billing),
            currency: CurrencyConfig::from_raw(raw.currency),
            sync: SyncConfig::from_raw(raw.sync),
            expiry: ExpiryConfig::from_raw(raw.expiry),
            resources: raw.resources.into_iter().map(Resource::from_raw).collect(),
        }
    }

    /// Get resource by ID
    pub fn get_resource(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.iter().find(|r| &r.id == id)
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    pub tick_interval: Duration,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            socket_path: raw
                .socket_path
                .unwrap_or_else(rental_util::socket_path_without_env),
            data_dir: raw
                .data_dir
                .unwrap_or_else(rental_util::data_dir_without_env),
            tick_interval: Duration::from_millis(
                raw.tick_interval_ms.unwrap_or(DEFAULT_TICK_INTERVAL_MS),
            ),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

/// Billing block policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingConfig {
    pub block_minutes: u32,
    pub grace_minutes: u32,
    pub minimum_blocks: u32,
}

impl BillingConfig {
    fn from_raw(raw: RawBillingConfig) -> Self {
        Self {
            block_minutes: raw.block_minutes.unwrap_or(DEFAULT_BLOCK_MINUTES),
            grace_minutes: raw.grace_minutes.unwrap_or(DEFAULT_GRACE_MINUTES),
            minimum_blocks: raw.minimum_blocks.unwrap_or(DEFAULT_MINIMUM_BLOCKS),
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self::from_raw(RawBillingConfig::default())
    }
}

/// Base currency plus the optional display conversion
#[derive(Debug, Clone)]
pub struct CurrencyConfig {
    pub base_code: String,
    pub display: Option<ExchangeRate>,
}

impl CurrencyConfig {
    fn from_raw(raw: RawCurrencyConfig) -> Self {
        let base_code = raw
            .base_code
            .unwrap_or_else(|| DEFAULT_BASE_CURRENCY.to_string());
        let display = match (raw.display_code, raw.display_rate) {
            (Some(display_code), Some(rate)) => Some(ExchangeRate {
                base_code: base_code.clone(),
                display_code,
                rate,
            }),
            _ => None,
        };
        Self { base_code, display }
    }
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self::from_raw(RawCurrencyConfig::default())
    }
}

/// Synchronizer tuning
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub event_buffer: usize,
    pub drift_tolerance: Duration,
    pub max_plausible_drift: Duration,
}

impl SyncConfig {
    fn from_raw(raw: RawSyncConfig) -> Self {
        Self {
            event_buffer: raw.event_buffer.unwrap_or(DEFAULT_EVENT_BUFFER),
            drift_tolerance: Duration::from_secs(
                raw.drift_tolerance_secs
                    .unwrap_or(DEFAULT_DRIFT_TOLERANCE_SECS),
            ),
            max_plausible_drift: Duration::from_secs(
                raw.max_plausible_drift_secs
                    .unwrap_or(DEFAULT_MAX_PLAUSIBLE_DRIFT_SECS),
            ),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_raw(RawSyncConfig::default())
    }
}

/// Expiry alerts for fixed-duration rentals
#[derive(Debug, Clone, Copy)]
pub struct ExpiryConfig {
    /// 0 disables the warning
    pub warning_minutes: u32,
}

impl ExpiryConfig {
    fn from_raw(raw: RawExpiryConfig) -> Self {
        Self {
            warning_minutes: raw.warning_minutes.unwrap_or(DEFAULT_WARNING_MINUTES),
        }
    }
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self::from_raw(RawExpiryConfig::default())
    }
}

/// Validated catalog resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub id: ResourceId,
    pub label: String,
    pub hourly_rate: Money,
    pub active: bool,
}

impl Resource {
    fn from_raw(raw: RawResource) -> Self {
        Self {
            id: ResourceId::new(raw.id),
            label: raw.label,
            hourly_rate: Money::from_cents(raw.hourly_rate_cents),
            active: raw.active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_block_policy() {
        let policy = Policy::default();
        assert_eq!(policy.billing.block_minutes, 15);
        assert_eq!(policy.billing.grace_minutes, 5);
        assert_eq!(policy.billing.minimum_blocks, 1);
        assert_eq!(policy.expiry.warning_minutes, 5);
        assert_eq!(policy.service.tick_interval, Duration::from_secs(1));
        assert!(policy.currency.display.is_none());
    }

    #[test]
    fn test_display_rate_inherits_base_code() {
        let currency = CurrencyConfig::from_raw(RawCurrencyConfig {
            base_code: Some("USD".into()),
            display_code: Some("Bs".into()),
            display_rate: Some(36.5),
        });

        let rate = currency.display.unwrap();
        assert_eq!(rate.base_code, "USD");
        assert_eq!(rate.display_code, "Bs");
    }
}
