//! Configuration validation

use crate::policy::{
    DEFAULT_BLOCK_MINUTES, DEFAULT_DRIFT_TOLERANCE_SECS, DEFAULT_GRACE_MINUTES,
    DEFAULT_MAX_PLAUSIBLE_DRIFT_SECS,
};
use crate::schema::{RawConfig, RawCurrencyConfig, RawResource};
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Resource '{resource_id}': {message}")]
    ResourceError { resource_id: String, message: String },

    #[error("Duplicate resource ID: {0}")]
    DuplicateResourceId(String),

    #[error("Billing: {0}")]
    BillingError(String),

    #[error("Currency: {0}")]
    CurrencyError(String),

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration, collecting every problem found
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // Check for duplicate resource IDs
    let mut seen_ids = HashSet::new();
    for resource in &config.resources {
        if !seen_ids.insert(&resource.id) {
            errors.push(ValidationError::DuplicateResourceId(resource.id.clone()));
        }
    }

    for resource in &config.resources {
        errors.extend(validate_resource(resource));
    }

    errors.extend(validate_billing(config));
    errors.extend(validate_currency(&config.currency));

    if config.service.tick_interval_ms == Some(0) {
        errors.push(ValidationError::GlobalError(
            "service.tick_interval_ms must be positive".into(),
        ));
    }

    if config.sync.event_buffer == Some(0) {
        errors.push(ValidationError::GlobalError(
            "sync.event_buffer must be positive".into(),
        ));
    }

    let tolerance = config
        .sync
        .drift_tolerance_secs
        .unwrap_or(DEFAULT_DRIFT_TOLERANCE_SECS);
    let plausible = config
        .sync
        .max_plausible_drift_secs
        .unwrap_or(DEFAULT_MAX_PLAUSIBLE_DRIFT_SECS);
    if tolerance > plausible {
        errors.push(ValidationError::GlobalError(format!(
            "sync.drift_tolerance_secs ({}) exceeds sync.max_plausible_drift_secs ({})",
            tolerance, plausible
        )));
    }

    errors
}

fn validate_resource(resource: &RawResource) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if resource.id.trim().is_empty() {
        errors.push(ValidationError::ResourceError {
            resource_id: resource.id.clone(),
            message: "id cannot be empty".into(),
        });
    }

    if resource.label.trim().is_empty() {
        errors.push(ValidationError::ResourceError {
            resource_id: resource.id.clone(),
            message: "label cannot be empty".into(),
        });
    }

    if resource.hourly_rate_cents < 0 {
        errors.push(ValidationError::ResourceError {
            resource_id: resource.id.clone(),
            message: format!(
                "hourly_rate_cents cannot be negative (got {})",
                resource.hourly_rate_cents
            ),
        });
    }

    errors
}

fn validate_billing(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let block = config.billing.block_minutes.unwrap_or(DEFAULT_BLOCK_MINUTES);
    let grace = config.billing.grace_minutes.unwrap_or(DEFAULT_GRACE_MINUTES);

    if block == 0 {
        errors.push(ValidationError::BillingError(
            "block_minutes must be positive".into(),
        ));
    } else if grace >= block {
        errors.push(ValidationError::BillingError(format!(
            "grace_minutes ({}) must be smaller than block_minutes ({})",
            grace, block
        )));
    }

    if config.billing.minimum_blocks == Some(0) {
        errors.push(ValidationError::BillingError(
            "minimum_blocks must be at least 1".into(),
        ));
    }

    errors
}

fn validate_currency(currency: &RawCurrencyConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(code) = &currency.base_code
        && code.trim().is_empty()
    {
        errors.push(ValidationError::CurrencyError(
            "base_code cannot be empty".into(),
        ));
    }

    match (&currency.display_code, currency.display_rate) {
        (Some(code), Some(rate)) => {
            if code.trim().is_empty() {
                errors.push(ValidationError::CurrencyError(
                    "display_code cannot be empty".into(),
                ));
            }
            if !rate.is_finite() || rate <= 0.0 {
                errors.push(ValidationError::CurrencyError(format!(
                    "display_rate must be a positive number (got {})",
                    rate
                )));
            }
        }
        (None, None) => {}
        _ => errors.push(ValidationError::CurrencyError(
            "display_code and display_rate must be set together".into(),
        )),
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(id: &str, label: &str, rate: i64) -> RawResource {
        RawResource {
            id: id.into(),
            label: label.into(),
            hourly_rate_cents: rate,
            active: true,
        }
    }

    fn config_with(resources: Vec<RawResource>) -> RawConfig {
        RawConfig {
            config_version: 1,
            service: Default::default(),
            billing: Default::default(),
            currency: Default::default(),
            sync: Default::default(),
            expiry: Default::default(),
            resources,
        }
    }

    #[test]
    fn test_duplicate_id_detection() {
        let config = config_with(vec![
            resource("ps5-1", "PS5 #1", 800),
            resource("ps5-1", "PS5 again", 900),
        ]);

        let errors = validate_config(&config);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicateResourceId(_))));
    }

    #[test]
    fn test_collects_every_resource_error() {
        let config = config_with(vec![resource("", " ", -5)]);

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_grace_must_be_below_block() {
        let mut config = config_with(vec![]);
        config.billing.block_minutes = Some(10);
        config.billing.grace_minutes = Some(10);

        let errors = validate_config(&config);
        assert!(matches!(errors.as_slice(), [ValidationError::BillingError(_)]));

        config.billing.block_minutes = Some(0);
        let errors = validate_config(&config);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_display_rate_checks() {
        let mut config = config_with(vec![]);
        config.currency.display_code = Some("Bs".into());
        config.currency.display_rate = Some(0.0);
        assert_eq!(validate_config(&config).len(), 1);

        config.currency.display_rate = None;
        assert_eq!(validate_config(&config).len(), 1);

        config.currency.display_rate = Some(36.5);
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn test_zero_tick_and_buffer_rejected() {
        let mut config = config_with(vec![]);
        config.service.tick_interval_ms = Some(0);
        config.sync.event_buffer = Some(0);
        assert_eq!(validate_config(&config).len(), 2);
    }

    #[test]
    fn test_drift_tolerance_within_plausible_bound() {
        let mut config = config_with(vec![]);
        config.sync.drift_tolerance_secs = Some(600);
        config.sync.max_plausible_drift_secs = Some(60);
        assert_eq!(validate_config(&config).len(), 1);
    }
}
