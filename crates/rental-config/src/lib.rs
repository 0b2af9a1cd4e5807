//! Configuration parsing and validation for rentald
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Billing block policy and currency display conversion
//! - Resource catalog definitions
//! - Validation that reports every problem at once

mod policy;
mod schema;
mod validation;

pub use policy::*;
pub use schema::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Policy> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Policy> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    let policy = Policy::from_raw(raw);
    tracing::debug!(
        resources = policy.resources.len(),
        block_minutes = policy.billing.block_minutes,
        "Configuration parsed"
    );
    Ok(policy)
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use rental_api::Money;
    use rental_util::ResourceId;
    use std::io::Write;

    #[test]
    fn parse_minimal_config() {
        let config = r#"
            config_version = 1

            [[resources]]
            id = "ps5-1"
            label = "PS5 #1"
            hourly_rate_cents = 800
        "#;

        let policy = parse_config(config).unwrap();
        assert_eq!(policy.resources.len(), 1);
        let resource = policy.get_resource(&ResourceId::new("ps5-1")).unwrap();
        assert_eq!(resource.hourly_rate, Money::from_cents(800));
        assert!(resource.active);
    }

    #[test]
    fn example_config_is_valid() {
        let policy = parse_config(include_str!("../../../config.example.toml")).unwrap();
        assert_eq!(policy.resources.len(), 4);
        assert_eq!(policy.resources.iter().filter(|r| r.active).count(), 3);
    }

    #[test]
    fn reject_wrong_version() {
        let config = r#"
            config_version = 99
        "#;

        let result = parse_config(config);
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_invalid_billing() {
        let config = r#"
            config_version = 1

            [billing]
            block_minutes = 15
            grace_minutes = 20
        "#;

        match parse_config(config) {
            Err(ConfigError::ValidationFailed { errors }) => assert_eq!(errors.len(), 1),
            other => panic!("Expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            config_version = 1

            [currency]
            base_code = "USD"
            display_code = "Bs"
            display_rate = 36.5

            [[resources]]
            id = "pc-1"
            label = "PC #1"
            hourly_rate_cents = 1000
            "#
        )
        .unwrap();

        let policy = load_config(file.path()).unwrap();
        assert_eq!(policy.resources[0].label, "PC #1");
        assert!(policy.currency.display.is_some());
    }

    #[test]
    fn missing_file_is_read_error() {
        let result = load_config("/nonexistent/rentald/config.toml");
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }
}
