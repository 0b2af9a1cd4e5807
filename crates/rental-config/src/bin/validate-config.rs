//! Config validation CLI tool
//!
//! Validates a rentald configuration file and reports any errors.

use rental_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a rentald configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            eprintln!("  validate-config config.example.toml");
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match rental_config::load_config(&config_path) {
        Ok(policy) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", rental_config::CURRENT_CONFIG_VERSION);
            println!(
                "  Billing: {}-minute blocks, {}-minute grace, minimum {} block(s)",
                policy.billing.block_minutes,
                policy.billing.grace_minutes,
                policy.billing.minimum_blocks
            );
            match &policy.currency.display {
                Some(rate) => println!(
                    "  Currency: {} (display {} at {})",
                    policy.currency.base_code, rate.display_code, rate.rate
                ),
                None => println!("  Currency: {}", policy.currency.base_code),
            }
            println!("  Resources: {}", policy.resources.len());

            if !policy.resources.is_empty() {
                println!();
                println!("Resources:");
                for resource in &policy.resources {
                    let status = if resource.active { "" } else { " (inactive)" };
                    println!(
                        "  - {} [{}/h]: {}{}",
                        resource.id, resource.hourly_rate, resource.label, status
                    );
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                rental_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                rental_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                rental_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                rental_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        rental_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
