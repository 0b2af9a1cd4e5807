//! Time utilities for rentald
//!
//! Session accrual is anchored to wall-clock timestamps (`last_resume_at`),
//! because those timestamps are persisted and shared with observers.
//! Intervals between two wall-clock readings are always saturated at zero so
//! a clock step backwards never produces negative usage.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `RENTAL_MOCK_TIME` environment variable can be set
//! to override the system time for all time-sensitive operations.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 14:30:00`)
//!
//! Example:
//! ```bash
//! RENTAL_MOCK_TIME="2025-12-25 14:30:00" rentald
//! ```

use chrono::{DateTime, Local};
#[cfg(debug_assertions)]
use chrono::{NaiveDateTime, TimeZone};
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "RENTAL_MOCK_TIME";

/// Format accepted by `RENTAL_MOCK_TIME`
pub const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Cached mock time offset from the real time when the process started.
/// This allows mock time to advance naturally.
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // This is the internal implementation that wraps Local::now()
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            if let Ok(mock_time_str) = std::env::var(MOCK_TIME_ENV_VAR) {
                match NaiveDateTime::parse_from_str(&mock_time_str, MOCK_TIME_FORMAT) {
                    Ok(naive_dt) => match Local.from_local_datetime(&naive_dt).single() {
                        Some(mock_dt) => {
                            let offset = mock_dt.signed_duration_since(chrono::Local::now());
                            tracing::info!(
                                mock_time = %mock_time_str,
                                offset_secs = offset.num_seconds(),
                                "Mock time enabled"
                            );
                            return Some(offset);
                        }
                        None => {
                            tracing::warn!(
                                mock_time = %mock_time_str,
                                "Failed to convert mock time to local timezone"
                            );
                        }
                    },
                    Err(_) => {
                        tracing::warn!(
                            mock_time = %mock_time_str,
                            expected_format = MOCK_TIME_FORMAT,
                            "Invalid mock time format"
                        );
                    }
                }
            }
            None
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Get the current local time, respecting mock time settings in debug builds.
#[allow(clippy::disallowed_methods)] // This is the wrapper that provides mock time support
pub fn now() -> DateTime<Local> {
    let real_now = chrono::Local::now();

    if let Some(offset) = get_mock_time_offset() {
        real_now + offset
    } else {
        real_now
    }
}

/// Wall-clock interval from `earlier` to `later`, saturating at zero.
pub fn interval_between(earlier: DateTime<Local>, later: DateTime<Local>) -> Duration {
    later
        .signed_duration_since(earlier)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Format a DateTime as wall-clock time of day.
pub fn format_clock_time(dt: &DateTime<Local>) -> String {
    dt.format("%H:%M").to_string()
}

/// Format a DateTime for display with full date and time.
pub fn format_datetime_full(dt: &DateTime<Local>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Stopwatch-style rendering: `H:MM:SS` past one hour, `M:SS` below.
pub fn format_elapsed(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, NaiveDateTime, TimeZone};

    #[test]
    fn test_interval_between_saturates() {
        let t0 = Local.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::minutes(7);

        assert_eq!(interval_between(t0, t1), Duration::from_secs(420));
        // Clock stepped backwards: no negative usage
        assert_eq!(interval_between(t1, t0), Duration::ZERO);
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "0:00");
        assert_eq!(format_elapsed(Duration::from_secs(75)), "1:15");
        assert_eq!(format_elapsed(Duration::from_secs(3725)), "1:02:05");
    }

    #[test]
    fn test_format_clock_time() {
        let dt = Local.with_ymd_and_hms(2025, 12, 25, 14, 30, 45).unwrap();
        assert_eq!(format_clock_time(&dt), "14:30");
    }

    #[test]
    fn test_format_datetime_full() {
        let dt = Local.with_ymd_and_hms(2025, 12, 25, 14, 30, 45).unwrap();
        assert_eq!(format_datetime_full(&dt), "2025-12-25 14:30:45");
    }

    #[test]
    fn test_now_returns_time() {
        let t = now();
        assert!(t.year() >= 2020);
        assert!(t.year() <= 2100);
    }

    #[test]
    fn test_mock_time_env_var_name() {
        assert_eq!(MOCK_TIME_ENV_VAR, "RENTAL_MOCK_TIME");
    }

    #[test]
    fn test_parse_mock_time_invalid_formats() {
        let invalid_formats = [
            "2025-12-25",
            "14:30:00",
            "2025/12/25 14:30:00",
            "2025-12-25T14:30:00",
            "",
            "not a date",
        ];

        for format_str in &invalid_formats {
            let result = NaiveDateTime::parse_from_str(format_str, MOCK_TIME_FORMAT);
            assert!(
                result.is_err(),
                "Expected '{}' to fail parsing, but it succeeded",
                format_str
            );
        }
    }

    #[test]
    fn test_now_consistency() {
        let t1 = now();
        let t2 = now();
        assert!(t2 >= t1);
    }
}
