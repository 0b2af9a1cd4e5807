//! Elapsed-time accumulator
//!
//! `elapsed = base + (running ? now - running_since : 0)`
//!
//! The base is kept in whole milliseconds because it is exported to
//! observers as `base_elapsed_ms`; folding an interval truncates its
//! sub-millisecond remainder. A clock reading earlier than `running_since`
//! contributes nothing.

use chrono::{DateTime, Local};
use std::time::Duration;

/// Accrued active time of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accrual {
    base_ms: u64,
    running_since: Option<DateTime<Local>>,
}

impl Accrual {
    /// Start accruing from zero at `now`
    pub fn running(now: DateTime<Local>) -> Self {
        Self {
            base_ms: 0,
            running_since: Some(now),
        }
    }

    /// Rebuild from persisted or transmitted parts
    pub fn from_parts(base_ms: u64, running_since: Option<DateTime<Local>>) -> Self {
        Self {
            base_ms,
            running_since,
        }
    }

    pub fn base_ms(&self) -> u64 {
        self.base_ms
    }

    pub fn running_since(&self) -> Option<DateTime<Local>> {
        self.running_since
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    /// Total accrued time at `now`
    pub fn elapsed_at(&self, now: DateTime<Local>) -> Duration {
        let live = self
            .running_since
            .map(|since| rental_util::interval_between(since, now))
            .unwrap_or(Duration::ZERO);
        Duration::from_millis(self.base_ms).saturating_add(live)
    }

    /// Fold the running interval into the base and stop. No-op if stopped.
    pub fn stop(&mut self, now: DateTime<Local>) {
        if let Some(since) = self.running_since.take() {
            let live = rental_util::interval_between(since, now);
            let live_ms = u64::try_from(live.as_millis()).unwrap_or(u64::MAX);
            self.base_ms = self.base_ms.saturating_add(live_ms);
        }
    }

    /// Start a new running interval at `now`. No-op if already running.
    pub fn start(&mut self, now: DateTime<Local>) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 1, 15, 0, 0).unwrap()
    }

    fn after(ms: i64) -> DateTime<Local> {
        t0() + chrono::Duration::milliseconds(ms)
    }

    #[test]
    fn test_running_accrues_wall_time() {
        let accrual = Accrual::running(t0());
        assert_eq!(accrual.elapsed_at(after(90_000)), Duration::from_secs(90));
    }

    #[test]
    fn test_stop_freezes_elapsed() {
        let mut accrual = Accrual::running(t0());
        accrual.stop(after(600_000));

        assert!(!accrual.is_running());
        assert_eq!(accrual.base_ms(), 600_000);
        assert_eq!(accrual.elapsed_at(after(3_600_000)), Duration::from_secs(600));
    }

    #[test]
    fn test_resume_continues_from_base() {
        let mut accrual = Accrual::running(t0());
        accrual.stop(after(600_000));
        accrual.start(after(720_000));

        assert_eq!(accrual.base_ms(), 600_000);
        assert_eq!(accrual.elapsed_at(after(780_000)), Duration::from_secs(660));
    }

    #[test]
    fn test_clock_behind_resume_contributes_zero() {
        let accrual = Accrual::from_parts(5_000, Some(after(60_000)));
        assert_eq!(accrual.elapsed_at(t0()), Duration::from_secs(5));
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let mut accrual = Accrual::running(t0());
        accrual.start(after(10_000));
        assert_eq!(accrual.running_since(), Some(t0()));

        accrual.stop(after(20_000));
        accrual.stop(after(30_000));
        assert_eq!(accrual.base_ms(), 20_000);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn elapsed_is_monotonic_while_running(
            base in 0u64..10_000_000,
            a in 0i64..10_000_000,
            b in 0i64..10_000_000,
        ) {
            let accrual = Accrual::from_parts(base, Some(t0()));
            let (early, late) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(accrual.elapsed_at(after(early)) <= accrual.elapsed_at(after(late)));
        }

        #[test]
        fn stop_preserves_elapsed(base in 0u64..10_000_000, at in 0i64..10_000_000) {
            let mut accrual = Accrual::from_parts(base, Some(t0()));
            let before = accrual.elapsed_at(after(at));
            accrual.stop(after(at));
            prop_assert_eq!(accrual.elapsed_at(after(at)), before);
        }
    }
}
