//! Billing calculator
//!
//! Usage is charged in fixed-size blocks. The accrued time is first rounded
//! up to whole minutes. If the next block boundary is within the grace
//! window, the customer is charged only the completed blocks; otherwise the
//! next full block is charged. Every non-zero session pays at least the
//! minimum number of blocks.
//!
//! With the default 15/5/1 policy:
//!
//! | raw minutes | billable |
//! |---|---|
//! | 10 | 15 |
//! | 17 | 30 |
//! | 58 | 45 |
//! | 60 | 60 |

use rental_api::{Bill, Money};
use rental_config::BillingConfig;
use std::time::Duration;

pub const MS_PER_MINUTE: u64 = 60_000;

/// Block billing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPolicy {
    pub block_minutes: u64,
    pub grace_minutes: u64,
    pub minimum_blocks: u64,
}

impl Default for BillingPolicy {
    fn default() -> Self {
        Self::from(&BillingConfig::default())
    }
}

impl From<&BillingConfig> for BillingPolicy {
    fn from(config: &BillingConfig) -> Self {
        Self {
            block_minutes: u64::from(config.block_minutes),
            grace_minutes: u64::from(config.grace_minutes),
            minimum_blocks: u64::from(config.minimum_blocks),
        }
    }
}

impl BillingPolicy {
    /// Whole minutes of usage, rounding any started minute up
    pub fn raw_minutes(elapsed: Duration) -> u64 {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        ms.div_ceil(MS_PER_MINUTE)
    }

    /// Minutes charged for `raw_minutes` of usage
    pub fn billable_minutes(&self, raw_minutes: u64) -> u64 {
        if raw_minutes == 0 {
            return 0;
        }

        let block = self.block_minutes.max(1);
        let upper = raw_minutes.div_ceil(block).saturating_mul(block);
        let minimum = self.minimum_blocks.saturating_mul(block);

        let billable = if upper - raw_minutes <= self.grace_minutes {
            (raw_minutes / block) * block
        } else {
            upper
        };

        billable.max(minimum)
    }

    /// Price of `billable_minutes` at an hourly rate, rounded half up to the cent
    pub fn amount(billable_minutes: u64, hourly_rate: Money) -> Money {
        let minutes = i64::try_from(billable_minutes).unwrap_or(i64::MAX);
        Money::from_cents(minutes.saturating_mul(hourly_rate.cents())).div_round(60)
    }

    /// Full billing breakdown for an elapsed duration
    pub fn bill(&self, elapsed: Duration, hourly_rate: Money) -> Bill {
        let raw_minutes = Self::raw_minutes(elapsed);
        let billable_minutes = self.billable_minutes(raw_minutes);

        Bill {
            raw_minutes,
            billable_minutes,
            amount: Self::amount(billable_minutes, hourly_rate),
        }
    }

    /// Amount owed for an elapsed duration
    pub fn cost(&self, elapsed: Duration, hourly_rate: Money) -> Money {
        self.bill(elapsed, hourly_rate).amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn minutes(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    const TEN_PER_HOUR: Money = Money::from_cents(1000);

    #[test]
    fn test_billing_table() {
        let policy = BillingPolicy::default();

        let cases = [(10, 15, 250), (17, 30, 500), (58, 45, 750), (60, 60, 1000)];
        for (raw, billable, cents) in cases {
            let bill = policy.bill(minutes(raw), TEN_PER_HOUR);
            assert_eq!(bill.raw_minutes, raw);
            assert_eq!(bill.billable_minutes, billable, "raw {}", raw);
            assert_eq!(bill.amount, Money::from_cents(cents), "raw {}", raw);
        }
    }

    #[test]
    fn test_zero_elapsed_is_free() {
        let policy = BillingPolicy::default();
        let bill = policy.bill(Duration::ZERO, TEN_PER_HOUR);
        assert_eq!(bill.raw_minutes, 0);
        assert_eq!(bill.billable_minutes, 0);
        assert!(bill.amount.is_zero());
    }

    #[test]
    fn test_started_minute_counts() {
        assert_eq!(BillingPolicy::raw_minutes(Duration::from_millis(1)), 1);
        assert_eq!(BillingPolicy::raw_minutes(Duration::from_millis(60_000)), 1);
        assert_eq!(BillingPolicy::raw_minutes(Duration::from_millis(60_001)), 2);
    }

    #[test]
    fn test_grace_boundary_is_inclusive() {
        let policy = BillingPolicy::default();
        // 5 minutes short of the boundary: grace applies
        assert_eq!(policy.billable_minutes(25), 15);
        // 6 minutes short: next block charged
        assert_eq!(policy.billable_minutes(24), 30);
        // Sub-block sessions pay the minimum block
        assert_eq!(policy.billable_minutes(1), 15);
        assert_eq!(policy.billable_minutes(12), 15);
    }

    #[test]
    fn test_jane_thirty_minutes_at_eight_per_hour() {
        let policy = BillingPolicy::default();
        let bill = policy.bill(minutes(30), Money::from_cents(800));
        assert_eq!(bill.billable_minutes, 30);
        assert_eq!(bill.amount, Money::from_cents(400));
    }

    #[test]
    fn test_amount_rounds_half_up() {
        // 15 minutes at 0.01/h = 0.0025 -> 0.00
        assert_eq!(BillingPolicy::amount(15, Money::from_cents(1)), Money::ZERO);
        // 30 minutes at 0.01/h = 0.005 -> 0.01
        assert_eq!(BillingPolicy::amount(30, Money::from_cents(1)), Money::from_cents(1));
        // 45 minutes at 3.33/h = 2.4975 -> 2.50
        assert_eq!(
            BillingPolicy::amount(45, Money::from_cents(333)),
            Money::from_cents(250)
        );
    }

    #[test]
    fn test_custom_policy() {
        let policy = BillingPolicy {
            block_minutes: 30,
            grace_minutes: 10,
            minimum_blocks: 2,
        };
        assert_eq!(policy.billable_minutes(5), 60);
        assert_eq!(policy.billable_minutes(85), 60);
        assert_eq!(policy.billable_minutes(95), 120);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn billable_is_whole_blocks_near_raw(raw in 1u64..10_000) {
            let policy = BillingPolicy::default();
            let billable = policy.billable_minutes(raw);

            prop_assert_eq!(billable % 15, 0);
            prop_assert!(billable >= 15);
            prop_assert!(billable + 15 > raw);
            prop_assert!(billable < raw + 15);
        }

        #[test]
        fn amount_is_monotonic_in_rate(raw in 0u64..2_000, rate in 0i64..100_000, extra in 0i64..10_000) {
            let policy = BillingPolicy::default();
            let low = policy.cost(minutes(raw), Money::from_cents(rate));
            let high = policy.cost(minutes(raw), Money::from_cents(rate + extra));
            prop_assert!(low <= high);
        }
    }
}
