//! Monetary amounts
//!
//! Amounts are stored as integer minor units (cents) of the shop's base
//! currency. Conversion into a display currency goes through
//! [`ExchangeRate`] and produces a separate [`ConvertedAmount`]; the base
//! amount is never rewritten.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Base-currency amount in minor units (cents)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Integer division rounding half away from zero, for averages.
    pub fn div_round(self, divisor: u64) -> Money {
        if divisor == 0 {
            return Money::ZERO;
        }
        let d = i128::from(divisor);
        let n = i128::from(self.0);
        let q = (2 * n.abs() + d) / (2 * d);
        let q = if n < 0 { -q } else { q };
        Money(i64::try_from(q).unwrap_or(i64::MAX))
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// Externally supplied conversion rate from the base currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub base_code: String,
    pub display_code: String,
    /// Display-currency units per one base-currency unit
    pub rate: f64,
}

impl ExchangeRate {
    /// Convert a base amount for display or export.
    pub fn convert(&self, amount: Money) -> ConvertedAmount {
        let minor = (amount.cents() as f64 * self.rate).round();
        ConvertedAmount {
            currency_code: self.display_code.clone(),
            minor_units: minor as i64,
        }
    }
}

/// Display-only amount in a foreign currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedAmount {
    pub currency_code: String,
    pub minor_units: i64,
}

impl fmt::Display for ConvertedAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", Money::from_cents(self.minor_units), self.currency_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_cents() {
        assert_eq!(Money::from_cents(400).to_string(), "4.00");
        assert_eq!(Money::from_cents(250).to_string(), "2.50");
        assert_eq!(Money::from_cents(7).to_string(), "0.07");
        assert_eq!(Money::from_cents(-1234).to_string(), "-12.34");
    }

    #[test]
    fn sum_and_average() {
        let total: Money = [250, 500, 750].into_iter().map(Money::from_cents).sum();
        assert_eq!(total, Money::from_cents(1500));
        assert_eq!(total.div_round(4), Money::from_cents(375));
        assert_eq!(Money::from_cents(1000).div_round(3), Money::from_cents(333));
        assert_eq!(Money::from_cents(500).div_round(0), Money::ZERO);
    }

    #[test]
    fn conversion_does_not_touch_base_amount() {
        let rate = ExchangeRate {
            base_code: "USD".into(),
            display_code: "Bs".into(),
            rate: 36.5,
        };
        let amount = Money::from_cents(400);
        let converted = rate.convert(amount);

        assert_eq!(converted.minor_units, 14600);
        assert_eq!(converted.to_string(), "146.00 Bs");
        assert_eq!(amount.cents(), 400);
    }

    #[test]
    fn serializes_as_plain_integer() {
        let json = serde_json::to_string(&Money::from_cents(800)).unwrap();
        assert_eq!(json, "800");
    }
}
