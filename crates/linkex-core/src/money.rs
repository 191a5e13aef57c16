//! # Money
//!
//! Integer minor-unit money. Amounts are stored as `i64` cents and serialize
//! as JSON integers; floating point never touches a balance. Parsing accepts
//! decimal strings ("12", "12.5", "12.50") so request bodies can carry
//! human-entered amounts without rounding surprises.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Basis points in one whole (100 %).
pub const BPS_DENOMINATOR: i64 = 10_000;

/// An amount of money in minor units (cents).
///
/// Signed so that ledger entries can carry debits as negative amounts.
/// Balances themselves are kept non-negative by the ledger engine.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero.
    pub const ZERO: Money = Money(0);

    /// Construct from a raw cent count.
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Construct from whole currency units.
    pub const fn from_units(units: i64) -> Self {
        Self(units * 100)
    }

    /// The raw cent count.
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Parse a non-negative decimal string with at most two fractional digits.
    ///
    /// ```
    /// use linkex_core::Money;
    /// assert_eq!(Money::parse("12.5").unwrap().cents(), 1250);
    /// assert!(Money::parse("-1").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let s = input.trim();
        let invalid = || ValidationError::InvalidAmount(input.to_string());
        if s.is_empty() {
            return Err(invalid());
        }

        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        if frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        if s.ends_with('.') {
            return Err(invalid());
        }

        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let frac_cents: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };

        whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac_cents))
            .map(Self)
            .ok_or_else(invalid)
    }

    /// Checked addition.
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Checked subtraction.
    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// Negation (debit form of an amount).
    pub fn negate(self) -> Money {
        Self(-self.0)
    }

    /// Whether the amount is strictly greater than zero.
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Whether the amount is below zero.
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// `self × bps / 10 000`, rounded half-up.
    ///
    /// Defined for non-negative amounts; a negative amount yields its
    /// mirrored value so the rounding stays symmetric. Returns `None` on
    /// overflow.
    pub fn percent_bps(self, bps: u32) -> Option<Money> {
        let magnitude = i128::from(self.0.unsigned_abs());
        let scaled = magnitude * i128::from(bps) + i128::from(BPS_DENOMINATOR / 2);
        let result = i64::try_from(scaled / i128::from(BPS_DENOMINATOR)).ok()?;
        Some(if self.0 < 0 { Self(-result) } else { Self(result) })
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        Self(iter.map(|m| m.0).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_whole_units() {
        assert_eq!(Money::parse("12").unwrap(), Money::from_cents(1200));
    }

    #[test]
    fn parse_one_decimal_place() {
        assert_eq!(Money::parse("12.3").unwrap(), Money::from_cents(1230));
    }

    #[test]
    fn parse_two_decimal_places() {
        assert_eq!(Money::parse(" 0.05 ").unwrap(), Money::from_cents(5));
    }

    #[test]
    fn parse_rejects_bad_input() {
        for bad in ["", "-1", "1.234", "abc", "1.", ".5", "1,00", "1e3", "1.-2"] {
            assert!(Money::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn parse_rejects_overflow() {
        assert!(Money::parse("999999999999999999999").is_err());
    }

    #[test]
    fn display_formats_cents() {
        assert_eq!(Money::from_cents(1234).to_string(), "12.34");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-50).to_string(), "-0.50");
    }

    #[test]
    fn percent_bps_rounds_half_up() {
        // 10 % of 12.35 = 1.235 -> 1.24
        assert_eq!(
            Money::from_cents(1235).percent_bps(1000),
            Some(Money::from_cents(124))
        );
        // 10 % of 12.34 = 1.234 -> 1.23
        assert_eq!(
            Money::from_cents(1234).percent_bps(1000),
            Some(Money::from_cents(123))
        );
        assert_eq!(Money::from_cents(1234).percent_bps(0), Some(Money::ZERO));
        assert_eq!(
            Money::from_cents(1234).percent_bps(10_000),
            Some(Money::from_cents(1234))
        );
    }

    #[test]
    fn checked_arithmetic_detects_overflow() {
        assert!(Money::from_cents(i64::MAX)
            .checked_add(Money::from_cents(1))
            .is_none());
        assert!(Money::from_cents(i64::MIN)
            .checked_sub(Money::from_cents(1))
            .is_none());
    }

    #[test]
    fn serializes_as_integer() {
        let json = serde_json::to_string(&Money::from_cents(4200)).unwrap();
        assert_eq!(json, "4200");
        let back: Money = serde_json::from_str("4200").unwrap();
        assert_eq!(back, Money::from_cents(4200));
    }

    #[test]
    fn sum_adds_all() {
        let total: Money = [1, 2, 3].into_iter().map(Money::from_cents).sum();
        assert_eq!(total, Money::from_cents(6));
    }

    proptest! {
        #[test]
        fn display_then_parse_is_identity(cents in 0i64..1_000_000_000_000) {
            let m = Money::from_cents(cents);
            prop_assert_eq!(Money::parse(&m.to_string()).unwrap(), m);
        }

        #[test]
        fn fee_never_exceeds_gross(cents in 0i64..1_000_000_000_000, bps in 0u32..=10_000) {
            let gross = Money::from_cents(cents);
            let fee = gross.percent_bps(bps).unwrap();
            prop_assert!(fee <= gross);
            prop_assert!(!fee.is_negative());
        }
    }
}
