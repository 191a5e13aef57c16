//! # Fee Schedule
//!
//! Platform commission rates and funding minimums. Rates are basis points
//! (1 bps = 0.01 %); all fee arithmetic goes through
//! [`Money::percent_bps`], which rounds half-up.

use linkex_core::{Money, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Commission rates and funding limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Commission taken from the seller's proceeds on each completed order.
    pub order_commission_bps: u32,
    /// Fee taken from each approved withdrawal.
    pub withdrawal_fee_bps: u32,
    /// Commission paid to a referrer on the referred buyer's first
    /// completed order, as a share of the order price.
    pub referral_commission_bps: u32,
    /// Smallest deposit request accepted.
    pub min_deposit: Money,
    /// Smallest withdrawal request accepted.
    pub min_withdrawal: Money,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            order_commission_bps: 1_000,
            withdrawal_fee_bps: 0,
            referral_commission_bps: 500,
            min_deposit: Money::from_cents(500),
            min_withdrawal: Money::from_cents(1_000),
        }
    }
}

impl FeeSchedule {
    /// Check that every rate is at most 100 % and minimums are positive.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let max = BPS_DENOMINATOR as u32;
        for (name, bps) in [
            ("order_commission_bps", self.order_commission_bps),
            ("withdrawal_fee_bps", self.withdrawal_fee_bps),
            ("referral_commission_bps", self.referral_commission_bps),
        ] {
            if bps > max {
                return Err(LedgerError::InvalidSchedule(format!(
                    "{name} must be at most {max}, got {bps}"
                )));
            }
        }
        if !self.min_deposit.is_positive() {
            return Err(LedgerError::InvalidSchedule(
                "min_deposit must be positive".into(),
            ));
        }
        if !self.min_withdrawal.is_positive() {
            return Err(LedgerError::InvalidSchedule(
                "min_withdrawal must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Platform commission on an order of `gross`.
    pub fn order_commission(&self, gross: Money) -> Result<Money, LedgerError> {
        gross
            .percent_bps(self.order_commission_bps)
            .ok_or(LedgerError::Overflow)
    }

    /// Fee on a withdrawal of `gross`.
    pub fn withdrawal_fee(&self, gross: Money) -> Result<Money, LedgerError> {
        gross
            .percent_bps(self.withdrawal_fee_bps)
            .ok_or(LedgerError::Overflow)
    }

    /// Referral commission on an order of `base`.
    pub fn referral_commission(&self, base: Money) -> Result<Money, LedgerError> {
        base.percent_bps(self.referral_commission_bps)
            .ok_or(LedgerError::Overflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let s = FeeSchedule::default();
        assert!(s.validate().is_ok());
        assert_eq!(s.order_commission_bps, 1_000);
        assert_eq!(s.min_deposit, Money::from_units(5));
        assert_eq!(s.min_withdrawal, Money::from_units(10));
    }

    #[test]
    fn rate_above_one_hundred_percent_rejected() {
        let s = FeeSchedule {
            order_commission_bps: 10_001,
            ..FeeSchedule::default()
        };
        assert!(matches!(s.validate(), Err(LedgerError::InvalidSchedule(_))));
    }

    #[test]
    fn full_rate_is_allowed() {
        let s = FeeSchedule {
            withdrawal_fee_bps: 10_000,
            ..FeeSchedule::default()
        };
        assert!(s.validate().is_ok());
        assert_eq!(
            s.withdrawal_fee(Money::from_cents(1_234)).unwrap(),
            Money::from_cents(1_234)
        );
    }

    #[test]
    fn zero_minimum_rejected() {
        let s = FeeSchedule {
            min_withdrawal: Money::ZERO,
            ..FeeSchedule::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn commission_rounds_half_up() {
        let s = FeeSchedule::default();
        // 10 % of 12.35 = 1.235 -> 1.24
        assert_eq!(
            s.order_commission(Money::from_cents(1_235)).unwrap(),
            Money::from_cents(124)
        );
        // 5 % of 0.09 = 0.0045 -> 0.00
        assert_eq!(
            s.referral_commission(Money::from_cents(9)).unwrap(),
            Money::ZERO
        );
    }
}
