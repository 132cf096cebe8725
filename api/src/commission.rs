//! Commission rate math.
//!
//! Agents earn a base rate on what they collect, decaying the longer the
//! cash is held past a grace window. The decay is multiplicative:
//! `eff = base * (1 - penalty_per_day * extra_days)`, clamped at zero.
//! (An absolute variant, `base - penalty * extra`, exists in older
//! spreadsheets; the multiplicative form is the one in force.)

use rust_decimal::{Decimal, dec};

/// Rates arrive either as fractions (0-1) or percents (0-100).
pub fn normalize_rate(value: Decimal) -> Decimal {
    if value <= Decimal::ONE {
        value
    } else {
        value / dec!(100)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CommissionConfig {
    pub base_rate: Decimal,
    pub grace_days: i64,
    pub penalty_per_day: Decimal,
}

impl CommissionConfig {
    pub fn normalized(
        base_rate: Decimal,
        grace_days: i64,
        penalty_per_day: Decimal,
    ) -> Self {
        Self {
            base_rate: normalize_rate(base_rate),
            grace_days: grace_days.max(0),
            penalty_per_day: normalize_rate(penalty_per_day),
        }
    }

    /// Effective rate for cash held `days_held` days.
    pub fn effective_rate(&self, days_held: i64) -> Decimal {
        let extra = (days_held - self.grace_days).max(0);
        let decay =
            Decimal::ONE - self.penalty_per_day * Decimal::from(extra);
        (self.base_rate * decay).max(Decimal::ZERO)
    }
}

/// Whole days elapsed between two instants.
pub fn days_between(from: jiff::Timestamp, to: jiff::Timestamp) -> i64 {
    ((to.as_second() - from.as_second()) / 86_400).max(0)
}
