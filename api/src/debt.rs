//! Debt-state derivation.
//!
//! A member's debt is never materialized: it is recomputed from the
//! effective fee and the allocations of posted payments. The store half
//! (`store::debt`) loads those inputs; this module does the pure walk so
//! the arithmetic is testable without a database.

use std::collections::HashMap;

use payloads::{
    Period, PeriodDebtStatus,
    responses::{DebtTotals, PeriodRow},
};
use rust_decimal::Decimal;

/// Build the per-period rows over an inclusive ascending window.
///
/// The charge for every period is the member's current effective fee; paid
/// sums come from allocations of posted/settled payments.
pub fn period_rows(
    effective_fee: Decimal,
    window: &[Period],
    paid_by_period: &HashMap<Period, Decimal>,
) -> Vec<PeriodRow> {
    window
        .iter()
        .map(|period| {
            let paid = paid_by_period
                .get(period)
                .copied()
                .unwrap_or(Decimal::ZERO);
            let balance = (effective_fee - paid).max(Decimal::ZERO);
            let status = if balance.is_zero() {
                PeriodDebtStatus::Paid
            } else if paid > Decimal::ZERO {
                PeriodDebtStatus::Partial
            } else {
                PeriodDebtStatus::Due
            };
            PeriodRow {
                period: period.clone(),
                charge: effective_fee,
                paid,
                balance,
                status,
            }
        })
        .collect()
}

/// Totals over the rows. Arrears only counts past-or-current periods.
pub fn grand_totals(rows: &[PeriodRow], now_period: &Period) -> DebtTotals {
    let mut totals = DebtTotals {
        charge: Decimal::ZERO,
        paid: Decimal::ZERO,
        balance: Decimal::ZERO,
        arrears_months: 0,
    };
    for row in rows {
        totals.charge += row.charge;
        totals.paid += row.paid;
        totals.balance += row.balance;
        if row.balance > Decimal::ZERO && row.period <= *now_period {
            totals.arrears_months += 1;
        }
    }
    totals
}
