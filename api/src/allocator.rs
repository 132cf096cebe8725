//! Allocation of an incoming amount across due billing periods.
//!
//! Pure: operates on debt rows already loaded by the caller. FIFO walks
//! oldest-first and never touches periods after the current one. Manual
//! breakdowns are validated per entry, then any remainder falls back to
//! FIFO over the still-due periods.

use payloads::{Period, requests::BreakdownEntry, responses::PeriodRow};
use rust_decimal::{Decimal, RoundingStrategy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAllocation {
    pub period: Period,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPlan {
    /// Ascending by period.
    pub allocations: Vec<PlannedAllocation>,
    /// What could not be placed on due periods `<=` now.
    pub leftover: Decimal,
}

#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("Invalid period '{raw}'")]
    InvalidPeriod { raw: String },
    #[error("Period {period} is in the future")]
    PeriodInFuture { period: Period },
    #[error("Invalid amount {amount} for period {period}")]
    InvalidAmount { period: Period, amount: Decimal },
    #[error(
        "Period {period} would be overpaid: requested {requested}, \
         balance {balance}"
    )]
    OverpayPeriod {
        period: Period,
        requested: Decimal,
        balance: Decimal,
    },
    #[error(
        "Breakdown total {breakdown_total} exceeds payment amount {amount}"
    )]
    BreakdownExceedsAmount {
        breakdown_total: Decimal,
        amount: Decimal,
    },
}

/// ARS carries two fractional digits; rounding at every step keeps long
/// FIFO chains from accumulating drift.
fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Oldest-first sweep of `amount` over the due periods at or before
/// `now_period`.
pub fn fifo_until_now(
    rows: &[PeriodRow],
    now_period: &Period,
    amount: Decimal,
) -> AllocationPlan {
    let mut remaining = round2(amount);
    let mut allocations = Vec::new();

    for row in rows {
        if remaining <= Decimal::ZERO {
            break;
        }
        if row.period > *now_period || row.balance <= Decimal::ZERO {
            continue;
        }
        let take = round2(remaining.min(row.balance));
        allocations.push(PlannedAllocation {
            period: row.period.clone(),
            amount: take,
        });
        remaining = round2(remaining - take);
    }

    AllocationPlan {
        allocations,
        leftover: remaining.max(Decimal::ZERO),
    }
}

/// Apply an explicit breakdown, then FIFO-place any remainder of
/// `total_amount` over the still-due periods.
pub fn manual(
    rows: &[PeriodRow],
    now_period: &Period,
    breakdown: &[BreakdownEntry],
    total_amount: Decimal,
) -> Result<AllocationPlan, AllocationError> {
    let mut working: Vec<PeriodRow> = rows.to_vec();
    let mut allocations: Vec<PlannedAllocation> = Vec::new();
    let mut breakdown_total = Decimal::ZERO;

    for entry in breakdown {
        let period = Period::parse(&entry.period).ok_or_else(|| {
            AllocationError::InvalidPeriod {
                raw: entry.period.clone(),
            }
        })?;
        if period > *now_period {
            return Err(AllocationError::PeriodInFuture { period });
        }
        let amount = round2(entry.amount);
        if amount <= Decimal::ZERO {
            return Err(AllocationError::InvalidAmount { period, amount });
        }

        let row = working.iter_mut().find(|r| r.period == period);
        let balance = row.as_ref().map_or(Decimal::ZERO, |r| r.balance);
        if amount > balance {
            return Err(AllocationError::OverpayPeriod {
                period,
                requested: amount,
                balance,
            });
        }
        // checked above: the row exists whenever balance covers the amount
        let row = row.expect("period with positive balance is in the window");
        row.balance = round2(row.balance - amount);

        breakdown_total = round2(breakdown_total + amount);
        merge(&mut allocations, period, amount);
    }

    if breakdown_total > total_amount {
        return Err(AllocationError::BreakdownExceedsAmount {
            breakdown_total,
            amount: total_amount,
        });
    }

    let remainder = round2(total_amount - breakdown_total);
    let fallback = fifo_until_now(&working, now_period, remainder);
    for planned in fallback.allocations {
        merge(&mut allocations, planned.period, planned.amount);
    }
    allocations.sort_by(|a, b| a.period.cmp(&b.period));

    Ok(AllocationPlan {
        allocations,
        leftover: fallback.leftover,
    })
}

fn merge(
    allocations: &mut Vec<PlannedAllocation>,
    period: Period,
    amount: Decimal,
) {
    match allocations.iter_mut().find(|a| a.period == period) {
        Some(existing) => existing.amount = round2(existing.amount + amount),
        None => allocations.push(PlannedAllocation { period, amount }),
    }
}
