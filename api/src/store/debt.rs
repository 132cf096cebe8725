//! Debt-state loading: the storage half of the debt engine.

use std::collections::HashMap;

use jiff::tz::TimeZone;
use payloads::{
    MemberId, Period,
    responses::{DebtTotals, PeriodRow},
};
use rust_decimal::Decimal;
use sqlx::PgExecutor;

use super::{Member, StoreError};
use crate::{debt, periods};

/// How many future months `include_future` exposes when no explicit `to`
/// bound is given.
const FUTURE_HORIZON_MONTHS: u32 = 12;

#[derive(Debug, Clone)]
pub struct DebtState {
    pub rows: Vec<PeriodRow>,
    pub totals: DebtTotals,
    pub now_period: Period,
}

/// Paid sums per period from allocations of posted/settled payments.
pub async fn paid_by_period<'e, E: PgExecutor<'e>>(
    executor: E,
    member_id: &MemberId,
) -> Result<HashMap<Period, Decimal>, StoreError> {
    let rows: Vec<(Period, Decimal)> = sqlx::query_as(
        r#"
        SELECT a.period, SUM(a.amount_applied)
        FROM allocations a
        JOIN payments p ON a.payment_id = p.id
        WHERE a.member_id = $1 AND p.status IN ('posted', 'settled')
        GROUP BY a.period
        "#,
    )
    .bind(member_id)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().collect())
}

/// Compute a member's `(period, charge, paid, balance)` rows over a window.
///
/// Defaults: `from` is the joining period, `to` the current period. The
/// engine never invents periods past the current one unless
/// `include_future` asks for the horizon.
pub async fn period_state<'e, E: PgExecutor<'e>>(
    executor: E,
    member: &Member,
    from: Option<Period>,
    to: Option<Period>,
    include_future: bool,
    now_period: &Period,
    tz: &TimeZone,
) -> Result<DebtState, StoreError> {
    let joined_period = periods::period_at(member.joined_at, tz);
    let from = from.unwrap_or(joined_period);
    let to = match (to, include_future) {
        (Some(to), true) => to,
        (Some(to), false) => to.min(now_period.clone()),
        (None, true) => {
            let mut horizon = now_period.clone();
            for _ in 0..FUTURE_HORIZON_MONTHS {
                horizon = horizon.succ();
            }
            horizon
        }
        (None, false) => now_period.clone(),
    };

    let paid = paid_by_period(executor, &member.id).await?;
    let window = from.range_to(&to);
    let rows = debt::period_rows(member.effective_fee(), &window, &paid);
    let totals = debt::grand_totals(&rows, now_period);

    Ok(DebtState {
        rows,
        totals,
        now_period: now_period.clone(),
    })
}
